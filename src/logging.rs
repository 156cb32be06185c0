/*
 * SPDX-FileCopyrightText: 2025 UnionTech Software Technology Co., Ltd.
 *
 * SPDX-License-Identifier: GPL-2.0-or-later
 */

use env_logger::Env;
use std::env;
use std::io::Write;

struct LogColors {
    error: &'static str,
    warn: &'static str,
    info: &'static str,
    debug: &'static str,
    trace: &'static str,
    reset: &'static str,
}

impl LogColors {
    fn new(enable_color: bool) -> Self {
        if enable_color {
            Self {
                error: "\x1b[31m",
                warn: "\x1b[33m",
                info: "\x1b[32m",
                debug: "\x1b[36m",
                trace: "\x1b[35m",
                reset: "\x1b[0m",
            }
        } else {
            Self {
                error: "",
                warn: "",
                info: "",
                debug: "",
                trace: "",
                reset: "",
            }
        }
    }
}

/// Initialize the logger from the repeated `-v` count.
///
/// Level 0 shows errors and warnings only; each additional level enables the
/// matching `debugN` target used by the `debug1!`..`debug5!` macros.
pub fn setup_logger(verbose: u8) {
    let enable_color =
        env::var("NO_COLOR").is_err() && env::var("TERM").map_or(false, |term| term != "dumb");

    let mut log_config = vec!["error".to_string(), "warn".to_string()];
    if verbose > 0 {
        log_config.push("info".to_string());
    }
    for level in 1..=verbose.min(5) {
        let log_level = if level <= 4 { "debug" } else { "trace" };
        log_config.push(format!("debug{}={}", level, log_level));
    }

    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", log_config.join(","));
    }

    let colors = LogColors::new(enable_color);

    env_logger::Builder::from_env(Env::default().filter("RUST_LOG"))
        .format(move |buf, record| {
            match record.target() {
                // debugN targets print bare, matching native ipmitool output
                "debug1" | "debug2" | "debug3" | "debug4" | "debug5" => {
                    writeln!(buf, "{}", record.args())
                }
                _ => {
                    let level_color = match record.level() {
                        log::Level::Error => colors.error,
                        log::Level::Warn => colors.warn,
                        log::Level::Info => colors.info,
                        log::Level::Debug => colors.debug,
                        log::Level::Trace => colors.trace,
                    };
                    let level_text = match record.level() {
                        log::Level::Error => "ERROR",
                        log::Level::Warn => "WARN ",
                        log::Level::Info => "INFO ",
                        log::Level::Debug => "DEBUG",
                        log::Level::Trace => "TRACE",
                    };
                    writeln!(
                        buf,
                        "{}[{}]{} {}",
                        level_color,
                        level_text,
                        colors.reset,
                        record.args()
                    )
                }
            }
        })
        .init();
}

pub fn is_debug_enabled(level: u8) -> bool {
    match level {
        1 => log::log_enabled!(target: "debug1", log::Level::Debug),
        2 => log::log_enabled!(target: "debug2", log::Level::Debug),
        3 => log::log_enabled!(target: "debug3", log::Level::Debug),
        4 => log::log_enabled!(target: "debug4", log::Level::Debug),
        5 => log::log_enabled!(target: "debug5", log::Level::Trace),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{debug1, debug2};

    #[test]
    fn test_setup_logger() {
        setup_logger(2);
        debug1!("basic mode tx");
        debug2!("basic mode rx");
    }
}
