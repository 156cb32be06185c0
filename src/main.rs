/*
 * SPDX-FileCopyrightText: 2025 UnionTech Software Technology Co., Ltd.
 *
 * SPDX-License-Identifier: GPL-2.0-or-later
 */
mod cli;

use clap::Parser;
use cli::{Cli, MainCommand};
use secrecy::ExposeSecret;
use std::sync::atomic::Ordering;

use ipmitool_rs::commands::mc::ipmi_mc_main;
use ipmitool_rs::commands::raw::ipmi_raw_main;
use ipmitool_rs::error::IpmiResult;
use ipmitool_rs::helper::read_password_file;
use ipmitool_rs::interface::ipmi_intf_load;
use ipmitool_rs::ipmi::context::IpmiContext;
use ipmitool_rs::ipmi::intf::{CipherSuiteIds, IpmiIntf};
use ipmitool_rs::ipmi::ipmi::IPMI_BMC_SLAVE_ADDR;
use ipmitool_rs::{debug2, debug3, logging, signal, VERBOSE_LEVEL};

/// Resolve the session password from -P, -f or -E, in that priority.
fn resolve_password(cli: &Cli) -> IpmiResult<Option<String>> {
    if let Some(ref pass) = cli.global.password {
        return Ok(Some(pass.expose_secret().to_string()));
    }
    if let Some(ref path) = cli.global.password_file {
        return Ok(Some(read_password_file(&path.to_string_lossy())?));
    }
    if cli.global.password_env {
        if let Ok(pass) = std::env::var("IPMI_PASSWORD") {
            return Ok(Some(pass));
        }
        log::warn!("Unable to read password from environment");
    }
    Ok(None)
}

fn resolve_kgkey(cli: &Cli) -> Option<String> {
    if let Some(ref key) = cli.global.kg_key {
        return Some(key.expose_secret().to_string());
    }
    if cli.global.kg_env {
        if let Ok(key) = std::env::var("IPMI_KGKEY") {
            return Some(key);
        }
        log::warn!("Unable to read kg key from environment");
    }
    None
}

fn build_context(cli: &Cli, password: Option<String>) -> IpmiContext {
    let mut ctx = IpmiContext::new();

    if let Some(ref hostname) = cli.global.hostname {
        ctx.session_set_hostname(hostname.clone());
    }
    if let Some(ref username) = cli.global.username {
        ctx.session_set_username(username.clone());
    }
    ctx.session_set_password(password.as_deref());
    ctx.session_set_port(cli.global.port);
    ctx.session_set_privlvl(cli.global.privilege.to_u8());
    if let Some(ref authtype) = cli.global.authtype {
        ctx.session_set_authtype(authtype.to_u8());
    }
    if let Some(id) = cli.global.cipher_suite {
        if let Some(suite) = CipherSuiteIds::from_id(id) {
            ctx.session_set_cipher_suite_id(suite);
        }
    }
    if let Some(kg) = resolve_kgkey(cli) {
        ctx.session_set_kgkey(kg.as_bytes());
    }
    if cli.global.timeout > 0 {
        ctx.session_set_timeout(cli.global.timeout);
    }
    if cli.global.retries > 0 {
        ctx.session_set_retry(cli.global.retries);
    }

    // Local interfaces talk to the BMC at its own slave address; remote
    // sessions originate from the software ID.
    let my_addr = if cli.global.arg_addr != 0 {
        cli.global.arg_addr as u32
    } else if cli.global.interface.is_remote() {
        0
    } else {
        IPMI_BMC_SLAVE_ADDR as u32
    };
    ctx.set_my_addr(my_addr);
    ctx.set_target_lun(cli.global.target_lun);

    if cli.global.target_addr != 0 {
        ctx.set_target_addr(cli.global.target_addr as u32);
        ctx.set_target_channel(cli.global.target_channel);
        ctx.set_transit_addr(cli.global.transit_addr as u32);
        ctx.set_transit_channel(cli.global.transit_channel);
    } else if cli.global.transit_addr != 0 || cli.global.transit_channel != 0 {
        log::warn!(
            "Transit address/channel [0x{:02x}/0x{:02x}] ignored. Target address must be specified!",
            cli.global.transit_addr,
            cli.global.transit_channel
        );
    }

    debug2!(
        "Interface address: my_addr 0x{:02x} transit 0x{:02x}:{} target 0x{:02x}:{}",
        ctx.my_addr(),
        ctx.transit_addr(),
        ctx.transit_channel(),
        ctx.target_addr(),
        ctx.target_channel()
    );

    ctx
}

fn run_command(intf: &mut dyn IpmiIntf, command: MainCommand) -> IpmiResult<()> {
    match command {
        MainCommand::Raw { args } => ipmi_raw_main(intf, &args),
        MainCommand::Mc { subcmd } => ipmi_mc_main(intf, subcmd),
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => err.exit(),
    };

    VERBOSE_LEVEL.store(cli.global.verbose as usize, Ordering::Relaxed);
    logging::setup_logger(cli.global.verbose);

    if let Err(msg) = cli.validate() {
        eprintln!("{}", msg);
        std::process::exit(1);
    }

    if let Err(e) = signal::install_sigint_handler() {
        eprintln!("Unable to install SIGINT handler: {}", e);
        std::process::exit(1);
    }

    let password = match resolve_password(&cli) {
        Ok(password) => password,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let ctx = build_context(&cli, password);

    let interface = cli.global.interface.as_str();
    let devfile = cli
        .global
        .devfile
        .as_ref()
        .map(|p| p.to_string_lossy().to_string());

    let mut intf = match ipmi_intf_load(interface, ctx, cli.global.devnum, devfile.as_deref()) {
        Ok(intf) => intf,
        Err(e) => {
            eprintln!("Error loading interface {}: {}", interface, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = intf.setup() {
        eprintln!("Unable to setup interface {}: {}", interface, e);
        std::process::exit(1);
    }
    debug3!("Interface {} setup done", interface);

    if let Err(e) = intf.open() {
        eprintln!("Unable to open interface {}: {}", interface, e);
        std::process::exit(1);
    }
    debug2!("Interface {} opened", interface);

    let result = run_command(intf.as_mut(), cli.command);

    intf.close();

    let exit_code = match result {
        Ok(()) => {
            if signal::abort_requested() {
                130
            } else {
                0
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    };
    std::process::exit(exit_code);
}
