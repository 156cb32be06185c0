/*
 * SPDX-FileCopyrightText: 2025 UnionTech Software Technology Co., Ltd.
 *
 * SPDX-License-Identifier: GPL-2.0-or-later
 */

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::IpmiResult;

lazy_static::lazy_static! {
    /// Set by the SIGINT handler. Drivers watching this flag truncate their
    /// retry budget to one attempt and close the session before exit.
    pub static ref ABORT_FLAG: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
}

extern "C" fn handle_sigint(_sig: libc::c_int) {
    ABORT_FLAG.store(true, Ordering::SeqCst);
}

pub fn install_sigint_handler() -> IpmiResult<()> {
    let action = SigAction::new(
        SigHandler::Handler(handle_sigint),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        signal::sigaction(Signal::SIGINT, &action)?;
    }
    Ok(())
}

pub fn abort_requested() -> bool {
    ABORT_FLAG.load(Ordering::SeqCst)
}
