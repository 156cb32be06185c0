/*
 * SPDX-FileCopyrightText: 2025 UnionTech Software Technology Co., Ltd.
 *
 * SPDX-License-Identifier: GPL-2.0-or-later
 */

//! Shared plumbing for the two IPMI-over-serial drivers: `-D` device spec
//! parsing, raw 8N1 termios setup and the bounded readable-wait.

pub mod basic;
pub mod terminal;

use nix::errno::Errno;
use nix::sys::select::{select, FdSet};
use nix::sys::termios::{
    cfsetispeed, cfsetospeed, tcflush, tcgetattr, tcsetattr, BaudRate, ControlFlags, FlushArg,
    InputFlags, LocalFlags, OutputFlags, SetArg, SpecialCharacterIndices,
};
use nix::sys::time::TimeVal;
use std::fs::File;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::time::Duration;

use crate::debug2;
use crate::error::{IpmiError, IpmiResult};

pub const SERIAL_DEFAULT_RETRY: i32 = 5;
pub const SERIAL_DEFAULT_TIMEOUT: u32 = 5;

/// Parsed `-D device:baud[:S]` spec. The trailing `S` marks the remote end
/// as a system interface reached through the BMC's receive-message queue.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialSpec {
    pub device: String,
    pub baud: BaudRate,
    pub is_system: bool,
}

pub fn parse_spec(spec: &str) -> IpmiResult<SerialSpec> {
    let mut parts = spec.split(':');
    let device = parts
        .next()
        .filter(|d| !d.is_empty())
        .ok_or_else(|| IpmiError::Interface(format!("Invalid serial device spec: {}", spec)))?
        .to_string();

    let baud = match parts.next() {
        None | Some("") => BaudRate::B9600,
        Some(rate) => match rate {
            "2400" => BaudRate::B2400,
            "9600" => BaudRate::B9600,
            "19200" => BaudRate::B19200,
            "38400" => BaudRate::B38400,
            "57600" => BaudRate::B57600,
            "115200" => BaudRate::B115200,
            other => {
                return Err(IpmiError::Interface(format!(
                    "Invalid baud rate specified: {}",
                    other
                )))
            }
        },
    };

    let is_system = match parts.next() {
        None | Some("") => false,
        Some("S") | Some("s") => true,
        Some(other) => {
            return Err(IpmiError::Interface(format!(
                "Invalid serial device option: {}",
                other
            )))
        }
    };

    Ok(SerialSpec {
        device,
        baud,
        is_system,
    })
}

/// Open the tty and configure raw 8N1 with the requested rate.
pub fn open_serial(spec: &SerialSpec) -> IpmiResult<File> {
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(&spec.device)
        .map_err(|e| IpmiError::System(format!("Error open serial port {}: {}", spec.device, e)))?;

    let mut termios = tcgetattr(&file)?;
    cfsetispeed(&mut termios, spec.baud)?;
    cfsetospeed(&mut termios, spec.baud)?;

    termios.control_flags |= ControlFlags::CLOCAL | ControlFlags::CREAD;
    termios.control_flags &=
        !(ControlFlags::PARENB | ControlFlags::CSTOPB | ControlFlags::CSIZE);
    termios.control_flags |= ControlFlags::CS8;
    termios.input_flags = InputFlags::empty();
    termios.output_flags = OutputFlags::empty();
    termios.local_flags = LocalFlags::empty();
    termios.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
    termios.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

    tcsetattr(&file, SetArg::TCSANOW, &termios)?;
    let _ = tcflush(&file, FlushArg::TCIOFLUSH);

    debug2!("Opened serial device {}", spec.device);
    Ok(file)
}

/// Drop any pending inbound bytes (used after a Terminal-Mode NACK).
pub fn flush_input(file: &File) {
    let _ = tcflush(file, FlushArg::TCIFLUSH);
}

/// Bounded wait for readable data. Returns false on timeout. Restarts on
/// EINTR with the remaining time, so SIGINT is observed by the caller's
/// abort check rather than here.
pub fn wait_readable(file: &File, timeout: Duration) -> IpmiResult<bool> {
    let fd = file.as_raw_fd();
    let borrowfd = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
    let mut timeval = TimeVal::new(
        timeout.as_secs() as nix::sys::time::time_t,
        timeout.subsec_micros() as nix::sys::time::suseconds_t,
    );

    loop {
        let mut fd_set = FdSet::new();
        fd_set.insert(borrowfd);
        match select(fd + 1, &mut fd_set, None, None, Some(&mut timeval)) {
            Ok(0) => return Ok(false),
            Ok(_) => return Ok(fd_set.contains(borrowfd)),
            Err(Errno::EINTR) => {
                if crate::signal::abort_requested() {
                    return Ok(false);
                }
                continue;
            }
            Err(e) => return Err(IpmiError::System(format!("select() error: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spec_full() {
        let spec = parse_spec("/dev/ttyS0:57600:S").unwrap();
        assert_eq!(spec.device, "/dev/ttyS0");
        assert_eq!(spec.baud, BaudRate::B57600);
        assert!(spec.is_system);
    }

    #[test]
    fn test_parse_spec_defaults() {
        let spec = parse_spec("/dev/ttyUSB1").unwrap();
        assert_eq!(spec.device, "/dev/ttyUSB1");
        assert_eq!(spec.baud, BaudRate::B9600);
        assert!(!spec.is_system);
    }

    #[test]
    fn test_parse_spec_rejects_bad_input() {
        assert!(parse_spec("").is_err());
        assert!(parse_spec("/dev/ttyS0:12345").is_err());
        assert!(parse_spec("/dev/ttyS0:9600:X").is_err());
    }
}
