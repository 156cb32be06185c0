/*
 * SPDX-FileCopyrightText: 2025 UnionTech Software Technology Co., Ltd.
 *
 * SPDX-License-Identifier: GPL-2.0-or-later
 */

use std::collections::HashMap;
use std::fmt;

type ValStrMap = HashMap<u8, &'static str>;

pub fn val2str(val: u8, map: &ValStrMap) -> &'static str {
    map.get(&val).copied().unwrap_or("Unknown value")
}

lazy_static::lazy_static! {
    pub static ref COMPLETION_CODE_VALS: ValStrMap = {
        let mut m = HashMap::new();
        m.insert(0x00, "Command completed normally");
        m.insert(0xc0, "Node busy");
        m.insert(0xc1, "Invalid command");
        m.insert(0xc2, "Invalid command on LUN");
        m.insert(0xc3, "Timeout");
        m.insert(0xc4, "Out of space");
        m.insert(0xc5, "Reservation cancelled or invalid");
        m.insert(0xc6, "Request data truncated");
        m.insert(0xc7, "Request data length invalid");
        m.insert(0xc8, "Request data field length limit exceeded");
        m.insert(0xc9, "Parameter out of range");
        m.insert(0xca, "Cannot return number of requested data bytes");
        m.insert(0xcb, "Requested sensor, data, or record not found");
        m.insert(0xcc, "Invalid data field in request");
        m.insert(0xcd, "Command illegal for specified sensor or record type");
        m.insert(0xce, "Command response could not be provided");
        m.insert(0xcf, "Cannot execute duplicated request");
        m.insert(0xd0, "SDR Repository in update mode");
        m.insert(0xd1, "Device firmeware in update mode");
        m.insert(0xd2, "BMC initialization in progress");
        m.insert(0xd3, "Destination unavailable");
        m.insert(0xd4, "Insufficient privilege level");
        m.insert(0xd5, "Command not supported in present state");
        m.insert(0xd6, "Cannot execute command, command disabled");
        m.insert(0xff, "Unspecified error");
        m
    };
}

/// IPMI specific error types
#[derive(Debug, Clone)]
pub enum IpmiError {
    /// Interface error with message
    Interface(String),
    /// IPMI completion code error
    CompletionCode(u8),
    /// Timeout error
    Timeout,
    /// Invalid data error
    InvalidData(String),
    /// Network error
    Network(String),
    /// Authentication error
    Authentication(String),
    /// Session error
    Session(String),
    /// Command not supported
    NotSupported(String),
    /// Response error (no response received)
    ResponseError,
    /// System error (file I/O, kernel interactions)
    System(String),
}

impl fmt::Display for IpmiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpmiError::Interface(msg) => write!(f, "Interface error: {}", msg),
            IpmiError::CompletionCode(code) => write!(
                f,
                "Completion code 0x{:02x}: {}",
                code,
                val2str(*code, &COMPLETION_CODE_VALS)
            ),
            IpmiError::Timeout => write!(f, "Operation timed out"),
            IpmiError::InvalidData(msg) => write!(f, "{}", msg),
            IpmiError::Network(msg) => write!(f, "Network error: {}", msg),
            IpmiError::Authentication(msg) => write!(f, "Authentication error: {}", msg),
            IpmiError::Session(msg) => write!(f, "Session error: {}", msg),
            IpmiError::NotSupported(msg) => write!(f, "Command not supported: {}", msg),
            IpmiError::ResponseError => write!(f, "Response error: No response received"),
            // bare message, matching native ipmitool output
            IpmiError::System(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for IpmiError {}

impl From<std::io::Error> for IpmiError {
    fn from(error: std::io::Error) -> Self {
        IpmiError::System(error.to_string())
    }
}

impl From<nix::Error> for IpmiError {
    fn from(error: nix::Error) -> Self {
        IpmiError::System(error.to_string())
    }
}

pub type IpmiResult<T> = Result<T, IpmiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_code_strings() {
        assert_eq!(val2str(0x00, &COMPLETION_CODE_VALS), "Command completed normally");
        assert_eq!(val2str(0xc3, &COMPLETION_CODE_VALS), "Timeout");
        assert_eq!(val2str(0x42, &COMPLETION_CODE_VALS), "Unknown value");
    }

    #[test]
    fn test_error_display() {
        let e = IpmiError::CompletionCode(0xd4);
        assert!(e.to_string().contains("Insufficient privilege level"));
    }
}
