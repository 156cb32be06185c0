/*
 * SPDX-FileCopyrightText: 2025 UnionTech Software Technology Co., Ltd.
 *
 * SPDX-License-Identifier: GPL-2.0-or-later
 */

use crate::debug1;
use crate::error::{IpmiError, IpmiResult};

pub fn ipmi24toh(data: &[u8; 3]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], 0])
}

pub fn buf2str(data: &[u8], len: usize) -> String {
    data.iter()
        .take(len)
        .map(|byte| format!("{:02x}", byte))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hex dump with a caption, gated on `-v`.
pub fn printbuf(data: &[u8], caption: &str) {
    debug1!("{} ({} bytes)", caption, data.len());
    for chunk in data.chunks(16) {
        debug1!(" {}", buf2str(chunk, chunk.len()));
    }
}

/// Read a password from the first line of `path` (`-f` option).
pub fn read_password_file(path: &str) -> IpmiResult<String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| IpmiError::System(format!("Unable to read password file {}: {}", path, e)))?;
    let line = contents.lines().next().unwrap_or("");
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipmi24toh() {
        assert_eq!(ipmi24toh(&[0x7e, 0x2a, 0x00]), 0x2a7e);
        assert_eq!(ipmi24toh(&[0x01, 0x00, 0x01]), 0x010001);
    }

    #[test]
    fn test_buf2str() {
        assert_eq!(buf2str(&[0xa0, 0x20, 0x18], 3), "a0 20 18");
        assert_eq!(buf2str(&[0xa0, 0x20, 0x18], 2), "a0 20");
    }
}
