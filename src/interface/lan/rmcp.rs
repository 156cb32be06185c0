/*
 * SPDX-FileCopyrightText: 2025 UnionTech Software Technology Co., Ltd.
 *
 * SPDX-License-Identifier: GPL-2.0-or-later
 */

//! RMCP framing for IPMI-over-LAN. Every v1.5 session packet starts with
//! this 4-byte header; ASF ping/pong is used as a presence check before
//! session activation.

pub const RMCP_VERSION_1: u8 = 0x06;
pub const RMCP_UDP_PORT: u16 = 623;

pub const RMCP_CLASS_MASK: u8 = 0x1f;
pub const RMCP_CLASS_ASF: u8 = 0x06;
pub const RMCP_CLASS_IPMI: u8 = 0x07;

pub const RMCP_HDR_LEN: usize = 4;

const ASF_IANA: u32 = 0x000011be;
const ASF_TYPE_PING: u8 = 0x80;
const ASF_TYPE_PONG: u8 = 0x81;

#[derive(Debug, Clone, Copy)]
pub struct RmcpHeader {
    pub version: u8,
    pub reserved: u8,
    pub sequence: u8,
    pub class: u8,
}

impl RmcpHeader {
    /// IPMI-class messages carry sequence 0xff (no RMCP ack requested).
    pub fn new_ipmi() -> Self {
        Self {
            version: RMCP_VERSION_1,
            reserved: 0,
            sequence: 0xff,
            class: RMCP_CLASS_IPMI,
        }
    }

    pub fn new_asf(sequence: u8) -> Self {
        Self {
            version: RMCP_VERSION_1,
            reserved: 0,
            sequence,
            class: RMCP_CLASS_ASF,
        }
    }

    pub fn to_bytes(self) -> [u8; 4] {
        [self.version, self.reserved, self.sequence, self.class]
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < RMCP_HDR_LEN || data[0] != RMCP_VERSION_1 {
            return None;
        }
        Some(Self {
            version: data[0],
            reserved: data[1],
            sequence: data[2],
            class: data[3],
        })
    }

    pub fn is_ipmi(&self) -> bool {
        (self.class & RMCP_CLASS_MASK) == RMCP_CLASS_IPMI
    }

    pub fn is_asf(&self) -> bool {
        (self.class & RMCP_CLASS_MASK) == RMCP_CLASS_ASF
    }
}

/// ASF Presence Ping datagram.
pub fn build_asf_ping(tag: u8) -> Vec<u8> {
    let mut packet = Vec::with_capacity(12);
    packet.extend_from_slice(&RmcpHeader::new_asf(0xff).to_bytes());
    packet.extend_from_slice(&ASF_IANA.to_le_bytes());
    packet.push(ASF_TYPE_PING);
    packet.push(tag);
    packet.push(0);
    packet.push(0);
    packet
}

/// True when `data` is a Presence Pong answering our `tag`.
pub fn is_asf_pong(data: &[u8], tag: u8) -> bool {
    let Some(rmcp) = RmcpHeader::from_bytes(data) else {
        return false;
    };
    rmcp.is_asf() && data.len() >= 12 && data[8] == ASF_TYPE_PONG && data[9] == tag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipmi_header_bytes() {
        assert_eq!(RmcpHeader::new_ipmi().to_bytes(), [0x06, 0x00, 0xff, 0x07]);
    }

    #[test]
    fn test_header_class_checks() {
        let hdr = RmcpHeader::from_bytes(&[0x06, 0x00, 0xff, 0x07]).unwrap();
        assert!(hdr.is_ipmi());
        assert!(!hdr.is_asf());
        assert!(RmcpHeader::from_bytes(&[0x05, 0x00, 0xff, 0x07]).is_none());
        assert!(RmcpHeader::from_bytes(&[0x06, 0x00]).is_none());
    }

    #[test]
    fn test_ping_pong_exchange() {
        let ping = build_asf_ping(0x37);
        assert_eq!(ping.len(), 12);
        assert_eq!(&ping[0..4], &[0x06, 0x00, 0xff, 0x06]);
        assert_eq!(ping[8], ASF_TYPE_PING);

        let mut pong = ping.clone();
        pong[8] = ASF_TYPE_PONG;
        pong.extend_from_slice(&[0u8; 16]);
        assert!(is_asf_pong(&pong, 0x37));
        assert!(!is_asf_pong(&pong, 0x38));
        assert!(!is_asf_pong(&ping, 0x37));
    }
}
