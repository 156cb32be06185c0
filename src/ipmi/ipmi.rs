/*
 * SPDX-FileCopyrightText: 2025 UnionTech Software Technology Co., Ltd.
 *
 * SPDX-License-Identifier: GPL-2.0-or-later
 */

use std::fmt;

pub const IPMI_BUF_SIZE: usize = 1024;
pub const IPMI_MAX_MD_SIZE: usize = 0x20;

// IPMI Payload Types
pub const IPMI_PAYLOAD_TYPE_IPMI: u8 = 0x00;
pub const IPMI_PAYLOAD_TYPE_RMCP_OPEN_REQUEST: u8 = 0x10;
pub const IPMI_PAYLOAD_TYPE_RMCP_OPEN_RESPONSE: u8 = 0x11;
pub const IPMI_PAYLOAD_TYPE_RAKP_1: u8 = 0x12;
pub const IPMI_PAYLOAD_TYPE_RAKP_2: u8 = 0x13;
pub const IPMI_PAYLOAD_TYPE_RAKP_3: u8 = 0x14;
pub const IPMI_PAYLOAD_TYPE_RAKP_4: u8 = 0x15;

/// Outbound request: 6-bit netfn, command byte, target LUN and owned payload.
#[derive(Default, Clone)]
pub struct IpmiMessage {
    pub netfn_lun: u8, // netfn in bits 7..2, lun in bits 1..0
    pub cmd: u8,
    pub data: Vec<u8>,
}

#[derive(Default, Clone)]
pub struct IpmiRq {
    pub msg: IpmiMessage,
}

impl IpmiMessage {
    pub fn new(netfn: u8, cmd: u8) -> Self {
        Self {
            netfn_lun: netfn << 2,
            cmd,
            data: Vec::new(),
        }
    }

    pub fn netfn(&self) -> u8 {
        self.netfn_lun >> 2
    }

    pub fn lun(&self) -> u8 {
        self.netfn_lun & 0b11
    }

    pub fn netfn_mut(&mut self, val: u8) {
        self.netfn_lun = (val << 2) | (self.netfn_lun & 0b11);
    }

    pub fn lun_mut(&mut self, val: u8) {
        self.netfn_lun = (self.netfn_lun & 0b11111100) | (val & 0b11);
    }
}

impl fmt::Debug for IpmiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpmiMessage")
            .field("netfn", &self.netfn())
            .field("lun", &self.lun())
            .field("cmd", &self.cmd)
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// Inbound response, returned by value from `sendrecv`.
#[derive(Default, Clone)]
pub struct IpmiRs {
    pub ccode: u8,
    pub data: Vec<u8>,
    pub msg: IpmiRsMsg,
    pub session: IpmiSession,
}

impl IpmiRs {
    #[inline]
    pub fn fail(&self) -> bool {
        self.ccode != 0
    }

    #[inline]
    pub fn ok(&self) -> bool {
        self.ccode == 0
    }
}

#[derive(Default, Clone)]
pub struct IpmiRsMsg {
    pub netfn: u8,
    pub cmd: u8,
    pub seq: u8,
    pub lun: u8,
}

/// Session fields echoed from the wire header (LAN / RMCP+ paths).
#[derive(Default, Clone)]
pub struct IpmiSession {
    pub authtype: u8,
    pub seq: u32,
    pub id: u32,
    pub b_encrypted: u8,     // IPMI v2 only
    pub b_authenticated: u8, // IPMI v2 only
    pub payloadtype: u8,     // IPMI v2 only
    pub msglen: u16,
}

// Network Function Codes
pub const IPMI_NETFN_CHASSIS: u8 = 0x0;
pub const IPMI_NETFN_BRIDGE: u8 = 0x2;
pub const IPMI_NETFN_SE: u8 = 0x4;
pub const IPMI_NETFN_APP: u8 = 0x6;
pub const IPMI_NETFN_FIRMWARE: u8 = 0x8;
pub const IPMI_NETFN_STORAGE: u8 = 0xa;
pub const IPMI_NETFN_TRANSPORT: u8 = 0xc;

pub const IPMI_BMC_SLAVE_ADDR: u8 = 0x20;
pub const IPMI_REMOTE_SWID: u8 = 0x81;

// App commands used by the transport layer itself
pub const BMC_GET_DEVICE_ID: u8 = 0x01;
pub const BMC_COLD_RESET: u8 = 0x02;
pub const BMC_WARM_RESET: u8 = 0x03;
pub const IPMI_GET_MESSAGE: u8 = 0x33;
pub const IPMI_SEND_MESSAGE: u8 = 0x34;
pub const IPMI_GET_CHANNEL_AUTH_CAP: u8 = 0x38;
pub const IPMI_GET_SESSION_CHALLENGE: u8 = 0x39;
pub const IPMI_ACTIVATE_SESSION: u8 = 0x3a;
pub const IPMI_SET_SESSION_PRIVLVL: u8 = 0x3b;
pub const IPMI_CLOSE_SESSION: u8 = 0x3c;
pub const IPMI_GET_CHANNEL_CIPHER_SUITES: u8 = 0x54;

/*
 * CC
 * See IPMI specification table 5-2 Generic Completion Codes
 */
pub const IPMI_CC_OK: u8 = 0x00;
pub const IPMI_CC_NODE_BUSY: u8 = 0xc0;
pub const IPMI_CC_INV_CMD: u8 = 0xc1;
pub const IPMI_CC_TIMEOUT: u8 = 0xc3;
pub const IPMI_CC_REQ_DATA_INV_LENGTH: u8 = 0xc7;
pub const IPMI_CC_PARAM_OUT_OF_RANGE: u8 = 0xc9;
pub const IPMI_CC_REQ_DATA_NOT_PRESENT: u8 = 0xcb;
pub const IPMI_CC_INV_DATA_FIELD_IN_REQ: u8 = 0xcc;
pub const IPMI_CC_DESTINATION_UNAVAILABLE: u8 = 0xd3;
pub const IPMI_CC_INSUFFICIENT_PRIVILEGES: u8 = 0xd4;
pub const IPMI_CC_UNSPECIFIED_ERROR: u8 = 0xff;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_netfn_lun_packing() {
        let mut msg = IpmiMessage::new(IPMI_NETFN_APP, BMC_GET_DEVICE_ID);
        assert_eq!(msg.netfn_lun, 0x18);
        assert_eq!(msg.netfn(), 0x06);
        assert_eq!(msg.lun(), 0);

        msg.lun_mut(0x3);
        assert_eq!(msg.netfn(), 0x06);
        assert_eq!(msg.lun(), 0x3);

        msg.netfn_mut(IPMI_NETFN_STORAGE);
        assert_eq!(msg.netfn_lun, (0x0a << 2) | 0x3);
    }
}
