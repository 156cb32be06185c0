/*
 * SPDX-FileCopyrightText: 2025 UnionTech Software Technology Co., Ltd.
 *
 * SPDX-License-Identifier: GPL-2.0-or-later
 */

use super::ipmi::*;
use crate::error::IpmiResult;
use crate::ipmi::context::IpmiContext;

/*
 * An enumeration that describes every possible session state for
 * an IPMIv2 / RMCP+ session.
 */
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LanplusSessionState {
    Presession = 0,
    OpenSessionSent,
    OpenSessionReceived,
    Rakp1Sent,
    Rakp2Received,
    Rakp3Sent,
    Active,
    CloseSent,
}

pub const IPMI_AUTHCODE_BUFFER_SIZE: usize = 20;
pub const IPMI_SIK_BUFFER_SIZE: usize = IPMI_MAX_MD_SIZE;
pub const IPMI_KG_BUFFER_SIZE: usize = 21; // key plus null byte

// Authentication type values for v1.5 sessions
pub const IPMI_SESSION_AUTHTYPE_NONE: u8 = 0x00;
pub const IPMI_SESSION_AUTHTYPE_MD2: u8 = 0x01;
pub const IPMI_SESSION_AUTHTYPE_MD5: u8 = 0x02;
pub const IPMI_SESSION_AUTHTYPE_PASSWORD: u8 = 0x04;
pub const IPMI_SESSION_AUTHTYPE_OEM: u8 = 0x05;
pub const IPMI_SESSION_AUTHTYPE_RMCP_PLUS: u8 = 0x06;

pub const IPMI_SESSION_PRIV_CALLBACK: u8 = 0x01;
pub const IPMI_SESSION_PRIV_USER: u8 = 0x02;
pub const IPMI_SESSION_PRIV_OPERATOR: u8 = 0x03;
pub const IPMI_SESSION_PRIV_ADMIN: u8 = 0x04;
pub const IPMI_SESSION_PRIV_OEM: u8 = 0x05;

pub const IPMI_LAN_PORT: u16 = 623;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CipherSuiteIds {
    IpmiLanplusCipherSuite0 = 0,
    IpmiLanplusCipherSuite1 = 1,
    IpmiLanplusCipherSuite2 = 2,
    IpmiLanplusCipherSuite3 = 3,
    IpmiLanplusCipherSuiteReserved = 0xff,
}

impl CipherSuiteIds {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::IpmiLanplusCipherSuite0),
            1 => Some(Self::IpmiLanplusCipherSuite1),
            2 => Some(Self::IpmiLanplusCipherSuite2),
            3 => Some(Self::IpmiLanplusCipherSuite3),
            _ => None,
        }
    }
}

/// Session parameters collected from the CLI before `open()`.
#[derive(Clone, Debug)]
pub struct SessionParams {
    pub hostname: String,
    pub username: [u8; 17],
    pub authcode_set: [u8; IPMI_AUTHCODE_BUFFER_SIZE + 1],
    pub authtype_set: u8,
    pub privlvl: u8,
    pub cipher_suite_id: CipherSuiteIds,
    pub password: bool,
    pub port: u16,
    pub retry: i32,
    pub timeout: u32,
    pub kg: [u8; IPMI_KG_BUFFER_SIZE],
    pub lookupbit: u8,
}

impl Default for SessionParams {
    fn default() -> Self {
        SessionParams {
            hostname: String::new(),
            username: [0u8; 17],
            authcode_set: [0u8; IPMI_AUTHCODE_BUFFER_SIZE + 1],
            authtype_set: 0,
            privlvl: 0,
            cipher_suite_id: CipherSuiteIds::IpmiLanplusCipherSuite3,
            password: false,
            port: 0,
            retry: 0,
            timeout: 0,
            kg: [0u8; IPMI_KG_BUFFER_SIZE],
            lookupbit: 0,
        }
    }
}

pub const IPMI_AUTHSTATUS_PER_MSG_DISABLED: u8 = 0x10;
pub const IPMI_AUTHSTATUS_PER_USER_DISABLED: u8 = 0x08;
pub const IPMI_AUTHSTATUS_NONNULL_USERS_ENABLED: u8 = 0x04;
pub const IPMI_AUTHSTATUS_NULL_USERS_ENABLED: u8 = 0x02;
pub const IPMI_AUTHSTATUS_ANONYMOUS_USERS_ENABLED: u8 = 0x01;

/// Transport driver contract. One driver instance per process, state machine
/// CLOSED -> OPEN -> CLOSED, at most one in-flight request.
pub trait IpmiIntf {
    fn context(&mut self) -> &mut IpmiContext;

    fn setup(&mut self) -> IpmiResult<()>;
    fn open(&mut self) -> IpmiResult<()>;
    fn close(&mut self);

    /// Send one request and wait for the correlated response. `None` means
    /// no response arrived within the retry budget.
    fn sendrecv(&mut self, req: &IpmiRq) -> Option<IpmiRs>;

    fn keepalive(&mut self) -> IpmiResult<()>;

    fn set_my_addr(&mut self, addr: u8) -> IpmiResult<()>;

    // lan/lanplus override these; serial and bmc keep the defaults
    fn set_max_request_size(&mut self, _size: u16) {}
    fn set_max_response_size(&mut self, _size: u16) {}
}
