/*
 * SPDX-FileCopyrightText: 2025 UnionTech Software Technology Co., Ltd.
 *
 * SPDX-License-Identifier: GPL-2.0-or-later
 */

use crate::ipmi::intf::{
    CipherSuiteIds, SessionParams, IPMI_AUTHCODE_BUFFER_SIZE, IPMI_KG_BUFFER_SIZE,
    IPMI_SESSION_AUTHTYPE_NONE,
};

pub const IPMI_DEFAULT_PAYLOAD_SIZE: u16 = 25;

/// Addressing shared by every interface type.
#[derive(Clone, Default, Debug)]
pub struct IpmiBaseContext {
    pub my_addr: u32,
    pub target_addr: u32,
    pub target_lun: u8,
    pub target_channel: u8,
}

/// Transit hop for dual bridging.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BridgingContext {
    pub transit_addr: u32,
    pub transit_channel: u8,
}

#[derive(Clone, Debug)]
pub struct ProtocolContext {
    pub max_request_data_size: u16,
    pub max_response_data_size: u16,
}

impl Default for ProtocolContext {
    fn default() -> Self {
        Self {
            max_request_data_size: IPMI_DEFAULT_PAYLOAD_SIZE,
            max_response_data_size: IPMI_DEFAULT_PAYLOAD_SIZE,
        }
    }
}

/// Per-interface state: addressing, optional bridging hop, payload limits and
/// the session parameters applied before `open()`.
#[derive(Clone, Default, Debug)]
pub struct IpmiContext {
    pub base: IpmiBaseContext,
    pub bridging: Option<BridgingContext>,
    pub protocol: ProtocolContext,
    pub ssn_params: SessionParams,
}

impl IpmiContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_bridging(&self) -> bool {
        self.bridging.is_some()
    }

    /// 0 = direct, 1 = single Send Message wrapper, 2 = dual bridging through
    /// a transit node on a different address or channel.
    pub fn get_bridging_level(&self) -> u8 {
        if self.base.target_addr > 0 && self.base.target_addr != self.base.my_addr {
            if let Some(bridging) = &self.bridging {
                if bridging.transit_addr > 0
                    && (bridging.transit_addr != self.base.target_addr
                        || bridging.transit_channel != self.base.target_channel)
                {
                    2
                } else {
                    1
                }
            } else {
                1
            }
        } else {
            0
        }
    }

    pub fn set_my_addr(&mut self, addr: u32) {
        self.base.my_addr = addr;
    }

    pub fn my_addr(&self) -> u32 {
        self.base.my_addr
    }

    pub fn set_target_addr(&mut self, addr: u32) {
        self.base.target_addr = addr;
    }

    pub fn target_addr(&self) -> u32 {
        self.base.target_addr
    }

    pub fn set_target_channel(&mut self, channel: u8) {
        self.base.target_channel = channel;
    }

    pub fn target_channel(&self) -> u8 {
        self.base.target_channel
    }

    pub fn set_target_lun(&mut self, lun: u8) {
        self.base.target_lun = lun;
    }

    pub fn target_lun(&self) -> u8 {
        self.base.target_lun
    }

    pub fn set_transit_addr(&mut self, addr: u32) {
        if addr > 0 {
            if let Some(ref mut bridging) = self.bridging {
                bridging.transit_addr = addr;
            } else {
                self.bridging = Some(BridgingContext {
                    transit_addr: addr,
                    transit_channel: 0,
                });
            }
        } else if let Some(ref mut bridging) = self.bridging {
            bridging.transit_addr = 0;
            if bridging.transit_channel == 0 {
                self.bridging = None;
            }
        }
    }

    pub fn transit_addr(&self) -> u32 {
        self.bridging.as_ref().map_or(0, |b| b.transit_addr)
    }

    pub fn set_transit_channel(&mut self, channel: u8) {
        if let Some(ref mut bridging) = self.bridging {
            bridging.transit_channel = channel;
        } else if channel > 0 {
            self.bridging = Some(BridgingContext {
                transit_addr: 0,
                transit_channel: channel,
            });
        }
    }

    pub fn transit_channel(&self) -> u8 {
        self.bridging.as_ref().map_or(0, |b| b.transit_channel)
    }

    pub fn set_max_request_data_size(&mut self, size: u16) {
        if size < IPMI_DEFAULT_PAYLOAD_SIZE {
            log::warn!(
                "Request size {} is too small, minimum is {}",
                size,
                IPMI_DEFAULT_PAYLOAD_SIZE
            );
            return;
        }
        self.protocol.max_request_data_size = size;
    }

    pub fn set_max_response_data_size(&mut self, size: u16) {
        if size < IPMI_DEFAULT_PAYLOAD_SIZE - 1 {
            log::warn!(
                "Response size {} is too small, minimum is {}",
                size,
                IPMI_DEFAULT_PAYLOAD_SIZE - 1
            );
            return;
        }
        self.protocol.max_response_data_size = size;
    }

    /// Effective request payload limit after Send Message overhead. Each
    /// bridge level costs 8 bytes (6-byte inner header, channel byte,
    /// trailing checksum).
    pub fn get_max_request_data_size(&self) -> u16 {
        let mut size = self.protocol.max_request_data_size as i16;
        let bridging_level = self.get_bridging_level();

        if size == 0 {
            size = IPMI_DEFAULT_PAYLOAD_SIZE as i16;
            if bridging_level > 0 {
                size += 8;
            }
        }

        if bridging_level > 0 {
            size -= 8;
            if size > IPMI_DEFAULT_PAYLOAD_SIZE as i16 {
                size = IPMI_DEFAULT_PAYLOAD_SIZE as i16;
            }
            if bridging_level == 2 {
                size -= 8;
            }
        }

        if size < 0 {
            return 0;
        }
        size as u16
    }

    pub fn get_max_response_data_size(&self) -> u16 {
        let mut size = self.protocol.max_response_data_size;
        let bridging_level = self.get_bridging_level();

        if size == 0 {
            size = IPMI_DEFAULT_PAYLOAD_SIZE;
            if bridging_level > 0 {
                size = size.saturating_add(8);
            }
        }

        if bridging_level > 0 {
            size = size.saturating_sub(8);
            if size > IPMI_DEFAULT_PAYLOAD_SIZE {
                size = IPMI_DEFAULT_PAYLOAD_SIZE;
            }
            if bridging_level == 2 {
                size = size.saturating_sub(8);
            }
        }

        size
    }
}

// Session parameter setters, applied from the CLI before open().
impl IpmiContext {
    pub fn session_set_hostname(&mut self, hostname: String) {
        self.ssn_params.hostname = hostname;
    }

    pub fn session_set_username(&mut self, username: String) {
        self.ssn_params.username.fill(0);
        let len = username.len().min(16);
        self.ssn_params.username[..len].copy_from_slice(&username.as_bytes()[..len]);
    }

    pub fn session_set_password(&mut self, password: Option<&str>) {
        self.ssn_params.authcode_set.fill(0);
        if let Some(pass) = password {
            self.ssn_params.password = true;
            let len = pass.len().min(IPMI_AUTHCODE_BUFFER_SIZE);
            self.ssn_params.authcode_set[..len].copy_from_slice(&pass.as_bytes()[..len]);
        } else {
            self.ssn_params.password = false;
        }
    }

    pub fn session_set_privlvl(&mut self, level: u8) {
        self.ssn_params.privlvl = level;
    }

    pub fn session_set_lookupbit(&mut self, lookupbit: u8) {
        self.ssn_params.lookupbit = lookupbit;
    }

    pub fn session_set_cipher_suite_id(&mut self, cipher_suite_id: CipherSuiteIds) {
        self.ssn_params.cipher_suite_id = cipher_suite_id;
    }

    pub fn session_set_kgkey(&mut self, kgkey: &[u8]) {
        self.ssn_params.kg[..IPMI_KG_BUFFER_SIZE.min(kgkey.len())]
            .copy_from_slice(&kgkey[..IPMI_KG_BUFFER_SIZE.min(kgkey.len())]);
    }

    pub fn session_set_port(&mut self, port: u16) {
        self.ssn_params.port = port;
    }

    pub fn session_set_authtype(&mut self, authtype: u8) {
        if authtype == IPMI_SESSION_AUTHTYPE_NONE {
            self.ssn_params.authcode_set.fill(0);
            self.ssn_params.password = false;
        }
        self.ssn_params.authtype_set = authtype;
    }

    pub fn session_set_timeout(&mut self, timeout: u32) {
        self.ssn_params.timeout = timeout;
    }

    pub fn session_set_retry(&mut self, retry: i32) {
        self.ssn_params.retry = retry;
    }
}
