/*
 * SPDX-FileCopyrightText: 2025 UnionTech Software Technology Co., Ltd.
 *
 * SPDX-License-Identifier: GPL-2.0-or-later
 */

//! `mc` subcommands: Get Device ID decode and BMC warm/cold reset.

use clap::Subcommand;

use crate::error::{IpmiError, IpmiResult, COMPLETION_CODE_VALS};
use crate::helper::ipmi24toh;
use crate::ipmi::intf::IpmiIntf;
use crate::ipmi::ipmi::{
    IpmiMessage, IpmiRq, BMC_COLD_RESET, BMC_GET_DEVICE_ID, BMC_WARM_RESET, IPMI_NETFN_APP,
};

#[derive(Debug, Clone, Subcommand)]
pub enum McCommand {
    /// Get device ID and capabilities information
    Info,
    /// Reset the management controller
    Reset {
        /// Reset type: warm or cold
        reset_type: String,
    },
}

const IPM_DEV_DEVICE_ID_REV_MASK: u8 = 0x0f;
const IPM_DEV_DEVICE_ID_SDR_MASK: u8 = 0x80;
const IPM_DEV_FWREV1_AVAIL_MASK: u8 = 0x80;
const IPM_DEV_FWREV1_MAJOR_MASK: u8 = 0x7f;

/// Get Device ID response fields; the 4-byte aux firmware revision is
/// optional on the wire.
#[derive(Debug, Default, PartialEq)]
pub struct DeviceId {
    pub device_id: u8,
    pub device_revision: u8,
    pub fw_rev1: u8,
    pub fw_rev2: u8,
    pub ipmi_version: u8,
    pub adtl_device_support: u8,
    pub manufacturer_id: u32,
    pub product_id: u16,
    pub aux_fw_rev: Option<[u8; 4]>,
}

impl DeviceId {
    pub fn decode(data: &[u8]) -> IpmiResult<Self> {
        if data.len() < 11 {
            return Err(IpmiError::InvalidData(format!(
                "Get Device ID response too short: {} bytes",
                data.len()
            )));
        }
        let manufacturer_id = ipmi24toh(&[data[6], data[7], data[8]]);
        let aux_fw_rev = if data.len() >= 15 {
            Some([data[11], data[12], data[13], data[14]])
        } else {
            None
        };
        Ok(Self {
            device_id: data[0],
            device_revision: data[1],
            fw_rev1: data[2],
            fw_rev2: data[3],
            ipmi_version: data[4],
            adtl_device_support: data[5],
            manufacturer_id,
            product_id: u16::from_le_bytes([data[9], data[10]]),
            aux_fw_rev,
        })
    }

    fn format(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Device ID                 : {}\n", self.device_id));
        out.push_str(&format!(
            "Device Revision           : {}\n",
            self.device_revision & IPM_DEV_DEVICE_ID_REV_MASK
        ));
        out.push_str(&format!(
            "Firmware Revision         : {}.{:02x}\n",
            self.fw_rev1 & IPM_DEV_FWREV1_MAJOR_MASK,
            self.fw_rev2
        ));
        out.push_str(&format!(
            "IPMI Version              : {}.{}\n",
            self.ipmi_version & 0x0f,
            (self.ipmi_version & 0xf0) >> 4
        ));
        out.push_str(&format!(
            "Manufacturer ID           : {}\n",
            self.manufacturer_id
        ));
        out.push_str(&format!(
            "Manufacturer Name         : {}\n",
            manufacturer_name(self.manufacturer_id)
        ));
        out.push_str(&format!(
            "Product ID                : {} (0x{:04x})\n",
            self.product_id, self.product_id
        ));
        out.push_str(&format!(
            "Device Available          : {}\n",
            if self.fw_rev1 & IPM_DEV_FWREV1_AVAIL_MASK != 0 {
                "no"
            } else {
                "yes"
            }
        ));
        out.push_str(&format!(
            "Provides Device SDRs      : {}\n",
            if self.device_revision & IPM_DEV_DEVICE_ID_SDR_MASK != 0 {
                "yes"
            } else {
                "no"
            }
        ));
        out.push_str("Additional Device Support :\n");
        for bit in 0..8 {
            if self.adtl_device_support & (1 << bit) != 0 {
                out.push_str(&format!("    {}\n", device_support_name(bit)));
            }
        }
        if let Some(aux) = self.aux_fw_rev {
            out.push_str("Aux Firmware Rev Info     : \n");
            for b in aux {
                out.push_str(&format!("    0x{:02x}\n", b));
            }
        }
        out
    }
}

fn manufacturer_name(id: u32) -> &'static str {
    match id {
        2 => "IBM",
        15 => "Dell Inc",
        42 | 343 => "Intel Corporation",
        674 => "Dell Inc",
        2011 => "Huawei",
        5703 => "SUPERMICRO",
        10876 => "SUPERMICRO",
        _ => "Unknown",
    }
}

fn device_support_name(bit: u8) -> &'static str {
    match bit {
        0 => "Sensor Device",
        1 => "SDR Repository Device",
        2 => "SEL Device",
        3 => "FRU Inventory Device",
        4 => "IPMB Event Receiver",
        5 => "IPMB Event Generator",
        6 => "Bridge",
        7 => "Chassis Device",
        _ => "Reserved",
    }
}

fn ipmi_mc_get_device_id(intf: &mut dyn IpmiIntf) -> IpmiResult<String> {
    let req = IpmiRq {
        msg: IpmiMessage::new(IPMI_NETFN_APP, BMC_GET_DEVICE_ID),
    };
    let rsp = intf
        .sendrecv(&req)
        .ok_or_else(|| IpmiError::Interface("Get Device ID command failed".to_string()))?;
    if rsp.ccode != 0 {
        return Err(IpmiError::CompletionCode(rsp.ccode));
    }
    Ok(DeviceId::decode(&rsp.data)?.format())
}

fn ipmi_mc_reset(intf: &mut dyn IpmiIntf, reset_type: &str) -> IpmiResult<String> {
    let cmd = match reset_type {
        "warm" => BMC_WARM_RESET,
        "cold" => BMC_COLD_RESET,
        other => {
            return Err(IpmiError::InvalidData(format!(
                "Reset type must be 'warm' or 'cold', got '{}'",
                other
            )))
        }
    };
    let req = IpmiRq {
        msg: IpmiMessage::new(IPMI_NETFN_APP, cmd),
    };
    match intf.sendrecv(&req) {
        Some(rsp) if rsp.ccode != 0 => Err(IpmiError::Interface(format!(
            "MC reset command failed: {}",
            crate::error::val2str(rsp.ccode, &COMPLETION_CODE_VALS)
        ))),
        Some(_) => Ok(format!("Sent {} reset command to MC", reset_type)),
        // a cold reset kills the session before the response goes out
        None if cmd == BMC_COLD_RESET => {
            Ok(format!("Sent {} reset command to MC", reset_type))
        }
        None => Err(IpmiError::Interface(
            "MC reset command failed: no response".to_string(),
        )),
    }
}

pub fn ipmi_mc_main(intf: &mut dyn IpmiIntf, subcmd: McCommand) -> IpmiResult<()> {
    match subcmd {
        McCommand::Info => {
            print!("{}", ipmi_mc_get_device_id(intf)?);
            Ok(())
        }
        McCommand::Reset { reset_type } => {
            println!("{}", ipmi_mc_reset(intf, &reset_type)?);
            Ok(())
        }
    }
}
