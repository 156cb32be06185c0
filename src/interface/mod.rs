/*
 * SPDX-FileCopyrightText: 2025 UnionTech Software Technology Co., Ltd.
 *
 * SPDX-License-Identifier: GPL-2.0-or-later
 */

pub mod bmc;
pub mod lan;
pub mod lanplus;
pub mod serial;

use crate::error::{IpmiError, IpmiResult};
use crate::ipmi::context::IpmiContext;
use crate::ipmi::intf::IpmiIntf;

/// Instantiate the driver selected by `-I`. The serial variants require a
/// `-D device:baud[:S]` spec.
pub fn ipmi_intf_load(
    name: &str,
    ctx: IpmiContext,
    devnum: u8,
    devfile: Option<&str>,
) -> IpmiResult<Box<dyn IpmiIntf>> {
    match name {
        "bmc" | "open" => Ok(Box::new(bmc::BmcIntf::new(devnum, ctx))),
        "serial-basic" => {
            let spec = devfile.ok_or_else(|| {
                IpmiError::Interface("serial-basic requires -D device:baud[:S]".to_string())
            })?;
            Ok(Box::new(serial::basic::SerialBasicIntf::new(spec, ctx)?))
        }
        "serial-terminal" => {
            let spec = devfile.ok_or_else(|| {
                IpmiError::Interface("serial-terminal requires -D device:baud[:S]".to_string())
            })?;
            Ok(Box::new(serial::terminal::SerialTerminalIntf::new(
                spec, ctx,
            )?))
        }
        "lan" => Ok(Box::new(lan::lan::LanIntf::new(ctx))),
        "lanplus" => Ok(Box::new(lanplus::LanplusIntf::new(ctx))),
        other => Err(IpmiError::NotSupported(format!(
            "Interface {} not supported",
            other
        ))),
    }
}
