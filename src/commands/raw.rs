/*
 * SPDX-FileCopyrightText: 2025 UnionTech Software Technology Co., Ltd.
 *
 * SPDX-License-Identifier: GPL-2.0-or-later
 */

//! `raw <netfn> <cmd> [data..]`: send an arbitrary request and dump the
//! response bytes.

use crate::error::{IpmiError, IpmiResult};
use crate::helper::printbuf;
use crate::ipmi::intf::IpmiIntf;
use crate::ipmi::ipmi::{IpmiMessage, IpmiRq};

/// Accepts `0x`-prefixed hex or plain decimal, like the C tool's strtol.
pub fn parse_byte_arg(arg: &str) -> IpmiResult<u8> {
    let parsed = if let Some(hex) = arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16)
    } else {
        arg.parse::<u8>()
    };
    parsed.map_err(|_| IpmiError::InvalidData(format!("Given byte value \"{}\" is invalid", arg)))
}

/// Response bytes, space separated, sixteen per line.
pub fn format_response(data: &[u8]) -> String {
    let mut out = String::new();
    for (i, b) in data.iter().enumerate() {
        if i % 16 == 0 && i != 0 {
            out.push('\n');
        }
        out.push_str(&format!(" {:02x}", b));
    }
    if !data.is_empty() {
        out.push('\n');
    }
    out
}

pub fn ipmi_raw_main(intf: &mut dyn IpmiIntf, args: &[String]) -> IpmiResult<()> {
    if args.len() < 2 {
        return Err(IpmiError::InvalidData(
            "raw requires <netfn> and <cmd>".to_string(),
        ));
    }
    let netfn = parse_byte_arg(&args[0])?;
    let cmd = parse_byte_arg(&args[1])?;
    let data = args[2..]
        .iter()
        .map(|a| parse_byte_arg(a))
        .collect::<IpmiResult<Vec<u8>>>()?;

    let mut req = IpmiRq {
        msg: IpmiMessage::new(netfn, cmd),
    };
    req.msg.data = data;
    printbuf(&req.msg.data, "send raw request data");

    let rsp = intf.sendrecv(&req).ok_or_else(|| {
        IpmiError::Interface(format!(
            "Unable to send RAW command (channel=0x0 netfn=0x{:x} cmd=0x{:x})",
            netfn, cmd
        ))
    })?;
    if rsp.ccode != 0 {
        return Err(IpmiError::CompletionCode(rsp.ccode));
    }
    print!("{}", format_response(&rsp.data));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_byte_arg() {
        assert_eq!(parse_byte_arg("0x2e").unwrap(), 0x2e);
        assert_eq!(parse_byte_arg("0X0A").unwrap(), 0x0a);
        assert_eq!(parse_byte_arg("6").unwrap(), 6);
        assert_eq!(parse_byte_arg("255").unwrap(), 255);
        assert!(parse_byte_arg("0x100").is_err());
        assert!(parse_byte_arg("xyz").is_err());
    }

    #[test]
    fn test_format_response_wraps_at_sixteen() {
        assert_eq!(format_response(&[]), "");
        assert_eq!(format_response(&[0x20, 0x01]), " 20 01\n");
        let data: Vec<u8> = (0..18).collect();
        let text = format_response(&data);
        let lines: Vec<&str> = text.trim_end().split('\n').collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].split_whitespace().count(), 16);
        assert_eq!(lines[1].split_whitespace().count(), 2);
    }
}
