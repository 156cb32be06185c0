/*
 * SPDX-FileCopyrightText: 2025 UnionTech Software Technology Co., Ltd.
 *
 * SPDX-License-Identifier: GPL-2.0-or-later
 */

//! v1.5 per-message authentication codes: MD5 and straight-password, plus
//! the negotiation that picks the strongest mutually supported type.

use md5::{Digest, Md5};

use crate::error::{IpmiError, IpmiResult};
use crate::ipmi::intf::{
    IPMI_SESSION_AUTHTYPE_MD2, IPMI_SESSION_AUTHTYPE_MD5, IPMI_SESSION_AUTHTYPE_NONE,
    IPMI_SESSION_AUTHTYPE_OEM, IPMI_SESSION_AUTHTYPE_PASSWORD,
};

pub const IPMI_AUTHCODE_LEN: usize = 16;

pub fn auth_type_name(authtype: u8) -> &'static str {
    match authtype {
        IPMI_SESSION_AUTHTYPE_NONE => "NONE",
        IPMI_SESSION_AUTHTYPE_MD2 => "MD2",
        IPMI_SESSION_AUTHTYPE_MD5 => "MD5",
        IPMI_SESSION_AUTHTYPE_PASSWORD => "PASSWORD",
        IPMI_SESSION_AUTHTYPE_OEM => "OEM",
        _ => "UNKNOWN",
    }
}

/// Pad or truncate a password to the fixed 16-byte key the v1.5 algorithms
/// operate on.
pub fn pad_password(password: &[u8]) -> [u8; IPMI_AUTHCODE_LEN] {
    let mut key = [0u8; IPMI_AUTHCODE_LEN];
    let take = password
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(password.len())
        .min(IPMI_AUTHCODE_LEN);
    key[..take].copy_from_slice(&password[..take]);
    key
}

/// Authcode for one session packet.
///
/// MD5: H(password . session_id . msg . session_seq . password) with the
/// 32-bit fields little-endian. PASSWORD is the padded password itself.
pub fn lan_authcode(
    authtype: u8,
    password: &[u8; IPMI_AUTHCODE_LEN],
    session_id: u32,
    session_seq: u32,
    msg: &[u8],
) -> IpmiResult<[u8; IPMI_AUTHCODE_LEN]> {
    match authtype {
        IPMI_SESSION_AUTHTYPE_NONE => Ok([0u8; IPMI_AUTHCODE_LEN]),
        IPMI_SESSION_AUTHTYPE_PASSWORD => Ok(*password),
        IPMI_SESSION_AUTHTYPE_MD5 => {
            let mut md5 = Md5::new();
            md5.update(password);
            md5.update(session_id.to_le_bytes());
            md5.update(msg);
            md5.update(session_seq.to_le_bytes());
            md5.update(password);
            let digest = md5.finalize();
            let mut authcode = [0u8; IPMI_AUTHCODE_LEN];
            authcode.copy_from_slice(&digest);
            Ok(authcode)
        }
        other => Err(IpmiError::Authentication(format!(
            "Authentication type {} not supported",
            auth_type_name(other)
        ))),
    }
}

/// Choose the session authtype from the Get Channel Authentication
/// Capabilities support mask. A type forced with `-A` must be supported by
/// the BMC; otherwise prefer MD5, then straight password, then none.
pub fn pick_authtype(auth_support: u8, forced: Option<u8>, have_password: bool) -> IpmiResult<u8> {
    let supported = |t: u8| match t {
        IPMI_SESSION_AUTHTYPE_NONE => auth_support & 0x01 != 0,
        IPMI_SESSION_AUTHTYPE_MD2 => auth_support & 0x02 != 0,
        IPMI_SESSION_AUTHTYPE_MD5 => auth_support & 0x04 != 0,
        IPMI_SESSION_AUTHTYPE_PASSWORD => auth_support & 0x10 != 0,
        IPMI_SESSION_AUTHTYPE_OEM => auth_support & 0x20 != 0,
        _ => false,
    };

    if let Some(forced) = forced {
        if !supported(forced) {
            return Err(IpmiError::Authentication(format!(
                "Authentication type {} not supported by BMC",
                auth_type_name(forced)
            )));
        }
        return Ok(forced);
    }

    if have_password {
        if supported(IPMI_SESSION_AUTHTYPE_MD5) {
            return Ok(IPMI_SESSION_AUTHTYPE_MD5);
        }
        if supported(IPMI_SESSION_AUTHTYPE_PASSWORD) {
            return Ok(IPMI_SESSION_AUTHTYPE_PASSWORD);
        }
    }
    if supported(IPMI_SESSION_AUTHTYPE_NONE) {
        return Ok(IPMI_SESSION_AUTHTYPE_NONE);
    }
    Err(IpmiError::Authentication(
        "No supported authentication type found".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_password_truncates_and_zero_fills() {
        let key = pad_password(b"secret");
        assert_eq!(&key[..6], b"secret");
        assert_eq!(&key[6..], &[0u8; 10]);

        let long = pad_password(b"0123456789abcdefXYZ");
        assert_eq!(&long, b"0123456789abcdef");

        // NUL-terminated fixed buffers stop at the terminator
        assert_eq!(pad_password(b"pw\0\0\0"), pad_password(b"pw"));
    }

    #[test]
    fn test_password_authcode_is_padded_password() {
        let key = pad_password(b"admin");
        let code =
            lan_authcode(IPMI_SESSION_AUTHTYPE_PASSWORD, &key, 0x1234, 7, &[0x20]).unwrap();
        assert_eq!(code, key);
    }

    #[test]
    fn test_md5_authcode_depends_on_sequence() {
        let key = pad_password(b"admin");
        let msg = [0x20, 0x18, 0xc8, 0x81, 0x00, 0x01, 0x7e];
        let a = lan_authcode(IPMI_SESSION_AUTHTYPE_MD5, &key, 0x0200, 1, &msg).unwrap();
        let b = lan_authcode(IPMI_SESSION_AUTHTYPE_MD5, &key, 0x0200, 2, &msg).unwrap();
        let a2 = lan_authcode(IPMI_SESSION_AUTHTYPE_MD5, &key, 0x0200, 1, &msg).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, a2);
    }

    #[test]
    fn test_md2_is_rejected() {
        let key = pad_password(b"admin");
        assert!(lan_authcode(IPMI_SESSION_AUTHTYPE_MD2, &key, 0, 0, &[]).is_err());
    }

    #[test]
    fn test_pick_authtype_prefers_md5() {
        // BMC supports NONE | MD5 | PASSWORD
        let support = 0x01 | 0x04 | 0x10;
        assert_eq!(
            pick_authtype(support, None, true).unwrap(),
            IPMI_SESSION_AUTHTYPE_MD5
        );
        assert_eq!(
            pick_authtype(0x01 | 0x10, None, true).unwrap(),
            IPMI_SESSION_AUTHTYPE_PASSWORD
        );
        assert_eq!(
            pick_authtype(support, None, false).unwrap(),
            IPMI_SESSION_AUTHTYPE_NONE
        );
    }

    #[test]
    fn test_pick_authtype_forced_must_be_supported() {
        assert_eq!(
            pick_authtype(0x10, Some(IPMI_SESSION_AUTHTYPE_PASSWORD), true).unwrap(),
            IPMI_SESSION_AUTHTYPE_PASSWORD
        );
        assert!(pick_authtype(0x10, Some(IPMI_SESSION_AUTHTYPE_MD5), true).is_err());
    }
}
