/*
 * SPDX-FileCopyrightText: 2025 UnionTech Software Technology Co., Ltd.
 *
 * SPDX-License-Identifier: GPL-2.0-or-later
 */

//! RAKP keying material and the AES-CBC-128 confidentiality algorithm.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

use crate::error::{IpmiError, IpmiResult};

pub type HmacSha1 = Hmac<Sha1>;

pub const SHA1_DIGEST_LEN: usize = 20;
pub const SHA1_96_AUTHCODE_LEN: usize = 12;
pub const AES_BLOCK_LEN: usize = 16;

/// Constant-time MAC comparison; length mismatch is an immediate reject.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

pub fn hmac_sha1(key: &[u8], data: &[u8]) -> IpmiResult<[u8; SHA1_DIGEST_LEN]> {
    let mut mac = <HmacSha1 as Mac>::new_from_slice(key)
        .map_err(|_| IpmiError::Authentication("Invalid HMAC key".to_string()))?;
    mac.update(data);
    let bytes = mac.finalize().into_bytes();
    let mut out = [0u8; SHA1_DIGEST_LEN];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// HMAC-SHA1-96: the full digest truncated to 12 bytes, used for packet
/// integrity and the RAKP4 check value.
pub fn hmac_sha1_96(key: &[u8], data: &[u8]) -> IpmiResult<[u8; SHA1_96_AUTHCODE_LEN]> {
    let full = hmac_sha1(key, data)?;
    let mut out = [0u8; SHA1_96_AUTHCODE_LEN];
    out.copy_from_slice(&full[..SHA1_96_AUTHCODE_LEN]);
    Ok(out)
}

/// SIK = HMAC_KG(Rm | Rc | RoleM | ULen | UName). KG is the BMC key when
/// one is configured, otherwise the user password.
pub fn derive_sik(
    kg: &[u8],
    rand_console: &[u8; 16],
    rand_bmc: &[u8; 16],
    role: u8,
    username: &[u8],
) -> IpmiResult<[u8; SHA1_DIGEST_LEN]> {
    let mut input = Vec::with_capacity(34 + username.len());
    input.extend_from_slice(rand_console);
    input.extend_from_slice(rand_bmc);
    input.push(role);
    input.push(username.len() as u8);
    input.extend_from_slice(username);
    hmac_sha1(kg, &input)
}

/// K1/K2 from the SIK over the IPMI 2.0 constant strings.
pub fn derive_k1_k2(
    sik: &[u8; SHA1_DIGEST_LEN],
) -> IpmiResult<([u8; SHA1_DIGEST_LEN], [u8; SHA1_DIGEST_LEN])> {
    let k1 = hmac_sha1(sik, &[0x01u8; SHA1_DIGEST_LEN])?;
    let k2 = hmac_sha1(sik, &[0x02u8; SHA1_DIGEST_LEN])?;
    Ok((k1, k2))
}

/// AES-CBC-128 keys are the first 128 bits of K2.
pub fn aes_key_from_k2(k2: &[u8; SHA1_DIGEST_LEN]) -> [u8; AES_BLOCK_LEN] {
    let mut out = [0u8; AES_BLOCK_LEN];
    out.copy_from_slice(&k2[..AES_BLOCK_LEN]);
    out
}

/// CBC encryption without padding; the caller pads to the block size.
pub fn aes128_cbc_encrypt(
    key: &[u8; AES_BLOCK_LEN],
    iv: &[u8; AES_BLOCK_LEN],
    plaintext: &[u8],
) -> IpmiResult<Vec<u8>> {
    if plaintext.len() % AES_BLOCK_LEN != 0 {
        return Err(IpmiError::Authentication(
            "AES-CBC plaintext length must be a multiple of 16".to_string(),
        ));
    }
    let cipher = Aes128::new_from_slice(key)
        .map_err(|_| IpmiError::Authentication("Invalid AES-128 key".to_string()))?;

    let mut out = Vec::with_capacity(plaintext.len());
    let mut prev = *iv;
    for block in plaintext.chunks(AES_BLOCK_LEN) {
        let mut xored = [0u8; AES_BLOCK_LEN];
        for (i, b) in xored.iter_mut().enumerate() {
            *b = block[i] ^ prev[i];
        }
        let mut ga = GenericArray::clone_from_slice(&xored);
        cipher.encrypt_block(&mut ga);
        prev.copy_from_slice(&ga);
        out.extend_from_slice(&ga);
    }
    Ok(out)
}

pub fn aes128_cbc_decrypt(
    key: &[u8; AES_BLOCK_LEN],
    iv: &[u8; AES_BLOCK_LEN],
    ciphertext: &[u8],
) -> IpmiResult<Vec<u8>> {
    if ciphertext.len() % AES_BLOCK_LEN != 0 {
        return Err(IpmiError::Authentication(
            "AES-CBC ciphertext length must be a multiple of 16".to_string(),
        ));
    }
    let cipher = Aes128::new_from_slice(key)
        .map_err(|_| IpmiError::Authentication("Invalid AES-128 key".to_string()))?;

    let mut out = Vec::with_capacity(ciphertext.len());
    let mut prev = *iv;
    for block in ciphertext.chunks(AES_BLOCK_LEN) {
        let mut ga = GenericArray::clone_from_slice(block);
        cipher.decrypt_block(&mut ga);
        for (i, b) in ga.iter_mut().enumerate() {
            *b ^= prev[i];
        }
        out.extend_from_slice(&ga);
        prev.copy_from_slice(block);
    }
    Ok(out)
}
