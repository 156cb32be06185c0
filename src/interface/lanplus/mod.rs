/*
 * SPDX-FileCopyrightText: 2025 UnionTech Software Technology Co., Ltd.
 *
 * SPDX-License-Identifier: GPL-2.0-or-later
 */

//! IPMI v2.0 RMCP+ transport: open-session / RAKP key exchange, then
//! authenticated (and optionally encrypted) IPMI payloads.

pub mod crypto;
pub mod rakp;

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::{IpmiError, IpmiResult, COMPLETION_CODE_VALS};
use crate::ipmi::context::IpmiContext;
use crate::ipmi::intf::{
    IpmiIntf, LanplusSessionState, IPMI_LAN_PORT, IPMI_SESSION_PRIV_ADMIN,
};
use crate::ipmi::ipmb::{
    build_msg, response_from_hdr, CorrelationContext, IpmbMsgHdr, SeqAllocator,
};
use crate::ipmi::ipmi::{
    IpmiMessage, IpmiRq, IpmiRs, BMC_GET_DEVICE_ID, IPMI_BMC_SLAVE_ADDR, IPMI_CLOSE_SESSION,
    IPMI_GET_CHANNEL_AUTH_CAP, IPMI_GET_CHANNEL_CIPHER_SUITES, IPMI_NETFN_APP,
    IPMI_PAYLOAD_TYPE_IPMI, IPMI_PAYLOAD_TYPE_RAKP_1, IPMI_PAYLOAD_TYPE_RAKP_2,
    IPMI_PAYLOAD_TYPE_RAKP_3, IPMI_PAYLOAD_TYPE_RAKP_4, IPMI_PAYLOAD_TYPE_RMCP_OPEN_REQUEST,
    IPMI_PAYLOAD_TYPE_RMCP_OPEN_RESPONSE, IPMI_REMOTE_SWID, IPMI_SET_SESSION_PRIVLVL,
};
use crate::{debug2, debug3};

use super::lan::rmcp::{RmcpHeader, RMCP_HDR_LEN};

const IPMI_LANPLUS_TIMEOUT: u32 = 2;
const IPMI_LANPLUS_RETRY: i32 = 4;
const IPMI_LAN_CHANNEL_E: u8 = 0x0e;

const IPMI_LANPLUS_MAX_REQUEST_SIZE: u16 = 38;
const IPMI_LANPLUS_MAX_RESPONSE_SIZE: u16 = 34;
const IPMI_LANPLUS_MAX_FRAME: usize = 45;

// v2 extended capabilities bit in the authtype support mask
const IPMI_AUTHCAP_V2_EXTENDED: u8 = 0x80;

#[derive(Default)]
struct V2Session {
    console_session_id: u32,
    bmc_session_id: u32,
    auth_alg: u8,
    integrity_alg: u8,
    crypt_alg: u8,
    sik: [u8; crypto::SHA1_DIGEST_LEN],
    k1: [u8; crypto::SHA1_DIGEST_LEN],
    k2: [u8; crypto::SHA1_DIGEST_LEN],
    seq_out: u32,
    seq_in: u32,
}

pub struct LanplusIntf {
    context: IpmiContext,
    socket: Option<UdpSocket>,
    state: LanplusSessionState,
    v2: V2Session,
    seq: SeqAllocator,
    msg_tag: u8,
    abort: Arc<AtomicBool>,
    opened: bool,
}

/// Pad to the AES block size with 1,2,..,n plus a trailing pad-count byte,
/// then CBC-encrypt under the first 128 bits of K2 with a fresh IV.
pub(crate) fn encrypt_payload(k2: &[u8; 20], iv: [u8; 16], frame: &[u8]) -> IpmiResult<Vec<u8>> {
    let mut plaintext = frame.to_vec();
    let pad = (crypto::AES_BLOCK_LEN - (plaintext.len() + 1) % crypto::AES_BLOCK_LEN)
        % crypto::AES_BLOCK_LEN;
    for i in 1..=pad {
        plaintext.push(i as u8);
    }
    plaintext.push(pad as u8);

    let key = crypto::aes_key_from_k2(k2);
    let ciphertext = crypto::aes128_cbc_encrypt(&key, &iv, &plaintext)?;
    let mut payload = Vec::with_capacity(16 + ciphertext.len());
    payload.extend_from_slice(&iv);
    payload.extend_from_slice(&ciphertext);
    Ok(payload)
}

pub(crate) fn decrypt_payload(k2: &[u8; 20], payload: &[u8]) -> IpmiResult<Vec<u8>> {
    if payload.len() < crypto::AES_BLOCK_LEN * 2 {
        return Err(IpmiError::InvalidData(
            "Short encrypted payload".to_string(),
        ));
    }
    let iv: [u8; 16] = payload[..16]
        .try_into()
        .map_err(|_| IpmiError::InvalidData("Bad IV".to_string()))?;
    let key = crypto::aes_key_from_k2(k2);
    let mut plaintext = crypto::aes128_cbc_decrypt(&key, &iv, &payload[16..])?;
    let pad = *plaintext
        .last()
        .ok_or_else(|| IpmiError::InvalidData("Empty decrypted payload".to_string()))?
        as usize;
    if pad + 1 > plaintext.len() {
        return Err(IpmiError::InvalidData(
            "Bad confidentiality padding".to_string(),
        ));
    }
    plaintext.truncate(plaintext.len() - pad - 1);
    Ok(plaintext)
}

/// One suite from a Get Channel Cipher Suites listing.
#[derive(Debug, Clone, PartialEq)]
pub struct CipherSuiteRecord {
    pub id: u8,
    pub oem_iana: Option<u32>,
    pub auth_alg: u8,
    pub integrity_alg: u8,
    pub crypt_alg: u8,
}

/// Decode the concatenated record bytes returned by Get Channel Cipher
/// Suites. Algorithm bytes are tagged in their top two bits: 00 auth,
/// 01 integrity, 10 confidentiality.
pub fn parse_cipher_suite_records(data: &[u8]) -> Vec<CipherSuiteRecord> {
    let mut records = Vec::new();
    let mut i = 0;
    while i < data.len() {
        let (id, oem_iana, next) = match data[i] {
            0xc0 if i + 1 < data.len() => (data[i + 1], None, i + 2),
            0xc1 if i + 4 < data.len() => {
                let iana = u32::from_le_bytes([data[i + 2], data[i + 3], data[i + 4], 0]);
                (data[i + 1], Some(iana), i + 5)
            }
            _ => break,
        };
        let mut rec = CipherSuiteRecord {
            id,
            oem_iana,
            auth_alg: 0,
            integrity_alg: 0,
            crypt_alg: 0,
        };
        i = next;
        while i < data.len() && data[i] != 0xc0 && data[i] != 0xc1 {
            match data[i] & 0xc0 {
                0x00 => rec.auth_alg = data[i] & 0x3f,
                0x40 => rec.integrity_alg = data[i] & 0x3f,
                0x80 => rec.crypt_alg = data[i] & 0x3f,
                _ => {}
            }
            i += 1;
        }
        records.push(rec);
    }
    records
}

/// Walk the Get Channel Cipher Suites list indexes and collect the record
/// bytes. Works over any open interface.
pub fn ipmi_get_channel_cipher_suites(
    intf: &mut dyn IpmiIntf,
    channel: u8,
) -> IpmiResult<Vec<CipherSuiteRecord>> {
    let mut data = Vec::new();
    for index in 0..0x40u8 {
        let mut rq = IpmiRq {
            msg: IpmiMessage::new(IPMI_NETFN_APP, IPMI_GET_CHANNEL_CIPHER_SUITES),
        };
        rq.msg.data = vec![channel, IPMI_PAYLOAD_TYPE_IPMI, 0x80 | index];
        let rsp = intf.sendrecv(&rq).ok_or(IpmiError::Timeout)?;
        if rsp.ccode != 0 {
            return Err(IpmiError::CompletionCode(rsp.ccode));
        }
        if rsp.data.len() <= 1 {
            break;
        }
        data.extend_from_slice(&rsp.data[1..]);
        // a partial chunk means the listing is exhausted
        if rsp.data.len() - 1 < 16 {
            break;
        }
    }
    Ok(parse_cipher_suite_records(&data))
}

impl LanplusIntf {
    pub fn new(ctx: IpmiContext) -> Self {
        Self {
            context: ctx,
            socket: None,
            state: LanplusSessionState::Presession,
            v2: V2Session::default(),
            seq: SeqAllocator::new(),
            msg_tag: 0,
            abort: crate::signal::ABORT_FLAG.clone(),
            opened: false,
        }
    }

    #[cfg(test)]
    fn new_for_test(socket: UdpSocket, ctx: IpmiContext, abort: Arc<AtomicBool>) -> Self {
        Self {
            context: ctx,
            socket: Some(socket),
            state: LanplusSessionState::Presession,
            v2: V2Session::default(),
            seq: SeqAllocator::new(),
            msg_tag: 0,
            abort,
            opened: true,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.context.ssn_params.timeout as u64)
    }

    fn retry_budget(&self) -> i32 {
        if self.abort.load(Ordering::SeqCst) {
            return 1;
        }
        if self.context.ssn_params.retry > 0 {
            self.context.ssn_params.retry
        } else {
            IPMI_LANPLUS_RETRY
        }
    }

    fn privlvl(&self) -> u8 {
        if self.context.ssn_params.privlvl != 0 {
            self.context.ssn_params.privlvl
        } else {
            IPMI_SESSION_PRIV_ADMIN
        }
    }

    /// RAKP role byte: requested privilege plus the name-only lookup bit.
    fn role(&self) -> u8 {
        let lookup = if self.context.ssn_params.lookupbit != 0 {
            self.context.ssn_params.lookupbit
        } else {
            0x10
        };
        (lookup & 0xf0) | (self.privlvl() & 0x0f)
    }

    fn username(&self) -> Vec<u8> {
        let name = &self.context.ssn_params.username;
        let len = name.iter().position(|&b| b == 0).unwrap_or(16).min(16);
        name[..len].to_vec()
    }

    fn password(&self) -> Vec<u8> {
        let code = &self.context.ssn_params.authcode_set;
        let len = code.iter().position(|&b| b == 0).unwrap_or(code.len());
        code[..len].to_vec()
    }

    /// The key-generating key: the BMC key when configured, otherwise the
    /// user password.
    fn kg(&self) -> Vec<u8> {
        let kg = &self.context.ssn_params.kg;
        let len = kg.iter().position(|&b| b == 0).unwrap_or(kg.len());
        if len > 0 {
            kg[..len].to_vec()
        } else {
            self.password()
        }
    }

    fn next_tag(&mut self) -> u8 {
        let tag = self.msg_tag;
        self.msg_tag = self.msg_tag.wrapping_add(1);
        tag
    }

    fn send_v2(&self, msg: &[u8]) -> IpmiResult<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| IpmiError::Network("LAN socket not open".to_string()))?;
        let mut packet = Vec::with_capacity(RMCP_HDR_LEN + msg.len());
        packet.extend_from_slice(&RmcpHeader::new_ipmi().to_bytes());
        packet.extend_from_slice(msg);
        debug3!("lanplus tx {} bytes", packet.len());
        socket
            .send(&packet)
            .map_err(|e| IpmiError::Network(format!("Packet send failed: {}", e)))?;
        Ok(())
    }

    /// Receive the next RMCP+ session packet before the deadline. The K1
    /// integrity key is applied once the RAKP exchange has derived it.
    fn recv_v2(&mut self, deadline: Instant) -> IpmiResult<Option<rakp::V2Packet>> {
        let mut buf = [0u8; 1024];
        loop {
            if self.abort.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let socket = self
                .socket
                .as_ref()
                .ok_or_else(|| IpmiError::Network("LAN socket not open".to_string()))?;
            socket
                .set_read_timeout(Some(remaining))
                .map_err(|e| IpmiError::Network(format!("set_read_timeout: {}", e)))?;
            let len = match socket.recv(&mut buf) {
                Ok(len) => len,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return Ok(None)
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(IpmiError::Network(format!("Packet receive failed: {}", e))),
            };
            let Some(rmcp) = RmcpHeader::from_bytes(&buf[..len]) else {
                continue;
            };
            if !rmcp.is_ipmi() {
                continue;
            }
            let k1 = if self.state == LanplusSessionState::Active
                || self.state == LanplusSessionState::Rakp3Sent
                || self.state == LanplusSessionState::CloseSent
            {
                Some(&self.v2.k1[..])
            } else {
                None
            };
            match rakp::parse_v2_msg(&buf[RMCP_HDR_LEN..len], k1) {
                Ok(pkt) => {
                    self.v2.seq_in = pkt.session_seq;
                    return Ok(Some(pkt));
                }
                Err(e) => {
                    debug2!("lanplus: dropped packet: {}", e);
                    continue;
                }
            }
        }
    }

    /// Wait for one specific session-establishment payload type.
    fn recv_payload(&mut self, ptype: u8, deadline: Instant) -> IpmiResult<Option<Vec<u8>>> {
        while let Some(pkt) = self.recv_v2(deadline)? {
            if pkt.payload_type == ptype {
                return Ok(Some(pkt.payload));
            }
            debug2!(
                "lanplus: unexpected payload type {:#04x}, waiting for {:#04x}",
                pkt.payload_type,
                ptype
            );
        }
        Ok(None)
    }

    /// Wrap one IPMB frame in an in-session packet: encrypt when the suite
    /// has a confidentiality algorithm, seal when it has an integrity one.
    fn wrap_in_session(&mut self, frame: &[u8]) -> IpmiResult<Vec<u8>> {
        self.v2.seq_out = self.v2.seq_out.wrapping_add(1);
        let encrypted = self.v2.crypt_alg != rakp::RAKP_CRYPT_ALG_NONE;
        let authenticated = self.v2.integrity_alg != rakp::RAKP_INTEGRITY_ALG_NONE;

        let payload = if encrypted {
            let iv: [u8; 16] = rand::thread_rng().gen();
            encrypt_payload(&self.v2.k2, iv, frame)?
        } else {
            frame.to_vec()
        };
        let msg = rakp::build_v2_msg(
            IPMI_PAYLOAD_TYPE_IPMI,
            encrypted,
            authenticated,
            self.v2.bmc_session_id,
            self.v2.seq_out,
            &payload,
        );
        if authenticated {
            rakp::seal_v2_msg(msg, &self.v2.k1)
        } else {
            Ok(msg)
        }
    }

    fn unwrap_in_session(&self, pkt: &rakp::V2Packet) -> IpmiResult<IpmbMsgHdr> {
        if pkt.session_id != self.v2.console_session_id {
            return Err(IpmiError::Session(format!(
                "Packet for foreign session {:#010x}",
                pkt.session_id
            )));
        }
        let frame = if pkt.encrypted {
            decrypt_payload(&self.v2.k2, &pkt.payload)?
        } else {
            pkt.payload.clone()
        };
        IpmbMsgHdr::parse(&frame)
    }

    /// In-session request/response with retries; bridged requests collect
    /// the Send Message ack and then the embedded response.
    fn transaction(&mut self, req: &IpmiRq) -> IpmiResult<Option<IpmiRs>> {
        let retry = self.retry_budget();
        let timeout = self.timeout();

        for attempt in 0..retry {
            if attempt > 0 && self.abort.load(Ordering::SeqCst) {
                break;
            }
            let built = build_msg(
                &self.context,
                req,
                &mut self.seq,
                false,
                IPMI_LANPLUS_MAX_FRAME,
            )?;
            let msg = self.wrap_in_session(&built.frame)?;
            self.send_v2(&msg)?;

            let deadline = Instant::now() + timeout;
            let outer_ctx = built.contexts[0];
            let hdr = match self.recv_ipmi_matched(&outer_ctx, deadline)? {
                Some(hdr) => hdr,
                None => {
                    debug2!("lanplus: no response, attempt {}/{}", attempt + 1, retry);
                    continue;
                }
            };
            if built.bridging_level == 0 {
                return Ok(Some(response_from_hdr(hdr)));
            }
            let ack = response_from_hdr(hdr);
            if ack.ccode != 0 {
                return Ok(Some(ack));
            }
            let inner_ctx = *built
                .contexts
                .last()
                .ok_or_else(|| IpmiError::InvalidData("empty correlation chain".to_string()))?;
            match self.recv_ipmi_matched(&inner_ctx, deadline)? {
                Some(inner) => return Ok(Some(response_from_hdr(inner))),
                None => debug2!(
                    "lanplus: bridged response missing, attempt {}/{}",
                    attempt + 1,
                    retry
                ),
            }
        }
        Ok(None)
    }

    fn recv_ipmi_matched(
        &mut self,
        ctx: &CorrelationContext,
        deadline: Instant,
    ) -> IpmiResult<Option<IpmbMsgHdr>> {
        while let Some(pkt) = self.recv_v2(deadline)? {
            if pkt.payload_type != IPMI_PAYLOAD_TYPE_IPMI {
                debug2!("lanplus: non-IPMI payload {:#04x} skipped", pkt.payload_type);
                continue;
            }
            match self.unwrap_in_session(&pkt) {
                Ok(hdr) if ctx.matches(&hdr) => return Ok(Some(hdr)),
                Ok(_) => debug2!("lanplus: unrelated message discarded"),
                Err(e) => debug2!("lanplus: bad session payload: {}", e),
            }
        }
        Ok(None)
    }

    /// Pre-session IPMI command, wrapped with session id 0 and no keys.
    fn presession_request(&mut self, netfn: u8, cmd: u8, data: Vec<u8>) -> IpmiResult<IpmiRs> {
        let retry = self.retry_budget();
        let timeout = self.timeout();

        for attempt in 0..retry {
            if attempt > 0 && self.abort.load(Ordering::SeqCst) {
                break;
            }
            let hdr = IpmbMsgHdr {
                rs_addr: IPMI_BMC_SLAVE_ADDR,
                netfn_lun: netfn << 2,
                rq_addr: IPMI_REMOTE_SWID,
                seq_lun: self.seq.next() << 2,
                cmd,
                data: data.clone(),
            };
            let ctx = CorrelationContext {
                rs_addr: hdr.rs_addr,
                netfn_lun: hdr.netfn_lun,
                rq_addr: hdr.rq_addr,
                seq_lun: hdr.seq_lun,
                cmd: hdr.cmd,
            };
            let msg = rakp::build_v2_msg(IPMI_PAYLOAD_TYPE_IPMI, false, false, 0, 0, &hdr.serialize());
            self.send_v2(&msg)?;

            let deadline = Instant::now() + timeout;
            if let Some(hdr) = self.recv_ipmi_matched(&ctx, deadline)? {
                return Ok(response_from_hdr(hdr));
            }
            debug2!("lanplus: no response, attempt {}/{}", attempt + 1, retry);
        }
        Err(IpmiError::Timeout)
    }

    /// Session-establishment exchange with retries for one payload type.
    fn exchange(
        &mut self,
        send_type: u8,
        payload: &[u8],
        expect_type: u8,
    ) -> IpmiResult<Vec<u8>> {
        let retry = self.retry_budget();
        let timeout = self.timeout();
        let msg = rakp::build_v2_msg(send_type, false, false, 0, 0, payload);

        for attempt in 0..retry {
            if attempt > 0 && self.abort.load(Ordering::SeqCst) {
                break;
            }
            self.send_v2(&msg)?;
            let deadline = Instant::now() + timeout;
            if let Some(rsp) = self.recv_payload(expect_type, deadline)? {
                return Ok(rsp);
            }
            debug2!("lanplus: no response, attempt {}/{}", attempt + 1, retry);
        }
        Err(IpmiError::Timeout)
    }

    fn open_session_and_rakp(&mut self) -> IpmiResult<()> {
        let algs = rakp::suite_algs(self.context.ssn_params.cipher_suite_id)?;
        let role = self.role();
        let username = self.username();
        let password = self.password();

        // RMCP+ Open Session
        let tag = self.next_tag();
        let console_session_id: u32 = rand::thread_rng().gen_range(1..=u32::MAX);
        self.v2.console_session_id = console_session_id;
        let request = rakp::build_open_session_request(tag, self.privlvl(), console_session_id, algs);
        self.state = LanplusSessionState::OpenSessionSent;
        let rsp = self.exchange(
            IPMI_PAYLOAD_TYPE_RMCP_OPEN_REQUEST,
            &request,
            IPMI_PAYLOAD_TYPE_RMCP_OPEN_RESPONSE,
        )?;
        let open_rsp = rakp::parse_open_session_response(&rsp)?;
        if open_rsp.status != 0 {
            return Err(IpmiError::Session(format!(
                "RMCP+ Open Session failed: {}",
                rakp::rakp_status_str(open_rsp.status)
            )));
        }
        if open_rsp.console_session_id != console_session_id {
            return Err(IpmiError::Session(
                "Open Session Response for foreign session".to_string(),
            ));
        }
        self.v2.bmc_session_id = open_rsp.bmc_session_id;
        self.v2.auth_alg = open_rsp.auth_alg;
        self.v2.integrity_alg = open_rsp.integrity_alg;
        self.v2.crypt_alg = open_rsp.crypt_alg;
        self.state = LanplusSessionState::OpenSessionReceived;

        // RAKP1 / RAKP2
        let tag = self.next_tag();
        let rand_console: [u8; 16] = rand::thread_rng().gen();
        let rakp1 = rakp::build_rakp1(tag, self.v2.bmc_session_id, &rand_console, role, &username);
        self.state = LanplusSessionState::Rakp1Sent;
        let rsp = self.exchange(IPMI_PAYLOAD_TYPE_RAKP_1, &rakp1, IPMI_PAYLOAD_TYPE_RAKP_2)?;
        let rakp2 = rakp::parse_rakp2(&rsp)?;
        if rakp2.status != 0 {
            return Err(IpmiError::Session(format!(
                "RAKP2 failed: {}",
                rakp::rakp_status_str(rakp2.status)
            )));
        }
        if rakp2.console_session_id != console_session_id {
            return Err(IpmiError::Session("RAKP2 for foreign session".to_string()));
        }
        if self.v2.auth_alg != rakp::RAKP_AUTH_ALG_NONE {
            let expect = rakp::rakp2_authcode(
                &password,
                console_session_id,
                self.v2.bmc_session_id,
                &rand_console,
                &rakp2.rand_bmc,
                &rakp2.guid_bmc,
                role,
                &username,
            )?;
            if !crypto::ct_eq(&expect, &rakp2.authcode) {
                return Err(IpmiError::Authentication(
                    "RAKP2 HMAC is invalid (wrong password or BMC key)".to_string(),
                ));
            }
        }
        self.state = LanplusSessionState::Rakp2Received;

        // session keys
        self.v2.sik = crypto::derive_sik(
            &self.kg(),
            &rand_console,
            &rakp2.rand_bmc,
            role,
            &username,
        )?;
        let (k1, k2) = crypto::derive_k1_k2(&self.v2.sik)?;
        self.v2.k1 = k1;
        self.v2.k2 = k2;

        // RAKP3 / RAKP4
        let tag = self.next_tag();
        let authcode = rakp::rakp3_authcode(
            &password,
            &rakp2.rand_bmc,
            console_session_id,
            role,
            &username,
        )?;
        let rakp3 = rakp::build_rakp3(tag, self.v2.bmc_session_id, &authcode);
        self.state = LanplusSessionState::Rakp3Sent;
        let rsp = self.exchange(IPMI_PAYLOAD_TYPE_RAKP_3, &rakp3, IPMI_PAYLOAD_TYPE_RAKP_4)?;
        let rakp4 = rakp::parse_rakp4(&rsp)?;
        if rakp4.status != 0 {
            return Err(IpmiError::Session(format!(
                "RAKP4 failed: {}",
                rakp::rakp_status_str(rakp4.status)
            )));
        }
        if self.v2.auth_alg != rakp::RAKP_AUTH_ALG_NONE {
            let expect = rakp::rakp4_icv(
                &self.v2.sik,
                &rand_console,
                self.v2.bmc_session_id,
                &rakp2.guid_bmc,
            )?;
            if !crypto::ct_eq(&expect, &rakp4.icv) {
                return Err(IpmiError::Authentication(
                    "RAKP4 integrity check value is invalid".to_string(),
                ));
            }
        }
        self.v2.seq_out = 0;
        self.state = LanplusSessionState::Active;

        // raise privilege inside the session
        let mut rq = IpmiRq {
            msg: IpmiMessage::new(IPMI_NETFN_APP, IPMI_SET_SESSION_PRIVLVL),
        };
        rq.msg.data = vec![self.privlvl()];
        match self.transaction(&rq)? {
            Some(rsp) if rsp.ccode == 0 => {}
            Some(rsp) => {
                let err = IpmiError::Session(format!(
                    "Set Session Privilege Level to {:#04x} failed: {}",
                    self.privlvl(),
                    crate::error::val2str(rsp.ccode, &COMPLETION_CODE_VALS)
                ));
                self.close();
                return Err(err);
            }
            None => {
                self.close();
                return Err(IpmiError::Timeout);
            }
        }

        log::info!(
            "lanplus: session {:#010x} active (cipher suite {})",
            self.v2.bmc_session_id,
            self.context.ssn_params.cipher_suite_id as u8
        );
        Ok(())
    }
}

impl IpmiIntf for LanplusIntf {
    fn context(&mut self) -> &mut IpmiContext {
        &mut self.context
    }

    fn setup(&mut self) -> IpmiResult<()> {
        self.context.protocol.max_request_data_size = IPMI_LANPLUS_MAX_REQUEST_SIZE;
        self.context.protocol.max_response_data_size = IPMI_LANPLUS_MAX_RESPONSE_SIZE;
        if self.context.ssn_params.retry <= 0 {
            self.context.ssn_params.retry = IPMI_LANPLUS_RETRY;
        }
        if self.context.ssn_params.timeout == 0 {
            self.context.ssn_params.timeout = IPMI_LANPLUS_TIMEOUT;
        }
        Ok(())
    }

    fn open(&mut self) -> IpmiResult<()> {
        if self.opened && self.state == LanplusSessionState::Active {
            return Ok(());
        }
        let hostname = self.context.ssn_params.hostname.clone();
        if hostname.is_empty() {
            return Err(IpmiError::Network(
                "Hostname (-H) required for lanplus interface".to_string(),
            ));
        }
        let port = if self.context.ssn_params.port != 0 {
            self.context.ssn_params.port
        } else {
            IPMI_LAN_PORT
        };
        let remote: SocketAddr = (hostname.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| {
                IpmiError::Network(format!("Address lookup for {} failed: {}", hostname, e))
            })?
            .next()
            .ok_or_else(|| {
                IpmiError::Network(format!("No address found for hostname {}", hostname))
            })?;
        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .map_err(|e| IpmiError::Network(format!("Socket bind failed: {}", e)))?;
        socket
            .connect(remote)
            .map_err(|e| IpmiError::Network(format!("Connect to {} failed: {}", remote, e)))?;
        self.socket = Some(socket);
        self.opened = true;

        // the BMC must advertise v2 extended capabilities before we try RAKP
        let result = (|| {
            let rsp = self.presession_request(
                IPMI_NETFN_APP,
                IPMI_GET_CHANNEL_AUTH_CAP,
                vec![IPMI_LAN_CHANNEL_E | 0x80, self.privlvl()],
            )?;
            if rsp.ccode != 0 || rsp.data.len() < 3 {
                return Err(IpmiError::Session(format!(
                    "Get Channel Authentication Capabilities failed: {}",
                    crate::error::val2str(rsp.ccode, &COMPLETION_CODE_VALS)
                )));
            }
            if rsp.data[1] & IPMI_AUTHCAP_V2_EXTENDED == 0 {
                return Err(IpmiError::NotSupported(
                    "BMC does not support IPMI v2 / RMCP+".to_string(),
                ));
            }
            self.open_session_and_rakp()
        })();

        if let Err(e) = result {
            self.socket = None;
            self.opened = false;
            self.state = LanplusSessionState::Presession;
            return Err(e);
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.state == LanplusSessionState::Active {
            self.state = LanplusSessionState::CloseSent;
            let mut rq = IpmiRq {
                msg: IpmiMessage::new(IPMI_NETFN_APP, IPMI_CLOSE_SESSION),
            };
            rq.msg.data = self.v2.bmc_session_id.to_le_bytes().to_vec();
            if let Err(e) = self.transaction(&rq) {
                debug2!("lanplus: close session: {}", e);
            }
        }
        self.v2 = V2Session::default();
        self.state = LanplusSessionState::Presession;
        self.socket = None;
        self.opened = false;
    }

    fn sendrecv(&mut self, req: &IpmiRq) -> Option<IpmiRs> {
        if self.state != LanplusSessionState::Active {
            if let Err(e) = self.open() {
                log::error!("{}", e);
                return None;
            }
        }
        match self.transaction(req) {
            Ok(rsp) => rsp,
            Err(e) => {
                log::error!("{}", e);
                None
            }
        }
    }

    fn keepalive(&mut self) -> IpmiResult<()> {
        if self.state != LanplusSessionState::Active {
            return Ok(());
        }
        let rq = IpmiRq {
            msg: IpmiMessage::new(IPMI_NETFN_APP, BMC_GET_DEVICE_ID),
        };
        match self.transaction(&rq)? {
            Some(_) => Ok(()),
            None => Err(IpmiError::Timeout),
        }
    }

    fn set_my_addr(&mut self, addr: u8) -> IpmiResult<()> {
        self.context.set_my_addr(addr as u32);
        Ok(())
    }

    fn set_max_request_size(&mut self, size: u16) {
        self.context.protocol.max_request_data_size = size.min(IPMI_LANPLUS_MAX_REQUEST_SIZE);
    }

    fn set_max_response_size(&mut self, size: u16) {
        self.context.protocol.max_response_data_size = size.min(IPMI_LANPLUS_MAX_RESPONSE_SIZE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_payload_round_trip() {
        let k2 = [0x5au8; 20];
        let iv = [0x12u8; 16];
        for len in [1usize, 7, 15, 16, 33] {
            let frame: Vec<u8> = (0..len as u8).collect();
            let payload = encrypt_payload(&k2, iv, &frame).unwrap();
            assert_eq!(&payload[..16], &iv);
            assert_eq!((payload.len() - 16) % 16, 0);
            assert_eq!(decrypt_payload(&k2, &payload).unwrap(), frame);
        }
    }

    #[test]
    fn test_parse_cipher_suite_records() {
        // suite 3: auth HMAC-SHA1, integrity HMAC-SHA1-96, crypt AES-CBC-128
        let data = [
            0xc0, 0x00, 0x00, 0x40, 0x80, // suite 0: all none
            0xc0, 0x03, 0x01, 0x41, 0x81, // suite 3
        ];
        let records = parse_cipher_suite_records(&data);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, 0);
        assert_eq!(records[0].auth_alg, 0);
        assert_eq!(records[1].id, 3);
        assert_eq!(records[1].auth_alg, rakp::RAKP_AUTH_ALG_HMAC_SHA1);
        assert_eq!(records[1].integrity_alg, rakp::RAKP_INTEGRITY_ALG_HMAC_SHA1_96);
        assert_eq!(records[1].crypt_alg, rakp::RAKP_CRYPT_ALG_AES_CBC_128);
    }

    #[test]
    fn test_in_session_round_trip_over_loopback() {
        let bmc = UdpSocket::bind("127.0.0.1:0").unwrap();
        let bmc_addr = bmc.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.connect(bmc_addr).unwrap();

        let sik = [0x77u8; 20];
        let (k1, k2) = crypto::derive_k1_k2(&sik).unwrap();

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 1024];
            let (len, from) = bmc.recv_from(&mut buf).unwrap();
            let pkt = rakp::parse_v2_msg(&buf[RMCP_HDR_LEN..len], Some(&k1)).unwrap();
            assert!(pkt.encrypted && pkt.authenticated);
            let frame = decrypt_payload(&k2, &pkt.payload).unwrap();
            let req = IpmbMsgHdr::parse(&frame).unwrap();

            let reply = IpmbMsgHdr {
                rs_addr: req.rq_addr,
                netfn_lun: ((req.netfn_lun | 0x04) & 0xfc) | (req.seq_lun & 0x03),
                rq_addr: req.rs_addr,
                seq_lun: (req.seq_lun & 0xfc) | (req.netfn_lun & 0x03),
                cmd: req.cmd,
                data: vec![0x00, 0x51],
            };
            let payload = encrypt_payload(&k2, [0x09u8; 16], &reply.serialize()).unwrap();
            // responses carry the console session id
            let msg = rakp::build_v2_msg(
                IPMI_PAYLOAD_TYPE_IPMI,
                true,
                true,
                0xcafe0001,
                1,
                &payload,
            );
            let sealed = rakp::seal_v2_msg(msg, &k1).unwrap();
            let mut packet = RmcpHeader::new_ipmi().to_bytes().to_vec();
            packet.extend_from_slice(&sealed);
            bmc.send_to(&packet, from).unwrap();
        });

        let mut ctx = IpmiContext::new();
        ctx.ssn_params.timeout = 2;
        ctx.ssn_params.retry = 1;
        let mut intf = LanplusIntf::new_for_test(client, ctx, Arc::new(AtomicBool::new(false)));
        intf.state = LanplusSessionState::Active;
        intf.v2.console_session_id = 0xcafe0001;
        intf.v2.bmc_session_id = 0xbeef0002;
        intf.v2.auth_alg = rakp::RAKP_AUTH_ALG_HMAC_SHA1;
        intf.v2.integrity_alg = rakp::RAKP_INTEGRITY_ALG_HMAC_SHA1_96;
        intf.v2.crypt_alg = rakp::RAKP_CRYPT_ALG_AES_CBC_128;
        intf.v2.sik = sik;
        intf.v2.k1 = k1;
        intf.v2.k2 = k2;

        let rq = IpmiRq {
            msg: IpmiMessage::new(IPMI_NETFN_APP, BMC_GET_DEVICE_ID),
        };
        let rsp = intf.sendrecv(&rq).expect("response expected");
        assert_eq!(rsp.ccode, 0);
        assert_eq!(rsp.data, vec![0x51]);
        handle.join().unwrap();
    }

    #[test]
    fn test_role_byte_defaults_to_name_only_lookup() {
        let intf = LanplusIntf::new(IpmiContext::new());
        assert_eq!(intf.role(), 0x10 | IPMI_SESSION_PRIV_ADMIN);
    }
}
