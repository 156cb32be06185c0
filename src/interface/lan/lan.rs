/*
 * SPDX-FileCopyrightText: 2025 UnionTech Software Technology Co., Ltd.
 *
 * SPDX-License-Identifier: GPL-2.0-or-later
 */

//! IPMI v1.5 over LAN: UDP/RMCP transport with authcap -> challenge ->
//! activate -> set-privilege session establishment and per-message
//! MD5/password authcodes.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::{IpmiError, IpmiResult};
use crate::ipmi::context::IpmiContext;
use crate::ipmi::intf::{
    IpmiIntf, IPMI_AUTHSTATUS_PER_MSG_DISABLED, IPMI_LAN_PORT, IPMI_SESSION_AUTHTYPE_NONE,
    IPMI_SESSION_PRIV_ADMIN,
};
use crate::ipmi::ipmb::{
    build_msg, response_from_hdr, CorrelationContext, IpmbMsgHdr, SeqAllocator,
};
use crate::ipmi::ipmi::{
    IpmiMessage, IpmiRq, IpmiRs, BMC_GET_DEVICE_ID, IPMI_ACTIVATE_SESSION, IPMI_BMC_SLAVE_ADDR,
    IPMI_CLOSE_SESSION, IPMI_GET_CHANNEL_AUTH_CAP, IPMI_GET_SESSION_CHALLENGE, IPMI_NETFN_APP,
    IPMI_REMOTE_SWID, IPMI_SET_SESSION_PRIVLVL,
};
use crate::{debug2, debug3};

use super::auth::{self, auth_type_name, IPMI_AUTHCODE_LEN};
use super::rmcp::{build_asf_ping, is_asf_pong, RmcpHeader, RMCP_HDR_LEN};

const IPMI_LAN_TIMEOUT: u32 = 2;
const IPMI_LAN_RETRY: i32 = 4;
const IPMI_LAN_CHANNEL_E: u8 = 0x0e;

// 45-byte frame limit minus the 7-byte IPMB envelope
const IPMI_LAN_MAX_REQUEST_SIZE: u16 = 38;
const IPMI_LAN_MAX_RESPONSE_SIZE: u16 = 34;
const IPMI_LAN_MAX_FRAME: usize = 45;

/// v1.5 session header: authtype + seq + session id, before the optional
/// 16-byte authcode and the length byte.
const SESSION_HDR_LEN: usize = 9;

#[derive(Default)]
struct LanSession {
    active: bool,
    authtype: u8,
    session_id: u32,
    /// Sequence we stamp on outgoing packets; seeded by the BMC in the
    /// Activate Session response.
    out_seq: u32,
    /// Sequence the BMC stamps on its packets; we proposed the seed.
    in_seq: u32,
}

pub struct LanIntf {
    context: IpmiContext,
    socket: Option<UdpSocket>,
    session: LanSession,
    seq: SeqAllocator,
    abort: Arc<AtomicBool>,
    opened: bool,
}

impl LanIntf {
    pub fn new(ctx: IpmiContext) -> Self {
        Self {
            context: ctx,
            socket: None,
            session: LanSession::default(),
            seq: SeqAllocator::new(),
            abort: crate::signal::ABORT_FLAG.clone(),
            opened: false,
        }
    }

    #[cfg(test)]
    fn new_for_test(socket: UdpSocket, ctx: IpmiContext, abort: Arc<AtomicBool>) -> Self {
        Self {
            context: ctx,
            socket: Some(socket),
            session: LanSession::default(),
            seq: SeqAllocator::new(),
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
            IPMI_LAN_RETRY
        }
    }

    fn password_key(&self) -> [u8; IPMI_AUTHCODE_LEN] {
        auth::pad_password(&self.context.ssn_params.authcode_set)
    }

    fn privlvl(&self) -> u8 {
        if self.context.ssn_params.privlvl != 0 {
            self.context.ssn_params.privlvl
        } else {
            IPMI_SESSION_PRIV_ADMIN
        }
    }

    /// RMCP + session header + authcode + length around one IPMB frame.
    fn build_packet(&self, frame: &[u8]) -> IpmiResult<Vec<u8>> {
        let s = &self.session;
        let mut packet =
            Vec::with_capacity(RMCP_HDR_LEN + SESSION_HDR_LEN + IPMI_AUTHCODE_LEN + 1 + frame.len());
        packet.extend_from_slice(&RmcpHeader::new_ipmi().to_bytes());
        packet.push(s.authtype);
        packet.extend_from_slice(&s.out_seq.to_le_bytes());
        packet.extend_from_slice(&s.session_id.to_le_bytes());
        if s.authtype != IPMI_SESSION_AUTHTYPE_NONE {
            let code = auth::lan_authcode(
                s.authtype,
                &self.password_key(),
                s.session_id,
                s.out_seq,
                frame,
            )?;
            packet.extend_from_slice(&code);
        }
        packet.push(frame.len() as u8);
        packet.extend_from_slice(frame);
        Ok(packet)
    }

    /// Strip RMCP and session framing, returning the embedded IPMB message.
    /// Non-IPMI datagrams and framing errors yield None and are skipped by
    /// the receive loop.
    fn parse_packet(&mut self, buf: &[u8]) -> Option<IpmbMsgHdr> {
        let rmcp = RmcpHeader::from_bytes(buf)?;
        if !rmcp.is_ipmi() {
            return None;
        }
        let mut off = RMCP_HDR_LEN;
        if buf.len() < off + SESSION_HDR_LEN + 1 {
            return None;
        }
        let authtype = buf[off];
        let seq = u32::from_le_bytes([buf[off + 1], buf[off + 2], buf[off + 3], buf[off + 4]]);
        off += SESSION_HDR_LEN;
        if authtype != IPMI_SESSION_AUTHTYPE_NONE {
            off += IPMI_AUTHCODE_LEN;
        }
        if buf.len() < off + 1 {
            return None;
        }
        let len = buf[off] as usize;
        off += 1;
        if buf.len() < off + len {
            return None;
        }
        match IpmbMsgHdr::parse(&buf[off..off + len]) {
            Ok(hdr) => {
                self.session.in_seq = seq;
                Some(hdr)
            }
            Err(e) => {
                debug2!("lan: bad embedded frame: {}", e);
                None
            }
        }
    }

    fn send_packet(&self, packet: &[u8]) -> IpmiResult<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| IpmiError::Network("LAN socket not open".to_string()))?;
        debug3!("lan tx {} bytes", packet.len());
        socket
            .send(packet)
            .map_err(|e| IpmiError::Network(format!("Packet send failed: {}", e)))?;
        Ok(())
    }

    /// Receive one matching IPMB message before the deadline. Unrelated
    /// datagrams are discarded inside the window.
    fn recv_matched(
        &mut self,
        ctx: &CorrelationContext,
        deadline: Instant,
    ) -> IpmiResult<Option<IpmbMsgHdr>> {
        let mut buf = [0u8; 512];
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
            match self.parse_packet(&buf[..len]) {
                Some(hdr) if ctx.matches(&hdr) => return Ok(Some(hdr)),
                Some(_) => debug2!("lan: unrelated message discarded"),
                None => {}
            }
        }
    }

    /// One request/response transaction with retries. Bridged requests get
    /// the Send Message ack first and then the embedded response as a
    /// separate session packet.
    fn transaction(&mut self, req: &IpmiRq) -> IpmiResult<Option<IpmiRs>> {
        let retry = self.retry_budget();
        let timeout = self.timeout();

        for attempt in 0..retry {
            if attempt > 0 && self.abort.load(Ordering::SeqCst) {
                break;
            }
            let built = build_msg(&self.context, req, &mut self.seq, false, IPMI_LAN_MAX_FRAME)?;
            if self.session.active {
                self.session.out_seq = self.session.out_seq.wrapping_add(1);
            }
            let packet = self.build_packet(&built.frame)?;
            self.send_packet(&packet)?;

            let deadline = Instant::now() + timeout;
            let outer_ctx = built.contexts[0];
            let hdr = match self.recv_matched(&outer_ctx, deadline)? {
                Some(hdr) => hdr,
                None => {
                    debug2!("lan: no response, attempt {}/{}", attempt + 1, retry);
                    continue;
                }
            };

            if built.bridging_level == 0 {
                return Ok(Some(response_from_hdr(hdr)));
            }

            // Send Message ack; a bad ccode fails the bridged transaction
            let ack = response_from_hdr(hdr);
            if ack.ccode != 0 {
                return Ok(Some(ack));
            }
            let inner_ctx = *built
                .contexts
                .last()
                .ok_or_else(|| IpmiError::InvalidData("empty correlation chain".to_string()))?;
            match self.recv_matched(&inner_ctx, deadline)? {
                Some(inner) => return Ok(Some(response_from_hdr(inner))),
                None => {
                    debug2!("lan: bridged response missing, attempt {}/{}", attempt + 1, retry)
                }
            }
        }
        Ok(None)
    }

    /// Session commands always go straight to the BMC, never through the
    /// bridging configuration.
    fn direct_request(&mut self, netfn: u8, cmd: u8, data: Vec<u8>) -> IpmiResult<IpmiRs> {
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
            if self.session.active {
                self.session.out_seq = self.session.out_seq.wrapping_add(1);
            }
            let packet = self.build_packet(&hdr.serialize())?;
            self.send_packet(&packet)?;

            let deadline = Instant::now() + timeout;
            if let Some(rsp) = self.recv_matched(&ctx, deadline)? {
                return Ok(response_from_hdr(rsp));
            }
            debug2!("lan: no response, attempt {}/{}", attempt + 1, retry);
        }
        Err(IpmiError::Timeout)
    }

    /// ASF Presence Ping; proves the BMC answers RMCP before we spend the
    /// activation sequence on it.
    fn ping(&mut self) -> IpmiResult<()> {
        let tag: u8 = rand::thread_rng().gen();
        let ping = build_asf_ping(tag);
        let retry = self.retry_budget();
        let timeout = self.timeout();
        let mut buf = [0u8; 512];

        for _ in 0..retry {
            self.send_packet(&ping)?;
            let deadline = Instant::now() + timeout;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                let socket = self
                    .socket
                    .as_ref()
                    .ok_or_else(|| IpmiError::Network("LAN socket not open".to_string()))?;
                socket
                    .set_read_timeout(Some(remaining))
                    .map_err(|e| IpmiError::Network(format!("set_read_timeout: {}", e)))?;
                match socket.recv(&mut buf) {
                    Ok(len) if is_asf_pong(&buf[..len], tag) => return Ok(()),
                    Ok(_) => continue,
                    Err(e)
                        if e.kind() == std::io::ErrorKind::WouldBlock
                            || e.kind() == std::io::ErrorKind::TimedOut =>
                    {
                        break
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        return Err(IpmiError::Network(format!("Packet receive failed: {}", e)))
                    }
                }
            }
        }
        Err(IpmiError::Network("No response to RMCP ping".to_string()))
    }

    fn activate_session(&mut self) -> IpmiResult<()> {
        let privlvl = self.privlvl();

        // Get Channel Authentication Capabilities
        let rsp = self.direct_request(
            IPMI_NETFN_APP,
            IPMI_GET_CHANNEL_AUTH_CAP,
            vec![IPMI_LAN_CHANNEL_E, privlvl],
        )?;
        if rsp.ccode != 0 || rsp.data.len() < 4 {
            return Err(IpmiError::Session(format!(
                "Get Channel Authentication Capabilities failed: {}",
                crate::error::val2str(rsp.ccode, &crate::error::COMPLETION_CODE_VALS)
            )));
        }
        let auth_support = rsp.data[1];
        let auth_status = rsp.data[2];
        let forced = match self.context.ssn_params.authtype_set {
            0 => None,
            t => Some(t),
        };
        let authtype = auth::pick_authtype(auth_support, forced, self.context.ssn_params.password)?;
        debug2!("lan: using authtype {}", auth_type_name(authtype));

        // Get Session Challenge
        let mut data = vec![authtype];
        data.extend_from_slice(&self.context.ssn_params.username[..16]);
        let rsp = self.direct_request(IPMI_NETFN_APP, IPMI_GET_SESSION_CHALLENGE, data)?;
        match rsp.ccode {
            0x00 => {}
            0x81 => {
                return Err(IpmiError::Session(
                    "Invalid user name in Get Session Challenge".to_string(),
                ))
            }
            0x82 => {
                return Err(IpmiError::Session(
                    "NULL user name not enabled on BMC".to_string(),
                ))
            }
            cc => {
                return Err(IpmiError::Session(format!(
                    "Get Session Challenge failed: {}",
                    crate::error::val2str(cc, &crate::error::COMPLETION_CODE_VALS)
                )))
            }
        }
        if rsp.data.len() < 20 {
            return Err(IpmiError::Session(
                "Short Get Session Challenge response".to_string(),
            ));
        }
        let temp_session_id =
            u32::from_le_bytes([rsp.data[0], rsp.data[1], rsp.data[2], rsp.data[3]]);
        let challenge: [u8; 16] = rsp.data[4..20]
            .try_into()
            .map_err(|_| IpmiError::Session("Bad challenge string".to_string()))?;

        // Activate Session, authenticated with the temporary session id
        self.session.authtype = authtype;
        self.session.session_id = temp_session_id;
        self.session.out_seq = 0;
        let initial_in_seq: u32 = rand::thread_rng().gen();
        let mut data = vec![authtype, privlvl];
        data.extend_from_slice(&challenge);
        data.extend_from_slice(&initial_in_seq.to_le_bytes());
        let rsp = self.direct_request(IPMI_NETFN_APP, IPMI_ACTIVATE_SESSION, data)?;
        if rsp.ccode != 0 || rsp.data.len() < 10 {
            self.session = LanSession::default();
            return Err(IpmiError::Session(format!(
                "Activate Session failed: {}",
                crate::error::val2str(rsp.ccode, &crate::error::COMPLETION_CODE_VALS)
            )));
        }
        if rsp.data[0] != authtype {
            debug2!(
                "lan: BMC switched session authtype to {}",
                auth_type_name(rsp.data[0])
            );
            self.session.authtype = rsp.data[0];
        }
        self.session.session_id =
            u32::from_le_bytes([rsp.data[1], rsp.data[2], rsp.data[3], rsp.data[4]]);
        let mut out_seq = u32::from_le_bytes([rsp.data[5], rsp.data[6], rsp.data[7], rsp.data[8]]);
        if out_seq == 0 {
            out_seq = 1;
        }
        self.session.out_seq = out_seq;
        self.session.in_seq = initial_in_seq;
        self.session.active = true;

        if auth_status & IPMI_AUTHSTATUS_PER_MSG_DISABLED != 0 {
            debug2!("lan: per-message authentication disabled by BMC");
            self.session.authtype = IPMI_SESSION_AUTHTYPE_NONE;
        }

        // Set Session Privilege Level
        let rsp = self.direct_request(IPMI_NETFN_APP, IPMI_SET_SESSION_PRIVLVL, vec![privlvl])?;
        if rsp.ccode != 0 {
            let err = IpmiError::Session(format!(
                "Set Session Privilege Level to {:#04x} failed: {}",
                privlvl,
                crate::error::val2str(rsp.ccode, &crate::error::COMPLETION_CODE_VALS)
            ));
            self.close_session();
            return Err(err);
        }

        log::info!(
            "lan: session {:#010x} active ({})",
            self.session.session_id,
            auth_type_name(self.session.authtype)
        );
        Ok(())
    }

    fn close_session(&mut self) {
        if !self.session.active {
            return;
        }
        let sid = self.session.session_id;
        let _ = self.direct_request(
            IPMI_NETFN_APP,
            IPMI_CLOSE_SESSION,
            sid.to_le_bytes().to_vec(),
        );
        self.session = LanSession::default();
    }
}

impl IpmiIntf for LanIntf {
    fn context(&mut self) -> &mut IpmiContext {
        &mut self.context
    }

    fn setup(&mut self) -> IpmiResult<()> {
        self.context.protocol.max_request_data_size = IPMI_LAN_MAX_REQUEST_SIZE;
        self.context.protocol.max_response_data_size = IPMI_LAN_MAX_RESPONSE_SIZE;
        if self.context.ssn_params.retry <= 0 {
            self.context.ssn_params.retry = IPMI_LAN_RETRY;
        }
        if self.context.ssn_params.timeout == 0 {
            self.context.ssn_params.timeout = IPMI_LAN_TIMEOUT;
        }
        Ok(())
    }

    fn open(&mut self) -> IpmiResult<()> {
        if self.opened {
            return Ok(());
        }
        let hostname = self.context.ssn_params.hostname.clone();
        if hostname.is_empty() {
            return Err(IpmiError::Network(
                "Hostname (-H) required for LAN interface".to_string(),
            ));
        }
        let port = if self.context.ssn_params.port != 0 {
            self.context.ssn_params.port
        } else {
            IPMI_LAN_PORT
        };
        let remote: SocketAddr = (hostname.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| IpmiError::Network(format!("Address lookup for {} failed: {}", hostname, e)))?
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

        if let Err(e) = self.ping().and_then(|_| self.activate_session()) {
            self.close();
            return Err(e);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.close_session();
        self.socket = None;
        self.opened = false;
    }

    fn sendrecv(&mut self, req: &IpmiRq) -> Option<IpmiRs> {
        if !self.opened {
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
        if !self.session.active {
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
        self.context.protocol.max_request_data_size = size.min(IPMI_LAN_MAX_REQUEST_SIZE);
    }

    fn set_max_response_size(&mut self, size: u16) {
        self.context.protocol.max_response_data_size = size.min(IPMI_LAN_MAX_RESPONSE_SIZE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipmi::intf::IPMI_SESSION_AUTHTYPE_MD5;

    fn reply_hdr_for(req: &IpmbMsgHdr, data: Vec<u8>) -> IpmbMsgHdr {
        IpmbMsgHdr {
            rs_addr: req.rq_addr,
            netfn_lun: ((req.netfn_lun | 0x04) & 0xfc) | (req.seq_lun & 0x03),
            rq_addr: req.rs_addr,
            seq_lun: (req.seq_lun & 0xfc) | (req.netfn_lun & 0x03),
            cmd: req.cmd,
            data,
        }
    }

    fn wrap_plain(frame: &[u8]) -> Vec<u8> {
        let mut packet = Vec::new();
        packet.extend_from_slice(&RmcpHeader::new_ipmi().to_bytes());
        packet.extend_from_slice(&[0u8; SESSION_HDR_LEN]);
        packet.push(frame.len() as u8);
        packet.extend_from_slice(frame);
        packet
    }

    #[test]
    fn test_pre_session_packet_shape() {
        let intf = LanIntf::new(IpmiContext::new());
        let frame = IpmbMsgHdr {
            rs_addr: 0x20,
            netfn_lun: 0x18,
            rq_addr: 0x81,
            seq_lun: 0x00,
            cmd: 0x01,
            data: vec![],
        }
        .serialize();
        let packet = intf.build_packet(&frame).unwrap();
        assert_eq!(&packet[0..4], &[0x06, 0x00, 0xff, 0x07]);
        // authtype NONE, seq 0, session id 0, no authcode
        assert_eq!(&packet[4..13], &[0u8; 9]);
        assert_eq!(packet[13] as usize, frame.len());
        assert_eq!(&packet[14..], &frame[..]);
    }

    #[test]
    fn test_in_session_packet_carries_authcode() {
        let mut intf = LanIntf::new(IpmiContext::new());
        intf.context.session_set_password(Some("admin"));
        intf.session.active = true;
        intf.session.authtype = IPMI_SESSION_AUTHTYPE_MD5;
        intf.session.session_id = 0x02000300;
        intf.session.out_seq = 5;

        let frame = [0x20, 0x18, 0xc8, 0x81, 0x00, 0x01, 0x7e];
        let packet = intf.build_packet(&frame).unwrap();
        assert_eq!(packet[4], IPMI_SESSION_AUTHTYPE_MD5);
        assert_eq!(&packet[5..9], &5u32.to_le_bytes());
        assert_eq!(&packet[9..13], &0x02000300u32.to_le_bytes());
        assert_eq!(packet.len(), 4 + 9 + 16 + 1 + frame.len());
        assert_eq!(packet[29] as usize, frame.len());

        let key = auth::pad_password(b"admin");
        let expect =
            auth::lan_authcode(IPMI_SESSION_AUTHTYPE_MD5, &key, 0x02000300, 5, &frame).unwrap();
        assert_eq!(&packet[13..29], &expect);
    }

    #[test]
    fn test_parse_packet_skips_authcode() {
        let mut intf = LanIntf::new(IpmiContext::new());
        let frame = IpmbMsgHdr {
            rs_addr: 0x81,
            netfn_lun: 0x1c,
            rq_addr: 0x20,
            seq_lun: 0x00,
            cmd: 0x01,
            data: vec![0x00],
        }
        .serialize();

        let mut packet = Vec::new();
        packet.extend_from_slice(&RmcpHeader::new_ipmi().to_bytes());
        packet.push(IPMI_SESSION_AUTHTYPE_MD5);
        packet.extend_from_slice(&9u32.to_le_bytes());
        packet.extend_from_slice(&0x1234u32.to_le_bytes());
        packet.extend_from_slice(&[0xaa; 16]); // inbound authcode, not verified
        packet.push(frame.len() as u8);
        packet.extend_from_slice(&frame);

        let hdr = intf.parse_packet(&packet).expect("parse");
        assert_eq!(hdr.cmd, 0x01);
        assert_eq!(intf.session.in_seq, 9);
    }

    #[test]
    fn test_parse_packet_rejects_non_ipmi() {
        let mut intf = LanIntf::new(IpmiContext::new());
        assert!(intf.parse_packet(&build_asf_ping(1)).is_none());
        assert!(intf.parse_packet(&[0x06, 0x00, 0xff, 0x07, 0x00]).is_none());
    }

    #[test]
    fn test_sendrecv_over_loopback() {
        let bmc = UdpSocket::bind("127.0.0.1:0").unwrap();
        let bmc_addr = bmc.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.connect(bmc_addr).unwrap();

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 512];
            let (len, from) = bmc.recv_from(&mut buf).unwrap();
            let flen = buf[13] as usize;
            let req = IpmbMsgHdr::parse(&buf[14..14 + flen]).unwrap();
            assert_eq!(len, 14 + flen);
            let reply = reply_hdr_for(&req, vec![0x00, 0x20, 0x81]);
            bmc.send_to(&wrap_plain(&reply.serialize()), from).unwrap();
        });

        let mut ctx = IpmiContext::new();
        ctx.ssn_params.timeout = 2;
        ctx.ssn_params.retry = 1;
        let mut intf = LanIntf::new_for_test(client, ctx, Arc::new(AtomicBool::new(false)));

        let rq = IpmiRq {
            msg: IpmiMessage::new(IPMI_NETFN_APP, BMC_GET_DEVICE_ID),
        };
        let rsp = intf.sendrecv(&rq).expect("response expected");
        assert_eq!(rsp.ccode, 0);
        assert_eq!(rsp.data, vec![0x20, 0x81]);
        handle.join().unwrap();
    }

    #[test]
    fn test_transaction_times_out_without_bmc() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.connect(peer.local_addr().unwrap()).unwrap();

        let mut ctx = IpmiContext::new();
        ctx.ssn_params.timeout = 1;
        ctx.ssn_params.retry = 1;
        let mut intf = LanIntf::new_for_test(client, ctx, Arc::new(AtomicBool::new(false)));

        let rq = IpmiRq {
            msg: IpmiMessage::new(IPMI_NETFN_APP, BMC_GET_DEVICE_ID),
        };
        assert!(intf.sendrecv(&rq).is_none());
    }
}
