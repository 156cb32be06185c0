/*
 * SPDX-FileCopyrightText: 2025 UnionTech Software Technology Co., Ltd.
 *
 * SPDX-License-Identifier: GPL-2.0-or-later
 */

//! IPMI-over-serial Terminal Mode: ASCII hex pairs bracketed by `[` and `]`,
//! CR/LF terminated, with `[ERR xx]` negative acknowledgements.

use std::fs::File;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{IpmiError, IpmiResult};
use crate::ipmi::context::IpmiContext;
use crate::ipmi::intf::IpmiIntf;
use crate::ipmi::ipmb::{
    response_from_hdr, CorrelationContext, IpmbMsgHdr, SeqAllocator, IPMB_CHANNEL_TRACKING,
};
use crate::ipmi::ipmi::{IpmiRq, IpmiRs, IPMI_NETFN_APP, IPMI_REMOTE_SWID, IPMI_SEND_MESSAGE};
use crate::{debug2, debug3};

use super::{
    flush_input, open_serial, parse_spec, wait_readable, SerialSpec, SERIAL_DEFAULT_RETRY,
    SERIAL_DEFAULT_TIMEOUT,
};

/// Terminal Mode caps from the IPMI spec: 33-byte requests, 32-byte responses.
pub const SERIAL_TM_MAX_RQ_SIZE: u16 = 33;
pub const SERIAL_TM_MAX_RS_SIZE: u16 = 32;

/// Terminal message header: netFn|LUN, seq|bridge, cmd.
pub const TM_HDR_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum TmFrame {
    Msg(Vec<u8>),
    Nack(u8),
}

pub fn tm_encode(msg: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(msg.len() * 2 + 4);
    out.push(b'[');
    for b in msg {
        out.extend_from_slice(format!("{:02x}", b).as_bytes());
    }
    out.push(b']');
    out.extend_from_slice(b"\r\n");
    out
}

/// Byte-at-a-time bracket decoder. Bytes outside brackets are ignored;
/// whitespace between hex pairs is tolerated on receive.
#[derive(Default)]
pub struct TmDecoder {
    active: bool,
    buf: String,
}

impl TmDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, byte: u8) -> Option<TmFrame> {
        match byte {
            b'[' => {
                self.active = true;
                self.buf.clear();
                None
            }
            b']' if self.active => {
                self.active = false;
                let content = std::mem::take(&mut self.buf);
                Self::parse_content(&content)
            }
            _ if self.active => {
                self.buf.push(byte as char);
                None
            }
            _ => None,
        }
    }

    fn parse_content(content: &str) -> Option<TmFrame> {
        let trimmed = content.trim();
        if let Some(code) = trimmed.strip_prefix("ERR") {
            return match u8::from_str_radix(code.trim(), 16) {
                Ok(c) => Some(TmFrame::Nack(c)),
                Err(_) => {
                    debug2!("serial tm: malformed ERR reply '{}'", trimmed);
                    None
                }
            };
        }
        let hex: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
        if hex.len() % 2 != 0 {
            debug2!("serial tm: odd hex digit count, frame dropped");
            return None;
        }
        let mut msg = Vec::with_capacity(hex.len() / 2);
        for pair in hex.as_bytes().chunks(2) {
            let s = std::str::from_utf8(pair).ok()?;
            match u8::from_str_radix(s, 16) {
                Ok(b) => msg.push(b),
                Err(_) => {
                    debug2!("serial tm: non-hex byte in frame, dropped");
                    return None;
                }
            }
        }
        Some(TmFrame::Msg(msg))
    }
}

/// Header fields needed to recognize a Terminal-Mode reply.
#[derive(Debug, Clone, Copy)]
struct TmCorrelation {
    netfn_lun: u8,
    seq: u8,
    cmd: u8,
}

impl TmCorrelation {
    fn matches(&self, hdr: &[u8]) -> bool {
        hdr.len() >= TM_HDR_LEN
            && hdr[0] == (self.netfn_lun | 0x04)
            && hdr[1] >> 2 == self.seq
            && hdr[2] == self.cmd
    }
}

enum RecvEvent {
    Matched(Vec<u8>),
    Nack(u8),
    Timeout,
}

pub struct SerialTerminalIntf {
    spec: SerialSpec,
    file: Option<File>,
    opened: bool,
    seq: SeqAllocator,
    abort: Arc<AtomicBool>,
    decoder: TmDecoder,
    rx: std::collections::VecDeque<u8>,
    context: IpmiContext,
}

struct BuiltTm {
    msg: Vec<u8>,
    correlation: TmCorrelation,
    inner_ctx: Option<CorrelationContext>,
    bridging_level: u8,
}

impl SerialTerminalIntf {
    pub fn new(devspec: &str, ctx: IpmiContext) -> IpmiResult<Self> {
        Ok(Self {
            spec: parse_spec(devspec)?,
            file: None,
            opened: false,
            seq: SeqAllocator::new(),
            abort: crate::signal::ABORT_FLAG.clone(),
            decoder: TmDecoder::new(),
            rx: std::collections::VecDeque::new(),
            context: ctx,
        })
    }

    #[cfg(test)]
    fn new_for_test(file: File, ctx: IpmiContext, abort: Arc<AtomicBool>) -> Self {
        Self {
            spec: SerialSpec {
                device: "test".to_string(),
                baud: nix::sys::termios::BaudRate::B9600,
                is_system: false,
            },
            file: Some(file),
            opened: true,
            seq: SeqAllocator::new(),
            abort,
            decoder: TmDecoder::new(),
            rx: std::collections::VecDeque::new(),
            context: ctx,
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
            SERIAL_DEFAULT_RETRY
        }
    }

    /// Lay out the terminal message. Bridged requests carry a Send Message
    /// body: channel byte plus the nested IPMB envelope(s); the bridge field
    /// of the seq byte is set so the BMC routes the eventual inner response
    /// back over the terminal link.
    fn build_tm(&mut self, req: &IpmiRq) -> IpmiResult<BuiltTm> {
        let bridging_level = self.context.get_bridging_level();
        let my_addr = if self.context.my_addr() != 0 {
            self.context.my_addr() as u8
        } else {
            IPMI_REMOTE_SWID
        };

        let mut inner_ctx = None;
        let (netfn_lun, cmd, bridge_bits, body) = if bridging_level == 0 {
            (req.msg.netfn_lun, req.msg.cmd, 0u8, req.msg.data.clone())
        } else {
            let inner = IpmbMsgHdr {
                rs_addr: self.context.target_addr() as u8,
                netfn_lun: req.msg.netfn_lun,
                rq_addr: my_addr,
                seq_lun: self.seq.next() << 2,
                cmd: req.msg.cmd,
                data: req.msg.data.clone(),
            };
            inner_ctx = Some(CorrelationContext {
                rs_addr: inner.rs_addr,
                netfn_lun: inner.netfn_lun,
                rq_addr: inner.rq_addr,
                seq_lun: inner.seq_lun,
                cmd: inner.cmd,
            });
            let mut frame = inner.serialize();

            if bridging_level == 2 {
                let mut mid_data =
                    vec![IPMB_CHANNEL_TRACKING | (self.context.target_channel() & 0x0f)];
                mid_data.extend_from_slice(&frame);
                let middle = IpmbMsgHdr {
                    rs_addr: self.context.transit_addr() as u8,
                    netfn_lun: IPMI_NETFN_APP << 2,
                    rq_addr: my_addr,
                    seq_lun: self.seq.next() << 2,
                    cmd: IPMI_SEND_MESSAGE,
                    data: mid_data,
                };
                frame = middle.serialize();
            }

            let channel = if bridging_level == 2 {
                self.context.transit_channel()
            } else {
                self.context.target_channel()
            };
            let mut body = vec![IPMB_CHANNEL_TRACKING | (channel & 0x0f)];
            body.extend_from_slice(&frame);
            (IPMI_NETFN_APP << 2, IPMI_SEND_MESSAGE, 0x01, body)
        };

        let seq = self.seq.next();
        let mut msg = Vec::with_capacity(TM_HDR_LEN + body.len());
        msg.push(netfn_lun);
        msg.push(seq << 2 | bridge_bits);
        msg.push(cmd);
        msg.extend_from_slice(&body);

        if msg.len() > SERIAL_TM_MAX_RQ_SIZE as usize {
            return Err(IpmiError::InvalidData(format!(
                "Terminal-Mode request ({} bytes) exceeds {} byte maximum",
                msg.len(),
                SERIAL_TM_MAX_RQ_SIZE
            )));
        }

        Ok(BuiltTm {
            msg,
            correlation: TmCorrelation { netfn_lun, seq, cmd },
            inner_ctx,
            bridging_level,
        })
    }

    fn send_msg(&self, msg: &[u8]) -> IpmiResult<()> {
        let wire = tm_encode(msg);
        debug3!("serial tm tx: {}", String::from_utf8_lossy(&wire).trim_end());
        let mut file: &File = self
            .file
            .as_ref()
            .ok_or_else(|| IpmiError::Interface("serial port not open".to_string()))?;
        file.write_all(&wire)?;
        file.flush()?;
        Ok(())
    }

    fn read_event(
        &mut self,
        correlation: &TmCorrelation,
        deadline: Instant,
    ) -> IpmiResult<RecvEvent> {
        let mut chunk = [0u8; 256];

        loop {
            while let Some(b) = self.rx.pop_front() {
                match self.decoder.feed(b) {
                    Some(TmFrame::Nack(code)) => return Ok(RecvEvent::Nack(code)),
                    Some(TmFrame::Msg(msg)) => {
                        debug3!("serial tm rx: {:02x?}", msg);
                        if msg.len() > SERIAL_TM_MAX_RS_SIZE as usize + TM_HDR_LEN {
                            debug2!("serial tm: oversized response dropped");
                        } else if correlation.matches(&msg) {
                            return Ok(RecvEvent::Matched(msg));
                        } else {
                            debug2!("serial tm: unrelated message discarded");
                        }
                    }
                    None => {}
                }
            }

            if self.abort.load(Ordering::SeqCst) {
                return Ok(RecvEvent::Timeout);
            }
            let mut file: &File = self
                .file
                .as_ref()
                .ok_or_else(|| IpmiError::Interface("serial port not open".to_string()))?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !wait_readable(file, remaining)? {
                return Ok(RecvEvent::Timeout);
            }
            let n = file.read(&mut chunk)?;
            if n == 0 {
                return Err(IpmiError::System("serial port closed".to_string()));
            }
            self.rx.extend(&chunk[..n]);
        }
    }

    fn attempt(&mut self, built: &BuiltTm, deadline: Instant) -> IpmiResult<Option<IpmiRs>> {
        let msg = match self.read_event(&built.correlation, deadline)? {
            RecvEvent::Matched(msg) => msg,
            RecvEvent::Nack(code) => {
                log::warn!("serial tm: BMC NACK [ERR {:02x}], retrying", code);
                if let Some(file) = self.file.as_ref() {
                    flush_input(file);
                }
                return Ok(None); // consumes a retry
            }
            RecvEvent::Timeout => return Ok(None),
        };

        if msg.len() <= TM_HDR_LEN {
            return Err(IpmiError::InvalidData(
                "Terminal-Mode response carries no completion code".to_string(),
            ));
        }

        if built.bridging_level == 0 {
            let mut rsp = IpmiRs {
                ccode: msg[TM_HDR_LEN],
                data: msg[TM_HDR_LEN + 1..].to_vec(),
                ..Default::default()
            };
            rsp.msg.netfn = msg[0] >> 2;
            rsp.msg.lun = msg[0] & 0x03;
            rsp.msg.seq = msg[1] >> 2;
            rsp.msg.cmd = msg[2];
            return Ok(Some(rsp));
        }

        // Send Message ack first; a bad ccode fails the transaction here
        if msg[TM_HDR_LEN] != 0 {
            let rsp = IpmiRs {
                ccode: msg[TM_HDR_LEN],
                ..Default::default()
            };
            return Ok(Some(rsp));
        }

        // then the bridged inner response as a second terminal message
        let inner_ctx = built.inner_ctx.ok_or_else(|| {
            IpmiError::InvalidData("missing inner correlation context".to_string())
        })?;
        loop {
            let msg = match self.read_event_any(deadline)? {
                Some(msg) => msg,
                None => return Ok(None),
            };
            if msg.len() <= TM_HDR_LEN {
                continue;
            }
            match IpmbMsgHdr::parse(&msg[TM_HDR_LEN..]) {
                Ok(inner) if inner_ctx.matches(&inner) => {
                    return Ok(Some(response_from_hdr(inner)))
                }
                Ok(_) => debug2!("serial tm: unrelated bridged message discarded"),
                Err(e) => debug2!("serial tm: bad bridged payload: {}", e),
            }
        }
    }

    /// Read any complete terminal message (bridged responses carry their own
    /// IPMB correlation, so the terminal header is not matched here).
    fn read_event_any(&mut self, deadline: Instant) -> IpmiResult<Option<Vec<u8>>> {
        let mut chunk = [0u8; 256];
        loop {
            while let Some(b) = self.rx.pop_front() {
                match self.decoder.feed(b) {
                    Some(TmFrame::Msg(msg)) => return Ok(Some(msg)),
                    Some(TmFrame::Nack(code)) => {
                        log::warn!("serial tm: BMC NACK [ERR {:02x}]", code);
                        return Ok(None);
                    }
                    None => {}
                }
            }
            if self.abort.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let mut file: &File = self
                .file
                .as_ref()
                .ok_or_else(|| IpmiError::Interface("serial port not open".to_string()))?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !wait_readable(file, remaining)? {
                return Ok(None);
            }
            let n = file.read(&mut chunk)?;
            if n == 0 {
                return Err(IpmiError::System("serial port closed".to_string()));
            }
            self.rx.extend(&chunk[..n]);
        }
    }
}

impl IpmiIntf for SerialTerminalIntf {
    fn context(&mut self) -> &mut IpmiContext {
        &mut self.context
    }

    fn setup(&mut self) -> IpmiResult<()> {
        self.context.protocol.max_request_data_size = SERIAL_TM_MAX_RQ_SIZE;
        self.context.protocol.max_response_data_size = SERIAL_TM_MAX_RS_SIZE;
        if self.context.ssn_params.retry <= 0 {
            self.context.ssn_params.retry = SERIAL_DEFAULT_RETRY;
        }
        if self.context.ssn_params.timeout == 0 {
            self.context.ssn_params.timeout = SERIAL_DEFAULT_TIMEOUT;
        }
        Ok(())
    }

    fn open(&mut self) -> IpmiResult<()> {
        if self.opened {
            return Ok(());
        }
        self.file = Some(open_serial(&self.spec)?);
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) {
        self.file = None;
        self.opened = false;
    }

    fn sendrecv(&mut self, req: &IpmiRq) -> Option<IpmiRs> {
        if !self.opened && self.open().is_err() {
            return None;
        }

        let retry = self.retry_budget();
        let timeout = self.timeout();

        for attempt in 0..retry {
            if attempt > 0 && self.abort.load(Ordering::SeqCst) {
                break;
            }
            let built = match self.build_tm(req) {
                Ok(b) => b,
                Err(e) => {
                    log::error!("{}", e);
                    return None;
                }
            };
            if let Err(e) = self.send_msg(&built.msg) {
                log::error!("{}", e);
                return None;
            }

            let deadline = Instant::now() + timeout;
            match self.attempt(&built, deadline) {
                Ok(Some(rsp)) => return Some(rsp),
                Ok(None) => {
                    debug2!("serial tm: no response, attempt {}/{}", attempt + 1, retry);
                }
                Err(e) => {
                    log::error!("{}", e);
                    return None;
                }
            }
        }
        None
    }

    fn keepalive(&mut self) -> IpmiResult<()> {
        Ok(())
    }

    fn set_my_addr(&mut self, addr: u8) -> IpmiResult<()> {
        self.context.set_my_addr(addr as u32);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipmi::ipmi::{IpmiMessage, BMC_GET_DEVICE_ID};
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixStream;

    fn feed_all(decoder: &mut TmDecoder, bytes: &[u8]) -> Option<TmFrame> {
        let mut out = None;
        for &b in bytes {
            if let Some(f) = decoder.feed(b) {
                out = Some(f);
            }
        }
        out
    }

    #[test]
    fn test_tm_encode_shape() {
        assert_eq!(tm_encode(&[0x18, 0x00, 0x01]), b"[180001]\r\n".to_vec());
    }

    #[test]
    fn test_tm_decode_round_trip() {
        let msg = vec![0x1c, 0x00, 0x01, 0x00, 0xff];
        let mut decoder = TmDecoder::new();
        assert_eq!(
            feed_all(&mut decoder, &tm_encode(&msg)),
            Some(TmFrame::Msg(msg))
        );
    }

    #[test]
    fn test_tm_decode_tolerates_whitespace() {
        let mut decoder = TmDecoder::new();
        assert_eq!(
            feed_all(&mut decoder, b"[1c 00 01  00]\r\n"),
            Some(TmFrame::Msg(vec![0x1c, 0x00, 0x01, 0x00]))
        );
    }

    #[test]
    fn test_tm_decode_err_is_nack() {
        let mut decoder = TmDecoder::new();
        assert_eq!(feed_all(&mut decoder, b"[ERR 70]\r\n"), Some(TmFrame::Nack(0x70)));
    }

    #[test]
    fn test_tm_decode_ignores_noise_between_frames() {
        let mut decoder = TmDecoder::new();
        assert_eq!(
            feed_all(&mut decoder, b"garbage[1c0001 00]junk"),
            Some(TmFrame::Msg(vec![0x1c, 0x00, 0x01, 0x00]))
        );
    }

    fn link() -> (File, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        b.set_nonblocking(true).unwrap();
        (File::from(OwnedFd::from(a)), b)
    }

    fn test_intf(ctx: IpmiContext, abort: Arc<AtomicBool>) -> (SerialTerminalIntf, UnixStream) {
        let (file, peer) = link();
        let mut intf = SerialTerminalIntf::new_for_test(file, ctx, abort);
        intf.context.ssn_params.timeout = 0;
        (intf, peer)
    }

    fn drain(peer: &mut UnixStream) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 512];
        while let Ok(n) = peer.read(&mut buf) {
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn test_sendrecv_direct() {
        let (mut intf, mut peer) = test_intf(IpmiContext::new(), Arc::new(AtomicBool::new(false)));
        intf.context.ssn_params.retry = 1;

        // reply to seq 0: netfn|1, seq, cmd, ccode, data
        peer.write_all(&tm_encode(&[0x1c, 0x00, 0x01, 0x00, 0x20, 0x05]))
            .unwrap();

        let rq = IpmiRq {
            msg: IpmiMessage::new(IPMI_NETFN_APP, BMC_GET_DEVICE_ID),
        };
        let rsp = intf.sendrecv(&rq).expect("response expected");
        assert_eq!(rsp.ccode, 0);
        assert_eq!(rsp.data, vec![0x20, 0x05]);

        let sent = drain(&mut peer);
        assert_eq!(sent, b"[180001]\r\n".to_vec());
    }

    #[test]
    fn test_nack_consumes_retry() {
        let (mut intf, mut peer) = test_intf(IpmiContext::new(), Arc::new(AtomicBool::new(false)));
        intf.context.ssn_params.retry = 2;

        peer.write_all(b"[ERR 70]\r\n").unwrap();

        let rq = IpmiRq {
            msg: IpmiMessage::new(IPMI_NETFN_APP, BMC_GET_DEVICE_ID),
        };
        assert!(intf.sendrecv(&rq).is_none());

        // first attempt NACKed, second timed out: two requests on the wire
        let sent = drain(&mut peer);
        assert_eq!(sent.iter().filter(|&&b| b == b'[').count(), 2);
    }

    #[test]
    fn test_oversized_request_rejected() {
        let (mut intf, _peer) = test_intf(IpmiContext::new(), Arc::new(AtomicBool::new(false)));
        let mut rq = IpmiRq {
            msg: IpmiMessage::new(IPMI_NETFN_APP, BMC_GET_DEVICE_ID),
        };
        rq.msg.data = vec![0u8; SERIAL_TM_MAX_RQ_SIZE as usize];
        assert!(intf.sendrecv(&rq).is_none());
    }

    #[test]
    fn test_bridged_request_wraps_send_message() {
        let mut ctx = IpmiContext::new();
        ctx.set_my_addr(0x81);
        ctx.set_target_addr(0x72);
        ctx.set_target_channel(7);
        let (mut intf, _peer) = test_intf(ctx, Arc::new(AtomicBool::new(false)));

        let rq = IpmiRq {
            msg: IpmiMessage::new(IPMI_NETFN_APP, BMC_GET_DEVICE_ID),
        };
        let built = intf.build_tm(&rq).unwrap();
        assert_eq!(built.bridging_level, 1);
        assert_eq!(built.msg[0], 0x18);
        assert_eq!(built.msg[1] & 0x03, 0x01); // bridge field
        assert_eq!(built.msg[2], IPMI_SEND_MESSAGE);
        assert_eq!(built.msg[3], IPMB_CHANNEL_TRACKING | 0x07);
        let inner = IpmbMsgHdr::parse(&built.msg[4..]).unwrap();
        assert_eq!(inner.rs_addr, 0x72);
        assert_eq!(inner.cmd, BMC_GET_DEVICE_ID);
        assert!(built.inner_ctx.unwrap().matches(&IpmbMsgHdr {
            rs_addr: 0x81,
            netfn_lun: 0x1c,
            rq_addr: 0x72,
            seq_lun: 0x00,
            cmd: BMC_GET_DEVICE_ID,
            data: vec![0x00],
        }));
    }
}
