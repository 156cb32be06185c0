/*
 * SPDX-FileCopyrightText: 2025 UnionTech Software Technology Co., Ltd.
 *
 * SPDX-License-Identifier: GPL-2.0-or-later
 */

//! IPMI-over-serial Basic Mode: binary framing with byte stuffing, plus the
//! driver that runs the build/send/correlate retry loop over it.

use std::fs::File;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{IpmiError, IpmiResult};
use crate::helper::buf2str;
use crate::ipmi::context::IpmiContext;
use crate::ipmi::intf::IpmiIntf;
use crate::ipmi::ipmb::{
    build_msg, response_from_hdr, BuiltRequest, CorrelationContext, IpmbMsgHdr, SeqAllocator,
    IPMB_MIN_FRAME,
};
use crate::ipmi::ipmi::{IpmiRq, IpmiRs, IPMI_GET_MESSAGE, IPMI_NETFN_APP};
use crate::{debug2, debug3};

use super::{
    open_serial, parse_spec, wait_readable, SerialSpec, SERIAL_DEFAULT_RETRY,
    SERIAL_DEFAULT_TIMEOUT,
};

pub const BM_START: u8 = 0xa0;
pub const BM_STOP: u8 = 0xa5;
pub const BM_HANDSHAKE: u8 = 0xa6;
pub const BM_ESCAPE: u8 = 0xaa;
pub const ASCII_ESC: u8 = 0x1b;

/// Whole-message cap on the wire (unescaped bytes between start and stop).
pub const SERIAL_BM_MAX_MSG_SIZE: usize = 47;
/// Request data cap: message cap minus the 7 framing/header bytes.
pub const SERIAL_BM_MAX_RQ_SIZE: u16 = 40;
/// Response data cap: one more byte consumed by the completion code.
pub const SERIAL_BM_MAX_RS_SIZE: u16 = 39;

pub const IPMI_CC_NO_QUEUED_MESSAGES: u8 = 0x80;

/// Substitution for a reserved byte value, applied after the 0xAA marker.
fn escape_for(byte: u8) -> Option<u8> {
    match byte {
        BM_START => Some(0xb0),
        BM_STOP => Some(0xb5),
        BM_HANDSHAKE => Some(0xb6),
        BM_ESCAPE => Some(0xba),
        ASCII_ESC => Some(0x3b),
        _ => None,
    }
}

fn unescape_for(byte: u8) -> Option<u8> {
    match byte {
        0xb0 => Some(BM_START),
        0xb5 => Some(BM_STOP),
        0xb6 => Some(BM_HANDSHAKE),
        0xba => Some(BM_ESCAPE),
        0x3b => Some(ASCII_ESC),
        _ => None,
    }
}

/// Frame a message: start byte, stuffed body, stop byte.
pub fn encode(msg: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(msg.len() + 2);
    out.push(BM_START);
    for &b in msg {
        match escape_for(b) {
            Some(esc) => {
                out.push(BM_ESCAPE);
                out.push(esc);
            }
            None => out.push(b),
        }
    }
    out.push(BM_STOP);
    out
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecodeState {
    None,
    InProgress,
    Done,
}

/// Byte-at-a-time frame reassembler. Bytes outside a frame are ignored so the
/// decoder resynchronizes on the next start byte.
pub struct FrameDecoder {
    state: DecodeState,
    escaping: bool,
    buf: Vec<u8>,
    max_len: usize,
}

impl FrameDecoder {
    pub fn new(max_len: usize) -> Self {
        Self {
            state: DecodeState::None,
            escaping: false,
            buf: Vec::with_capacity(max_len),
            max_len,
        }
    }

    pub fn reset(&mut self) {
        self.state = DecodeState::None;
        self.escaping = false;
        self.buf.clear();
    }

    /// Feed one wire byte; returns the unescaped message when a stop byte
    /// completes a frame.
    pub fn feed(&mut self, byte: u8) -> Option<Vec<u8>> {
        if byte == BM_START {
            self.reset();
            self.state = DecodeState::InProgress;
            return None;
        }
        if self.state != DecodeState::InProgress {
            return None;
        }

        if self.escaping {
            self.escaping = false;
            match unescape_for(byte) {
                Some(b) => self.push_byte(b),
                None => {
                    debug3!("serial bm: illegal escape code 0x{:02x}", byte);
                    self.reset();
                }
            }
            return None;
        }

        match byte {
            BM_ESCAPE => {
                self.escaping = true;
                None
            }
            BM_HANDSHAKE => None, // keepalive, not data
            BM_STOP => {
                self.state = DecodeState::Done;
                let msg = std::mem::take(&mut self.buf);
                self.reset();
                Some(msg)
            }
            b => {
                self.push_byte(b);
                None
            }
        }
    }

    fn push_byte(&mut self, byte: u8) {
        if self.buf.len() >= self.max_len {
            debug3!("serial bm: message exceeds {} bytes, dropped", self.max_len);
            self.reset();
            return;
        }
        self.buf.push(byte);
    }
}

pub struct SerialBasicIntf {
    spec: SerialSpec,
    file: Option<File>,
    opened: bool,
    seq: SeqAllocator,
    abort: Arc<AtomicBool>,
    decoder: FrameDecoder,
    rx: std::collections::VecDeque<u8>,
    context: IpmiContext,
}

impl SerialBasicIntf {
    pub fn new(devspec: &str, ctx: IpmiContext) -> IpmiResult<Self> {
        Ok(Self {
            spec: parse_spec(devspec)?,
            file: None,
            opened: false,
            seq: SeqAllocator::new(),
            abort: crate::signal::ABORT_FLAG.clone(),
            decoder: FrameDecoder::new(SERIAL_BM_MAX_MSG_SIZE),
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
            decoder: FrameDecoder::new(SERIAL_BM_MAX_MSG_SIZE),
            rx: std::collections::VecDeque::new(),
            context: ctx,
        }
    }

    // defaults are applied in setup(); an explicit zero means poll-only
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

    fn send_frame(&self, msg: &[u8]) -> IpmiResult<()> {
        let framed = encode(msg);
        debug3!("serial bm tx: {}", buf2str(&framed, framed.len()));
        let mut file: &File = self
            .file
            .as_ref()
            .ok_or_else(|| IpmiError::Interface("serial port not open".to_string()))?;
        file.write_all(&framed)?;
        file.flush()?;
        Ok(())
    }

    /// Read complete frames until one both verifies and matches `ctx`, or the
    /// deadline passes (`Ok(None)`). Malformed and unrelated frames are
    /// discarded without consuming a retry. Bytes beyond a matched frame stay
    /// queued for the next call (bridged responses arrive back to back).
    fn read_matched(
        &mut self,
        ctx: &CorrelationContext,
        deadline: Instant,
    ) -> IpmiResult<Option<(IpmbMsgHdr, Vec<u8>)>> {
        let mut chunk = [0u8; 256];

        loop {
            while let Some(b) = self.rx.pop_front() {
                let Some(raw) = self.decoder.feed(b) else {
                    continue;
                };
                debug3!("serial bm rx: {}", buf2str(&raw, raw.len()));
                match IpmbMsgHdr::parse(&raw) {
                    Ok(hdr) if ctx.matches(&hdr) => return Ok(Some((hdr, raw))),
                    Ok(_) => debug2!("serial bm: unrelated frame discarded"),
                    Err(e) => debug2!("serial bm: bad frame discarded: {}", e),
                }
            }

            if self.abort.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let mut file: &File = self
                .file
                .as_ref()
                .ok_or_else(|| IpmiError::Interface("serial port not open".to_string()))?;
            // past the deadline we still poll once to drain buffered data
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

    /// Dual-bridge piggyback: the inner response rides inside the outer ack
    /// at a fixed offset of 7 bytes from the start of the raw frame, losing
    /// 8 bytes of wrapper (header plus trailing checksum). Re-verified as a
    /// full envelope so a short or shifted wrapper fails instead of
    /// mis-correlating.
    fn slice_piggyback(raw: &[u8]) -> IpmiResult<IpmbMsgHdr> {
        if raw.len() < 8 + IPMB_MIN_FRAME {
            return Err(IpmiError::InvalidData(
                "bridged response too short for piggybacked payload".to_string(),
            ));
        }
        IpmbMsgHdr::parse(&raw[7..raw.len() - 1])
    }

    /// System-interface bridging: the bridged response lands in the BMC's
    /// receive queue and is drained with Get Message until the inner frame
    /// appears or the window closes.
    fn poll_get_message(
        &mut self,
        inner_ctx: &CorrelationContext,
        deadline: Instant,
    ) -> IpmiResult<Option<IpmiRs>> {
        // direct request, never bridged itself
        let mut direct = IpmiContext::new();
        direct.set_my_addr(self.context.my_addr());
        let mut rq = IpmiRq::default();
        rq.msg.netfn_lun = IPMI_NETFN_APP << 2;
        rq.msg.cmd = IPMI_GET_MESSAGE;

        while Instant::now() < deadline {
            if self.abort.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let built = build_msg(&direct, &rq, &mut self.seq, false, SERIAL_BM_MAX_MSG_SIZE)?;
            self.send_frame(&built.frame)?;
            let Some((hdr, _)) = self.read_matched(&built.contexts[0], deadline)? else {
                return Ok(None);
            };
            match hdr.data.first().copied() {
                Some(0) if hdr.data.len() > 2 => {
                    // data: ccode, channel byte, queued IPMB response frame
                    match IpmbMsgHdr::parse(&hdr.data[2..]) {
                        Ok(inner) if inner_ctx.matches(&inner) => {
                            return Ok(Some(response_from_hdr(inner)))
                        }
                        Ok(_) => debug2!("serial bm: queued message is not ours, dropped"),
                        Err(e) => debug2!("serial bm: bad queued message: {}", e),
                    }
                }
                Some(IPMI_CC_NO_QUEUED_MESSAGES) => {
                    std::thread::sleep(Duration::from_millis(100));
                }
                Some(cc) => {
                    return Err(IpmiError::CompletionCode(cc));
                }
                None => {
                    return Err(IpmiError::InvalidData(
                        "empty Get Message response".to_string(),
                    ))
                }
            }
        }
        Ok(None)
    }

    /// One full attempt: match the outer response, then run the bridged
    /// second phase that the depth and interface type call for.
    fn attempt(&mut self, built: &BuiltRequest, deadline: Instant) -> IpmiResult<Option<IpmiRs>> {
        let Some((outer, raw)) = self.read_matched(&built.contexts[0], deadline)? else {
            return Ok(None);
        };

        if built.bridging_level == 0 {
            return Ok(Some(response_from_hdr(outer)));
        }

        // outer frame is the Send Message ack; a bad ccode fails the
        // transaction at this level
        let outer_rsp = response_from_hdr(outer);
        if outer_rsp.fail() {
            return Ok(Some(outer_rsp));
        }

        if built.bridging_level == 2 {
            if !outer_rsp.data.is_empty() {
                let inner = Self::slice_piggyback(&raw)?;
                let inner_ctx = built.contexts.last().ok_or_else(|| {
                    IpmiError::InvalidData("missing inner correlation context".to_string())
                })?;
                if !inner_ctx.matches(&inner) {
                    return Err(IpmiError::InvalidData(
                        "piggybacked response does not match request".to_string(),
                    ));
                }
                return Ok(Some(response_from_hdr(inner)));
            }
            return Err(IpmiError::InvalidData(
                "dual-bridged ack carried no piggybacked response".to_string(),
            ));
        }

        let inner_ctx = built.contexts[1];
        if self.spec.is_system {
            return self.poll_get_message(&inner_ctx, deadline);
        }

        // single bridge: the target's response arrives as a second frame
        let Some((inner, _)) = self.read_matched(&inner_ctx, deadline)? else {
            return Ok(None);
        };
        Ok(Some(response_from_hdr(inner)))
    }
}

impl IpmiIntf for SerialBasicIntf {
    fn context(&mut self) -> &mut IpmiContext {
        &mut self.context
    }

    fn setup(&mut self) -> IpmiResult<()> {
        self.context.protocol.max_request_data_size = SERIAL_BM_MAX_RQ_SIZE;
        self.context.protocol.max_response_data_size = SERIAL_BM_MAX_RS_SIZE;
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
            // fresh sequence numbers every attempt
            let built = match build_msg(
                &self.context,
                req,
                &mut self.seq,
                self.spec.is_system,
                SERIAL_BM_MAX_MSG_SIZE,
            ) {
                Ok(b) => b,
                Err(e) => {
                    log::error!("{}", e);
                    return None;
                }
            };
            if let Err(e) = self.send_frame(&built.frame) {
                log::error!("{}", e);
                return None;
            }

            let deadline = Instant::now() + timeout;
            match self.attempt(&built, deadline) {
                Ok(Some(rsp)) => return Some(rsp),
                Ok(None) => {
                    debug2!("serial bm: no response, attempt {}/{}", attempt + 1, retry);
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
    use crate::ipmi::ipmb::ipmi_csum;
    use crate::ipmi::ipmi::{IpmiMessage, BMC_GET_DEVICE_ID};
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixStream;

    fn link() -> (File, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        b.set_nonblocking(true).unwrap();
        (File::from(OwnedFd::from(a)), b)
    }

    fn test_intf(ctx: IpmiContext, abort: Arc<AtomicBool>) -> (SerialBasicIntf, UnixStream) {
        let (file, peer) = link();
        let mut intf = SerialBasicIntf::new_for_test(file, ctx, abort);
        intf.context.ssn_params.timeout = 0; // immediate timeout in tests
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
    fn test_round_trip_framing_reserved_bytes() {
        let msg = vec![
            0x20, 0x18, BM_START, BM_STOP, BM_HANDSHAKE, BM_ESCAPE, ASCII_ESC, 0x00, 0xff,
        ];
        let wire = encode(&msg);
        let mut decoder = FrameDecoder::new(64);
        let mut decoded = None;
        for b in wire {
            if let Some(m) = decoder.feed(b) {
                decoded = Some(m);
            }
        }
        assert_eq!(decoded.unwrap(), msg);
    }

    #[test]
    fn test_decoder_resyncs_after_garbage() {
        let mut decoder = FrameDecoder::new(64);
        for b in [0x12u8, 0x34, 0xff] {
            assert!(decoder.feed(b).is_none());
        }
        let msg = vec![0x01, 0x02];
        let mut decoded = None;
        for b in encode(&msg) {
            if let Some(m) = decoder.feed(b) {
                decoded = Some(m);
            }
        }
        assert_eq!(decoded.unwrap(), msg);
    }

    #[test]
    fn test_decoder_rejects_illegal_escape() {
        let mut decoder = FrameDecoder::new(64);
        for b in [BM_START, 0x01, BM_ESCAPE, 0x99, 0x02, BM_STOP] {
            assert!(decoder.feed(b).is_none());
        }
        // frame was dropped; a new well-formed one still decodes
        let mut decoded = None;
        for b in encode(&[0x42]) {
            if let Some(m) = decoder.feed(b) {
                decoded = Some(m);
            }
        }
        assert_eq!(decoded.unwrap(), vec![0x42]);
    }

    #[test]
    fn test_decoder_enforces_max_len() {
        let mut decoder = FrameDecoder::new(4);
        let mut decoded = None;
        for b in encode(&[1, 2, 3, 4, 5, 6]) {
            if let Some(m) = decoder.feed(b) {
                decoded = Some(m);
            }
        }
        assert!(decoded.is_none());
    }

    #[test]
    fn test_direct_get_device_id_frame_shape() {
        let ctx = IpmiContext::new();
        let mut seq = SeqAllocator::new();
        let rq = IpmiRq {
            msg: IpmiMessage::new(IPMI_NETFN_APP, BMC_GET_DEVICE_ID),
        };
        let built = build_msg(&ctx, &rq, &mut seq, false, SERIAL_BM_MAX_MSG_SIZE).unwrap();
        let wire = encode(&built.frame);

        // A0 20 18 <csum1> 81 <seq|0> 01 <csum2> A5, no escapes needed
        assert_eq!(wire.len(), 9);
        assert_eq!(wire[0], BM_START);
        assert_eq!(wire[1], 0x20);
        assert_eq!(wire[2], 0x18);
        assert_eq!(wire[4], 0x81);
        assert_eq!(wire[6], 0x01);
        assert_eq!(wire[8], BM_STOP);
    }

    fn reply_wire_for(ctx: &CorrelationContext, data: &[u8]) -> Vec<u8> {
        let reply = IpmbMsgHdr {
            rs_addr: ctx.rq_addr,
            netfn_lun: ((ctx.netfn_lun | 0x04) & 0xfc) | (ctx.seq_lun & 0x03),
            rq_addr: ctx.rs_addr,
            seq_lun: (ctx.seq_lun & 0xfc) | (ctx.netfn_lun & 0x03),
            cmd: ctx.cmd,
            data: data.to_vec(),
        };
        encode(&reply.serialize())
    }

    #[test]
    fn test_sendrecv_returns_correlated_response() {
        let (mut intf, mut peer) = test_intf(IpmiContext::new(), Arc::new(AtomicBool::new(false)));
        intf.context.ssn_params.retry = 1;

        // first allocation in the driver will be seq 0
        let expect_ctx = CorrelationContext {
            rs_addr: 0x20,
            netfn_lun: 0x18,
            rq_addr: 0x81,
            seq_lun: 0x00,
            cmd: BMC_GET_DEVICE_ID,
        };
        // noise, then an unrelated frame, then the real answer
        peer.write_all(&[0x55, 0xaa]).ok();
        peer.write_all(&reply_wire_for(
            &CorrelationContext {
                cmd: 0x02,
                ..expect_ctx
            },
            &[0x00],
        ))
        .unwrap();
        peer.write_all(&reply_wire_for(&expect_ctx, &[0x00, 0x20, 0x81, 0x05]))
            .unwrap();

        let rq = IpmiRq {
            msg: IpmiMessage::new(IPMI_NETFN_APP, BMC_GET_DEVICE_ID),
        };
        let rsp = intf.sendrecv(&rq).expect("response expected");
        assert_eq!(rsp.ccode, 0);
        assert_eq!(rsp.data, vec![0x20, 0x81, 0x05]);

        let sent = drain(&mut peer);
        assert_eq!(sent.iter().filter(|&&b| b == BM_START).count(), 1);
    }

    #[test]
    fn test_retry_budget_exhaustion() {
        let (mut intf, mut peer) = test_intf(IpmiContext::new(), Arc::new(AtomicBool::new(false)));
        intf.context.ssn_params.retry = 3;

        let rq = IpmiRq {
            msg: IpmiMessage::new(IPMI_NETFN_APP, BMC_GET_DEVICE_ID),
        };
        assert!(intf.sendrecv(&rq).is_none());

        // exactly `retry` frames were emitted, each with a fresh sequence
        let sent = drain(&mut peer);
        assert_eq!(sent.iter().filter(|&&b| b == BM_START).count(), 3);
        let seqs: Vec<u8> = sent
            .split(|&b| b == BM_START)
            .filter(|f| f.len() > 5)
            .map(|f| f[4] >> 2)
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn test_abort_truncates_retries_to_one() {
        let abort = Arc::new(AtomicBool::new(true));
        let (mut intf, mut peer) = test_intf(IpmiContext::new(), abort);
        intf.context.ssn_params.retry = 5;

        let rq = IpmiRq {
            msg: IpmiMessage::new(IPMI_NETFN_APP, BMC_GET_DEVICE_ID),
        };
        assert!(intf.sendrecv(&rq).is_none());

        let sent = drain(&mut peer);
        assert_eq!(sent.iter().filter(|&&b| b == BM_START).count(), 1);
    }

    #[test]
    fn test_single_bridge_second_frame() {
        let mut ctx = IpmiContext::new();
        ctx.set_my_addr(0x81);
        ctx.set_target_addr(0x72);
        ctx.set_target_channel(7);
        let (mut intf, mut peer) = test_intf(ctx, Arc::new(AtomicBool::new(false)));
        intf.context.ssn_params.retry = 1;

        // driver allocates seq 0 for the inner envelope, seq 1 for the wrapper
        let inner_ctx = CorrelationContext {
            rs_addr: 0x72,
            netfn_lun: 0x18,
            rq_addr: 0x81,
            seq_lun: 0x00,
            cmd: BMC_GET_DEVICE_ID,
        };
        let outer_ctx = CorrelationContext {
            rs_addr: 0x20,
            netfn_lun: 0x18,
            rq_addr: 0x81,
            seq_lun: 0x01 << 2,
            cmd: 0x34,
        };
        peer.write_all(&reply_wire_for(&outer_ctx, &[0x00])).unwrap();
        peer.write_all(&reply_wire_for(&inner_ctx, &[0x00, 0x11, 0x22]))
            .unwrap();

        let rq = IpmiRq {
            msg: IpmiMessage::new(IPMI_NETFN_APP, BMC_GET_DEVICE_ID),
        };
        let rsp = intf.sendrecv(&rq).expect("bridged response expected");
        assert_eq!(rsp.ccode, 0);
        assert_eq!(rsp.data, vec![0x11, 0x22]);
        drain(&mut peer);
    }

    #[test]
    fn test_piggyback_slice_reverifies_checksums() {
        // wrapper ack whose payload is a complete inner response frame
        let inner = IpmbMsgHdr {
            rs_addr: 0x81,
            netfn_lun: 0x1c,
            rq_addr: 0x72,
            seq_lun: 0x00,
            cmd: BMC_GET_DEVICE_ID,
            data: vec![0x00, 0x42],
        };
        let mut data = vec![0x00];
        data.extend_from_slice(&inner.serialize());
        let outer = IpmbMsgHdr {
            rs_addr: 0x81,
            netfn_lun: 0x1c,
            rq_addr: 0x20,
            seq_lun: 0x08,
            cmd: 0x34,
            data,
        };
        let raw = outer.serialize();
        let sliced = SerialBasicIntf::slice_piggyback(&raw).unwrap();
        assert_eq!(sliced, inner);

        let mut corrupt = raw.clone();
        corrupt[9] ^= 0xff;
        assert!(SerialBasicIntf::slice_piggyback(&corrupt).is_err());
    }

    #[test]
    fn test_checksum_failure_is_discarded_not_matched() {
        let (mut intf, mut peer) = test_intf(IpmiContext::new(), Arc::new(AtomicBool::new(false)));
        intf.context.ssn_params.retry = 1;

        let expect_ctx = CorrelationContext {
            rs_addr: 0x20,
            netfn_lun: 0x18,
            rq_addr: 0x81,
            seq_lun: 0x00,
            cmd: BMC_GET_DEVICE_ID,
        };
        let mut reply = IpmbMsgHdr {
            rs_addr: expect_ctx.rq_addr,
            netfn_lun: 0x1c,
            rq_addr: expect_ctx.rs_addr,
            seq_lun: 0x00,
            cmd: BMC_GET_DEVICE_ID,
            data: vec![0x00],
        }
        .serialize();
        // break the trailing checksum
        let last = reply.len() - 1;
        reply[last] = reply[last].wrapping_add(1);
        assert_eq!(ipmi_csum(&reply[3..last]), reply[last].wrapping_sub(1));
        peer.write_all(&encode(&reply)).unwrap();

        let rq = IpmiRq {
            msg: IpmiMessage::new(IPMI_NETFN_APP, BMC_GET_DEVICE_ID),
        };
        assert!(intf.sendrecv(&rq).is_none());
        drain(&mut peer);
    }
}
