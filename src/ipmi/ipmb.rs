/*
 * SPDX-FileCopyrightText: 2025 UnionTech Software Technology Co., Ltd.
 *
 * SPDX-License-Identifier: GPL-2.0-or-later
 */

//! IPMB message layout, additive checksums, the 6-bit request sequence
//! allocator and the Send Message bridging envelope builder shared by the
//! serial drivers.

use crate::debug3;
use crate::error::{IpmiError, IpmiResult};
use crate::helper::buf2str;
use crate::ipmi::context::IpmiContext;
use crate::ipmi::ipmi::{
    IpmiRq, IpmiRs, IPMI_BMC_SLAVE_ADDR, IPMI_NETFN_APP, IPMI_REMOTE_SWID, IPMI_SEND_MESSAGE,
};

/// Fixed header bytes before the data field: rsSA, netFn|rsLUN, checksum1,
/// rqSA, rqSeq|rqLUN, cmd.
pub const IPMB_HDR_LEN: usize = 6;

/// Shortest legal frame: header plus the trailing checksum, no data.
pub const IPMB_MIN_FRAME: usize = IPMB_HDR_LEN + 1;

/// Response-tracking bit in the Send Message channel byte.
pub const IPMB_CHANNEL_TRACKING: u8 = 0x40;

/// Two's-complement checksum over `data`: the byte that makes the sum zero.
pub fn ipmi_csum(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
        .wrapping_neg()
}

/// A span followed by its checksum byte sums to zero mod 256.
pub fn csum_valid(span_with_csum: &[u8]) -> bool {
    span_with_csum
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
        == 0
}

/// Free-running 6-bit request sequence counter, one per driver instance.
#[derive(Default, Debug)]
pub struct SeqAllocator {
    next: u8,
}

impl SeqAllocator {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    pub fn next(&mut self) -> u8 {
        let seq = self.next;
        self.next = (self.next + 1) & 0x3f;
        seq
    }
}

/// Header fields of a sent envelope, kept to recognize the matching reply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationContext {
    pub rs_addr: u8,
    pub netfn_lun: u8,
    pub rq_addr: u8,
    pub seq_lun: u8,
    pub cmd: u8,
}

impl CorrelationContext {
    /// Reply matching rule: requester/responder addresses swap, the response
    /// bit of the netfn is set, and the LUN pairs trade places between the
    /// netfn byte and the seq byte.
    pub fn matches(&self, hdr: &IpmbMsgHdr) -> bool {
        hdr.rs_addr == self.rq_addr
            && hdr.netfn_lun == ((self.netfn_lun | 0x04) & 0xfc) | (self.seq_lun & 0x03)
            && hdr.rq_addr == self.rs_addr
            && hdr.seq_lun == (self.seq_lun & 0xfc) | (self.netfn_lun & 0x03)
            && hdr.cmd == self.cmd
    }
}

/// One IPMB envelope, parsed or about to be serialized. Checksums are
/// computed on serialize and verified on parse; they are not stored.
#[derive(Debug, Clone, PartialEq)]
pub struct IpmbMsgHdr {
    pub rs_addr: u8,
    pub netfn_lun: u8,
    pub rq_addr: u8,
    pub seq_lun: u8,
    pub cmd: u8,
    pub data: Vec<u8>,
}

impl IpmbMsgHdr {
    /// Lay the envelope out as `rsSA, netFn|rsLUN, csum1, rqSA, rqSeq|rqLUN,
    /// cmd, <data...>, csum2`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(IPMB_MIN_FRAME + self.data.len());
        buf.push(self.rs_addr);
        buf.push(self.netfn_lun);
        buf.push(ipmi_csum(&buf[0..2]));
        buf.push(self.rq_addr);
        buf.push(self.seq_lun);
        buf.push(self.cmd);
        buf.extend_from_slice(&self.data);
        buf.push(ipmi_csum(&buf[3..]));
        buf
    }

    /// Parse and verify one envelope. Short frames and checksum failures are
    /// rejected so line noise can never correlate with a pending request.
    pub fn parse(buf: &[u8]) -> IpmiResult<Self> {
        if buf.len() < IPMB_MIN_FRAME {
            return Err(IpmiError::InvalidData(format!(
                "IPMB frame too short: {} bytes",
                buf.len()
            )));
        }
        if !csum_valid(&buf[0..3]) {
            return Err(IpmiError::InvalidData(format!(
                "IPMB header checksum failed: {}",
                buf2str(buf, buf.len())
            )));
        }
        if !csum_valid(&buf[3..]) {
            return Err(IpmiError::InvalidData(format!(
                "IPMB message checksum failed: {}",
                buf2str(buf, buf.len())
            )));
        }
        Ok(Self {
            rs_addr: buf[0],
            netfn_lun: buf[1],
            rq_addr: buf[3],
            seq_lun: buf[4],
            cmd: buf[5],
            data: buf[IPMB_HDR_LEN..buf.len() - 1].to_vec(),
        })
    }
}

/// A serialized request plus the correlation context recorded for each
/// envelope level, outermost first.
#[derive(Debug)]
pub struct BuiltRequest {
    pub frame: Vec<u8>,
    pub contexts: Vec<CorrelationContext>,
    pub bridging_level: u8,
}

fn envelope(
    rs_addr: u8,
    netfn_lun: u8,
    rq_addr: u8,
    seq_lun: u8,
    cmd: u8,
    data: &[u8],
) -> (Vec<u8>, CorrelationContext) {
    let hdr = IpmbMsgHdr {
        rs_addr,
        netfn_lun,
        rq_addr,
        seq_lun,
        cmd,
        data: data.to_vec(),
    };
    let ctx = CorrelationContext {
        rs_addr,
        netfn_lun,
        rq_addr,
        seq_lun,
        cmd,
    };
    (hdr.serialize(), ctx)
}

fn wrap_send_message(
    rq_addr: u8,
    seq_lun: u8,
    channel: u8,
    tracking: bool,
    inner: &[u8],
) -> (Vec<u8>, CorrelationContext) {
    let mut data = Vec::with_capacity(1 + inner.len());
    let chan = channel & 0x0f;
    data.push(if tracking {
        chan | IPMB_CHANNEL_TRACKING
    } else {
        chan
    });
    data.extend_from_slice(inner);
    envelope(
        IPMI_BMC_SLAVE_ADDR,
        IPMI_NETFN_APP << 2,
        rq_addr,
        seq_lun,
        IPMI_SEND_MESSAGE,
        &data,
    )
}

/// Build a request with 0, 1 or 2 Send Message wrappers, depth derived from
/// the configured target/transit addressing. Each level draws a fresh
/// sequence number. With `is_system` set the wrapper's tracking bit is
/// cleared and its requester address forced back to the BMC slave address,
/// because the bridged response comes back through the receive-message queue.
pub fn build_msg(
    ctx: &IpmiContext,
    req: &IpmiRq,
    seq: &mut SeqAllocator,
    is_system: bool,
    max_len: usize,
) -> IpmiResult<BuiltRequest> {
    let bridging_level = ctx.get_bridging_level();
    let my_addr = if ctx.my_addr() != 0 {
        ctx.my_addr() as u8
    } else {
        IPMI_REMOTE_SWID
    };

    let inner_rs = if bridging_level > 0 {
        ctx.target_addr() as u8
    } else {
        IPMI_BMC_SLAVE_ADDR
    };
    let wrapper_rq = if is_system { IPMI_BMC_SLAVE_ADDR } else { my_addr };
    let inner_rq = if bridging_level > 0 { wrapper_rq } else { my_addr };

    let mut contexts = Vec::with_capacity(bridging_level as usize + 1);
    let (mut frame, inner_ctx) = envelope(
        inner_rs,
        req.msg.netfn_lun,
        inner_rq,
        seq.next() << 2,
        req.msg.cmd,
        &req.msg.data,
    );
    contexts.push(inner_ctx);

    if bridging_level == 2 {
        // middle wrapper addressed to the transit node, routed out the
        // target channel
        let mut data = Vec::with_capacity(1 + frame.len());
        let chan = ctx.target_channel() & 0x0f;
        data.push(if is_system {
            chan
        } else {
            chan | IPMB_CHANNEL_TRACKING
        });
        data.extend_from_slice(&frame);
        let (wrapped, mid_ctx) = envelope(
            ctx.transit_addr() as u8,
            IPMI_NETFN_APP << 2,
            wrapper_rq,
            seq.next() << 2,
            IPMI_SEND_MESSAGE,
            &data,
        );
        frame = wrapped;
        contexts.push(mid_ctx);
    }

    if bridging_level >= 1 {
        let channel = if bridging_level == 2 {
            ctx.transit_channel()
        } else {
            ctx.target_channel()
        };
        let (wrapped, outer_ctx) =
            wrap_send_message(wrapper_rq, seq.next() << 2, channel, !is_system, &frame);
        frame = wrapped;
        contexts.push(outer_ctx);
    }

    // outermost first, matching the order responses are consumed
    contexts.reverse();

    if frame.len() > max_len {
        return Err(IpmiError::InvalidData(format!(
            "Encoded request ({} bytes) exceeds transport maximum ({} bytes)",
            frame.len(),
            max_len
        )));
    }

    debug3!("ipmb tx: {}", buf2str(&frame, frame.len()));
    Ok(BuiltRequest {
        frame,
        contexts,
        bridging_level,
    })
}

/// Turn a verified response envelope into the caller-facing response. The
/// first data byte is the completion code.
pub fn response_from_hdr(hdr: IpmbMsgHdr) -> IpmiRs {
    let mut rsp = IpmiRs::default();
    rsp.msg.netfn = hdr.netfn_lun >> 2;
    rsp.msg.lun = hdr.netfn_lun & 0x03;
    rsp.msg.seq = hdr.seq_lun >> 2;
    rsp.msg.cmd = hdr.cmd;
    if let Some((&ccode, rest)) = hdr.data.split_first() {
        rsp.ccode = ccode;
        rsp.data = rest.to_vec();
    }
    rsp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipmi::ipmi::{IpmiMessage, BMC_GET_DEVICE_ID};

    fn get_device_id_rq() -> IpmiRq {
        IpmiRq {
            msg: IpmiMessage::new(IPMI_NETFN_APP, BMC_GET_DEVICE_ID),
        }
    }

    #[test]
    fn test_csum_round_trip() {
        let hdr = IpmbMsgHdr {
            rs_addr: 0x20,
            netfn_lun: 0x18,
            rq_addr: 0x81,
            seq_lun: 0x04,
            cmd: 0x01,
            data: vec![0x11, 0x22],
        };
        let buf = hdr.serialize();
        assert!(csum_valid(&buf[0..3]));
        assert!(csum_valid(&buf[3..]));
        assert_eq!(IpmbMsgHdr::parse(&buf).unwrap(), hdr);
    }

    #[test]
    fn test_csum_detects_single_byte_corruption() {
        let hdr = IpmbMsgHdr {
            rs_addr: 0x20,
            netfn_lun: 0x18,
            rq_addr: 0x81,
            seq_lun: 0x08,
            cmd: 0x01,
            data: vec![0xde, 0xad, 0xbe, 0xef],
        };
        let buf = hdr.serialize();
        for i in 0..buf.len() {
            let mut corrupt = buf.clone();
            corrupt[i] ^= 0x01;
            assert!(
                IpmbMsgHdr::parse(&corrupt).is_err(),
                "corruption at byte {} went undetected",
                i
            );
        }
    }

    #[test]
    fn test_short_frame_rejected() {
        assert!(IpmbMsgHdr::parse(&[0x20, 0x18, 0xc8, 0x81, 0x04, 0x01]).is_err());
    }

    #[test]
    fn test_seq_wraparound() {
        let mut seq = SeqAllocator::new();
        for expect in 0..64u8 {
            assert_eq!(seq.next(), expect);
        }
        assert_eq!(seq.next(), 0);
        let mut seq = SeqAllocator::new();
        for _ in 0..1000 {
            assert!(seq.next() < 64);
        }
    }

    fn reply_for(ctx: &CorrelationContext, data: Vec<u8>) -> IpmbMsgHdr {
        IpmbMsgHdr {
            rs_addr: ctx.rq_addr,
            netfn_lun: ((ctx.netfn_lun | 0x04) & 0xfc) | (ctx.seq_lun & 0x03),
            rq_addr: ctx.rs_addr,
            seq_lun: (ctx.seq_lun & 0xfc) | (ctx.netfn_lun & 0x03),
            cmd: ctx.cmd,
            data,
        }
    }

    #[test]
    fn test_correlation_accepts_matching_reply() {
        let ctx = CorrelationContext {
            rs_addr: 0x20,
            netfn_lun: 0x18,
            rq_addr: 0x81,
            seq_lun: 0x0c,
            cmd: 0x01,
        };
        let reply = reply_for(&ctx, vec![0x00]);
        assert!(ctx.matches(&reply));
    }

    #[test]
    fn test_correlation_rejects_any_field_mutation() {
        let ctx = CorrelationContext {
            rs_addr: 0x20,
            netfn_lun: 0x18,
            rq_addr: 0x81,
            seq_lun: 0x0c,
            cmd: 0x01,
        };
        let reply = reply_for(&ctx, vec![0x00]);

        let mut m = reply.clone();
        m.rs_addr = 0x82;
        assert!(!ctx.matches(&m));

        let mut m = reply.clone();
        m.rq_addr = 0x22;
        assert!(!ctx.matches(&m));

        let mut m = reply.clone();
        m.netfn_lun ^= 0x04;
        assert!(!ctx.matches(&m));

        let mut m = reply.clone();
        m.seq_lun = m.seq_lun.wrapping_add(0x04);
        assert!(!ctx.matches(&m));

        let mut m = reply.clone();
        m.cmd = 0x02;
        assert!(!ctx.matches(&m));
    }

    #[test]
    fn test_depth0_frame_shape() {
        let ctx = IpmiContext::new();
        let mut seq = SeqAllocator::new();
        let built = build_msg(&ctx, &get_device_id_rq(), &mut seq, false, 256).unwrap();
        assert_eq!(built.bridging_level, 0);
        assert_eq!(built.contexts.len(), 1);
        // rsSA, netFn|lun, csum1, rqSA, seq|lun, cmd, csum2
        assert_eq!(built.frame.len(), 7);
        assert_eq!(built.frame[0], 0x20);
        assert_eq!(built.frame[1], 0x18);
        assert_eq!(built.frame[3], 0x81);
        assert_eq!(built.frame[5], 0x01);
        assert!(csum_valid(&built.frame[0..3]));
        assert!(csum_valid(&built.frame[3..]));
    }

    #[test]
    fn test_envelope_nesting_lengths() {
        let data = vec![0xaa, 0xbb, 0xcc];
        let mk_rq = || {
            let mut rq = get_device_id_rq();
            rq.msg.data = data.clone();
            rq
        };

        let mut ctx = IpmiContext::new();
        let mut seq = SeqAllocator::new();
        let d0 = build_msg(&ctx, &mk_rq(), &mut seq, false, 256).unwrap();
        assert_eq!(d0.frame.len(), 7 + data.len());

        ctx.set_my_addr(0x81);
        ctx.set_target_addr(0x72);
        ctx.set_target_channel(7);
        let d1 = build_msg(&ctx, &mk_rq(), &mut seq, false, 256).unwrap();
        assert_eq!(d1.frame.len(), 7 + data.len() + 8);

        ctx.set_transit_addr(0x24);
        ctx.set_transit_channel(2);
        let d2 = build_msg(&ctx, &mk_rq(), &mut seq, false, 256).unwrap();
        assert_eq!(d2.frame.len(), 7 + data.len() + 16);
    }

    #[test]
    fn test_single_bridge_single_wrapper() {
        let mut ctx = IpmiContext::new();
        ctx.set_my_addr(0x81);
        ctx.set_target_addr(0x72);
        ctx.set_target_channel(7);
        let mut seq = SeqAllocator::new();
        let built = build_msg(&ctx, &get_device_id_rq(), &mut seq, false, 256).unwrap();

        assert_eq!(built.bridging_level, 1);
        assert_eq!(built.contexts.len(), 2);

        // exactly one Send Message wrapper around the original request
        let outer = IpmbMsgHdr::parse(&built.frame).unwrap();
        assert_eq!(outer.rs_addr, 0x20);
        assert_eq!(outer.netfn_lun, 0x18);
        assert_eq!(outer.cmd, IPMI_SEND_MESSAGE);
        assert_eq!(outer.data[0], IPMB_CHANNEL_TRACKING | 0x07);

        let inner = IpmbMsgHdr::parse(&outer.data[1..]).unwrap();
        assert_eq!(inner.rs_addr, 0x72);
        assert_eq!(inner.cmd, BMC_GET_DEVICE_ID);
        assert_ne!(inner.cmd, IPMI_SEND_MESSAGE);
        assert!(inner.data.is_empty());
    }

    #[test]
    fn test_dual_bridge_outer_decode_recovers_inner() {
        let mut ctx = IpmiContext::new();
        ctx.set_my_addr(0x81);
        ctx.set_target_addr(0x72);
        ctx.set_target_channel(7);
        ctx.set_transit_addr(0x24);
        ctx.set_transit_channel(2);
        let mut seq = SeqAllocator::new();

        let mut rq = get_device_id_rq();
        rq.msg.data = vec![0x01, 0x02];
        let built = build_msg(&ctx, &rq, &mut seq, false, 256).unwrap();
        assert_eq!(built.bridging_level, 2);
        assert_eq!(built.contexts.len(), 3);

        let outer = IpmbMsgHdr::parse(&built.frame).unwrap();
        assert_eq!(outer.cmd, IPMI_SEND_MESSAGE);
        assert_eq!(outer.data[0], IPMB_CHANNEL_TRACKING | 0x02);

        let middle = IpmbMsgHdr::parse(&outer.data[1..]).unwrap();
        assert_eq!(middle.rs_addr, 0x24);
        assert_eq!(middle.cmd, IPMI_SEND_MESSAGE);
        assert_eq!(middle.data[0], IPMB_CHANNEL_TRACKING | 0x07);

        let inner = IpmbMsgHdr::parse(&middle.data[1..]).unwrap();
        assert_eq!(inner.rs_addr, 0x72);
        assert_eq!(inner.cmd, BMC_GET_DEVICE_ID);
        assert_eq!(inner.data, vec![0x01, 0x02]);
    }

    #[test]
    fn test_system_bridging_clears_tracking_and_forces_rq_addr() {
        let mut ctx = IpmiContext::new();
        ctx.set_my_addr(0x81);
        ctx.set_target_addr(0x72);
        ctx.set_target_channel(7);
        let mut seq = SeqAllocator::new();
        let built = build_msg(&ctx, &get_device_id_rq(), &mut seq, true, 256).unwrap();

        let outer = IpmbMsgHdr::parse(&built.frame).unwrap();
        assert_eq!(outer.data[0] & IPMB_CHANNEL_TRACKING, 0);
        assert_eq!(outer.rq_addr, IPMI_BMC_SLAVE_ADDR);

        let inner = IpmbMsgHdr::parse(&outer.data[1..]).unwrap();
        assert_eq!(inner.rq_addr, IPMI_BMC_SLAVE_ADDR);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let ctx = IpmiContext::new();
        let mut seq = SeqAllocator::new();
        let mut rq = get_device_id_rq();
        rq.msg.data = vec![0u8; 64];
        assert!(build_msg(&ctx, &rq, &mut seq, false, 32).is_err());
    }

    #[test]
    fn test_response_from_hdr() {
        let ctx = CorrelationContext {
            rs_addr: 0x20,
            netfn_lun: 0x18,
            rq_addr: 0x81,
            seq_lun: 0x10,
            cmd: 0x01,
        };
        let reply = reply_for(&ctx, vec![0x00, 0x20, 0x01]);
        let rsp = response_from_hdr(reply);
        assert_eq!(rsp.ccode, 0x00);
        assert_eq!(rsp.data, vec![0x20, 0x01]);
        assert_eq!(rsp.msg.cmd, 0x01);
        assert_eq!(rsp.msg.netfn, 0x07);
        assert_eq!(rsp.msg.seq, 0x04);
    }
}
