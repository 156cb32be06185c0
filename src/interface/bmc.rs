/*
 * SPDX-FileCopyrightText: 2025 UnionTech Software Technology Co., Ltd.
 *
 * SPDX-License-Identifier: GPL-2.0-or-later
 */

//! Linux kernel IPMI device driver (/dev/ipmiN), speaking the OpenIPMI
//! ioctl interface.

use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::sys::select::{select, FdSet};
use nix::sys::stat::Mode;
use nix::{ioctl_read, ioctl_readwrite};

use crate::error::{IpmiError, IpmiResult};
use crate::helper::printbuf;
use crate::ipmi::context::IpmiContext;
use crate::ipmi::intf::IpmiIntf;
use crate::ipmi::ipmb::ipmi_csum;
use crate::ipmi::ipmi::*;
use crate::{debug2, debug3, debug5};

pub const IPMI_MAX_ADDR_SIZE: usize = 0x20;
pub const IPMI_BMC_CHANNEL: u8 = 0xf;

pub const IPMI_SYSTEM_INTERFACE_ADDR_TYPE: i32 = 0x0c;
pub const IPMI_IPMB_ADDR_TYPE: i32 = 0x01;

pub const IPMI_RESPONSE_RECV_TYPE: i32 = 1;

#[derive(Default)]
#[repr(C)]
pub struct IpmiAddr {
    pub addr_type: i32,
    pub channel: i16,
    pub data: [u8; IPMI_MAX_ADDR_SIZE],
}

// Kernel ABI structs; the raw pointers are required by the ioctl layout and
// always point into buffers owned by the caller for the call's duration.
#[repr(C)]
pub struct IpmiMsg {
    pub netfn: u8,
    pub cmd: u8,
    pub data_len: u16,
    pub data: *mut u8,
}

impl Default for IpmiMsg {
    fn default() -> Self {
        Self {
            netfn: 0,
            cmd: 0,
            data_len: 0,
            data: std::ptr::null_mut(),
        }
    }
}

#[repr(C)]
pub struct IpmiReq {
    pub addr: *mut u8,
    pub addr_len: u32,
    pub msgid: i64,
    pub msg: IpmiMsg,
}

impl Default for IpmiReq {
    fn default() -> Self {
        Self {
            addr: std::ptr::null_mut(),
            addr_len: 0,
            msgid: 0,
            msg: IpmiMsg::default(),
        }
    }
}

#[repr(C)]
pub struct IpmiRecv {
    pub recv_type: i32,
    pub addr: *mut u8,
    pub addr_len: u32,
    pub msgid: i64,
    pub msg: IpmiMsg,
}

impl Default for IpmiRecv {
    fn default() -> Self {
        Self {
            recv_type: 0,
            addr: std::ptr::null_mut(),
            addr_len: 0,
            msgid: 0,
            msg: IpmiMsg::default(),
        }
    }
}

#[derive(Default)]
#[repr(C)]
pub struct IpmiSystemInterfaceAddr {
    pub addr_type: i32,
    pub channel: i16,
    pub lun: u8,
}

#[derive(Default)]
#[repr(C)]
pub struct IpmiIpmbAddr {
    pub addr_type: i32,
    pub channel: i16,
    pub slave_addr: u8,
    pub lun: u8,
}

pub const IPMI_IOC_MAGIC: u8 = b'i';
pub const IPMICTL_RECEIVE_MSG_TRUNC: u8 = 11;
pub const IPMICTL_SEND_COMMAND: u8 = 13;
pub const IPMICTL_SET_GETS_EVENTS_CMD: u8 = 16;
pub const IPMICTL_SET_MY_ADDRESS_CMD: u8 = 17;

ioctl_readwrite!(
    ipmi_ioctl_receive_msg_trunc,
    IPMI_IOC_MAGIC,
    IPMICTL_RECEIVE_MSG_TRUNC,
    IpmiRecv
);

ioctl_read!(
    ipmi_ioctl_send_command,
    IPMI_IOC_MAGIC,
    IPMICTL_SEND_COMMAND,
    IpmiReq
);

ioctl_read!(
    ipmi_ioctl_set_get_events_cmd,
    IPMI_IOC_MAGIC,
    IPMICTL_SET_GETS_EVENTS_CMD,
    i32
);

ioctl_read!(
    ipmi_ioctl_set_my_address_cmd,
    IPMI_IOC_MAGIC,
    IPMICTL_SET_MY_ADDRESS_CMD,
    u32
);

pub const IPMI_BMC_MAX_RQ_DATA_SIZE: u16 = 38;
pub const IPMI_BMC_MAX_RS_DATA_SIZE: u16 = 35;
pub const IPMI_BMC_READ_TIMEOUT: i64 = 15;

pub struct BmcIntf {
    pub devnum: u8,
    fd: i32,
    opened: bool,
    msgid: i64,
    context: IpmiContext,
}

impl BmcIntf {
    pub fn new(devnum: u8, ctx: IpmiContext) -> Self {
        Self {
            devnum,
            fd: -1,
            opened: false,
            msgid: 0,
            context: ctx,
        }
    }

    fn next_msgid(&mut self) -> i64 {
        self.msgid = self.msgid.wrapping_add(1);
        self.msgid
    }

    /// Wait for a received message carrying our msgid. Responses to other
    /// requesters on the same device are skipped.
    fn wait_response(&mut self, msgid: i64) -> Option<IpmiRs> {
        let mut buf = [0u8; IPMI_BUF_SIZE];
        let addr = IpmiAddr::default();
        let mut recv = IpmiRecv::default();

        let mut timeval = nix::sys::time::TimeVal::new(IPMI_BMC_READ_TIMEOUT, 0);
        let borrowfd = unsafe { std::os::fd::BorrowedFd::borrow_raw(self.fd) };

        loop {
            let mut fd_set = FdSet::new();
            fd_set.insert(borrowfd);
            let res = match select(self.fd + 1, &mut fd_set, None, None, Some(&mut timeval)) {
                Ok(n) => n,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    log::error!("I/O Error: {}", e);
                    return None;
                }
            };
            if res == 0 || !fd_set.contains(borrowfd) {
                log::error!("No data available");
                return None;
            }

            recv.addr = &addr as *const _ as *mut u8;
            recv.addr_len = std::mem::size_of_val(&addr) as u32;
            recv.msg.data = buf.as_mut_ptr();
            recv.msg.data_len = buf.len() as u16;

            if let Err(e) = unsafe { ipmi_ioctl_receive_msg_trunc(self.fd, &mut recv) } {
                // a truncated message is still usable up to data_len
                if e != Errno::EMSGSIZE {
                    log::error!("Unable to receive msg: {}", e);
                    return None;
                }
            }

            if recv.msgid != msgid {
                debug2!(
                    "Received a response with unexpected ID {} vs. {}",
                    recv.msgid,
                    msgid
                );
                continue;
            }
            break;
        }

        debug5!("Got message:");
        debug5!("  type      = {}", recv.recv_type);
        debug5!("  channel   = {:#x}", addr.channel);
        debug5!("  msgid     = {}", recv.msgid);
        debug5!("  netfn     = {:#x}", recv.msg.netfn);
        debug5!("  cmd       = {:#x}", recv.msg.cmd);

        let mut data = buf[..recv.msg.data_len as usize].to_vec();
        let mut netfn = recv.msg.netfn;
        let mut cmd = recv.msg.cmd;

        let transit_addr = self.context.transit_addr();
        let my_addr = self.context.my_addr();
        if transit_addr != 0 && transit_addr != my_addr {
            log::info!(
                "Decapsulating data received from transit IPMB target @ 0x{:x}",
                transit_addr
            );
            // inner response rides at a fixed offset behind the wrapper ack:
            // ccode, inner header (addr, netfn, csum, addr, seq, cmd), body
            if data.len() >= 8 && data[0] == 0 {
                netfn = data[2] >> 2;
                cmd = data[6];
                data.drain(..7);
                data.pop(); // trailing inner checksum
            } else {
                log::error!("Truncated bridged response");
                return None;
            }
        }

        if data.is_empty() {
            return None;
        }

        let mut rsp = IpmiRs {
            ccode: data[0],
            data: data[1..].to_vec(),
            ..Default::default()
        };
        rsp.msg.netfn = netfn;
        rsp.msg.cmd = cmd;
        debug5!("  rsp data  = {:02x?}", rsp.data);
        Some(rsp)
    }
}

impl IpmiIntf for BmcIntf {
    fn context(&mut self) -> &mut IpmiContext {
        &mut self.context
    }

    fn setup(&mut self) -> IpmiResult<()> {
        self.context.protocol.max_request_data_size = IPMI_BMC_MAX_RQ_DATA_SIZE;
        self.context.protocol.max_response_data_size = IPMI_BMC_MAX_RS_DATA_SIZE;
        Ok(())
    }

    fn open(&mut self) -> IpmiResult<()> {
        self.fd = -1;

        let dev_paths = [
            format!("/dev/ipmi{}", self.devnum),
            format!("/dev/ipmi/{}", self.devnum),
            format!("/dev/ipmidev/{}", self.devnum),
        ];

        debug2!("Using ipmi device {}", self.devnum);
        for path in &dev_paths {
            match open(path.as_str(), OFlag::O_RDWR, Mode::empty()) {
                Ok(fd) => {
                    self.fd = fd;
                    break;
                }
                Err(_) => continue,
            }
        }

        if self.fd < 0 {
            return Err(IpmiError::System(format!(
                "Could not open device at /dev/ipmi{} or /dev/ipmi/{} or /dev/ipmidev/{}: \
                 No such file or directory",
                self.devnum, self.devnum, self.devnum
            )));
        }

        let mut receive_events = 1;
        if unsafe { ipmi_ioctl_set_get_events_cmd(self.fd, &mut receive_events) }.is_err() {
            return Err(IpmiError::System(
                "Could not enable event receiver".to_string(),
            ));
        }

        self.opened = true;

        let my_addr = self.context.my_addr() as u8;
        if my_addr != 0 {
            self.set_my_addr(my_addr)
                .map_err(|e| IpmiError::System(format!("Could not set IPMB address: {}", e)))?;
        }

        Ok(())
    }

    fn close(&mut self) {
        if self.fd != -1 {
            unsafe { nix::libc::close(self.fd) };
            self.fd = -1;
        }
        self.opened = false;
    }

    fn sendrecv(&mut self, req: &IpmiRq) -> Option<IpmiRs> {
        if !self.opened && self.open().is_err() {
            return None;
        }

        debug3!("BMC Request Message Header:");
        debug3!("  netfn     = 0x{:x}", req.msg.netfn());
        debug3!("  cmd       = 0x{:x}", req.msg.cmd);
        if !req.msg.data.is_empty() {
            printbuf(&req.msg.data, "BMC Request Message Data");
        }

        let target_channel = self.context.target_channel();
        let target_addr = self.context.target_addr();
        let my_addr = self.context.my_addr();
        let transit_addr = self.context.transit_addr();
        let transit_channel = self.context.transit_channel();

        let mut ipmb_addr = IpmiIpmbAddr {
            addr_type: IPMI_IPMB_ADDR_TYPE,
            channel: (target_channel & 0x0f) as i16,
            slave_addr: target_addr as u8,
            lun: req.msg.lun(),
        };
        let mut bmc_addr = IpmiSystemInterfaceAddr {
            addr_type: IPMI_SYSTEM_INTERFACE_ADDR_TYPE,
            channel: IPMI_BMC_CHANNEL as i16,
            lun: req.msg.lun(),
        };

        let mut kreq = IpmiReq::default();
        let mut data: Vec<u8> = Vec::new();

        if target_addr != 0 && target_addr != my_addr {
            log::info!(
                "Sending request 0x{:x} to IPMB target @ 0x{:x}:0x{:x} (from 0x{:x})",
                req.msg.cmd,
                target_addr,
                target_channel,
                my_addr
            );

            if transit_addr != 0 && transit_addr != my_addr {
                // the kernel bridges one hop; encapsulate the second hop
                // ourselves as Send Message data for the transit node
                log::info!(
                    "Encapsulating data sent to end target [0x{:02x},0x{:02x}] using \
                     transit [0x{:02x},0x{:02x}] from 0x{:x}",
                    0x40 | target_channel,
                    target_addr,
                    transit_channel,
                    transit_addr,
                    my_addr
                );
                data.push(0x40 | (target_channel & 0x0f));
                data.push(target_addr as u8);
                data.push(req.msg.netfn_lun);
                data.push(ipmi_csum(&data[1..3]));
                let tail_start = data.len();
                data.push(0xff); // no response address
                data.push(0); // sequence filled by the transit BMC
                data.push(req.msg.cmd);
                data.extend_from_slice(&req.msg.data);
                data.push(ipmi_csum(&data[tail_start..]));

                ipmb_addr.channel = (transit_channel & 0x0f) as i16;
                ipmb_addr.slave_addr = transit_addr as u8;
            }
            kreq.addr = &mut ipmb_addr as *mut _ as *mut u8;
            kreq.addr_len = std::mem::size_of::<IpmiIpmbAddr>() as u32;
        } else {
            kreq.addr = &mut bmc_addr as *mut _ as *mut u8;
            kreq.addr_len = std::mem::size_of::<IpmiSystemInterfaceAddr>() as u32;
        }

        kreq.msgid = self.next_msgid();

        let mut owned_req_data = req.msg.data.clone();
        if !data.is_empty() {
            kreq.msg.netfn = IPMI_NETFN_APP;
            kreq.msg.cmd = IPMI_SEND_MESSAGE;
            kreq.msg.data = data.as_mut_ptr();
            kreq.msg.data_len = data.len() as u16;
        } else {
            kreq.msg.netfn = req.msg.netfn();
            kreq.msg.cmd = req.msg.cmd;
            kreq.msg.data = owned_req_data.as_mut_ptr();
            kreq.msg.data_len = owned_req_data.len() as u16;
        }

        // an ioctl failure is fatal, never retried
        if let Err(e) = unsafe { ipmi_ioctl_send_command(self.fd, &mut kreq) } {
            log::error!("Unable to send command: {}", e);
            return None;
        }

        self.wait_response(kreq.msgid)
    }

    fn keepalive(&mut self) -> IpmiResult<()> {
        // the kernel driver maintains the connection itself
        Ok(())
    }

    fn set_my_addr(&mut self, addr: u8) -> IpmiResult<()> {
        let mut a = addr as u32;
        match unsafe { ipmi_ioctl_set_my_address_cmd(self.fd, &mut a as *mut u32) } {
            Ok(_) => {
                self.context.set_my_addr(a);
                debug2!("Set IPMB address to 0x{:x}", a);
                Ok(())
            }
            Err(e) => Err(IpmiError::System(format!(
                "Failed to set my address: {}",
                e
            ))),
        }
    }
}
