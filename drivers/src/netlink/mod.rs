//! Kernel-to-user event messages.
//!
//! Every event is one byte wrapped in a netlink frame and unicast to the
//! fingerprint service listening on [`USER_PORT`].

use alloc::vec::Vec;
use core::fmt::{self, Display, Formatter};

use log::debug;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::Error;

/// Protocol unit of the fingerprint netlink family.
pub const NETLINK_ANC: i32 = 30;

/// Port the user-space service binds to.
pub const USER_PORT: u32 = 100;

pub const NLMSG_ALIGNTO: usize = 4;
pub const NLMSG_HDRLEN: usize = 16;

pub const fn nlmsg_align(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

/// Header plus payload, as recorded in the header's length field.
pub const fn nlmsg_msg_size(payload: usize) -> usize {
    NLMSG_HDRLEN + payload
}

/// Bytes occupied by a frame including trailing padding.
pub const fn nlmsg_total_size(payload: usize) -> usize {
    nlmsg_align(nlmsg_msg_size(payload))
}

/// Events forwarded to the fingerprint service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventCode {
    Test = 0,
    Irq = 1,
    ScreenOff = 2,
    ScreenOn = 3,
    TouchDown = 4,
    TouchUp = 5,
    UiReady = 6,
    Exit = 7,
    /// Marker for "no event", never sent
    Invalid = 8,
}

impl EventCode {
    /// Events that can be requested by name, in match order.
    pub const NAMED: [EventCode; 8] = [
        EventCode::Test,
        EventCode::Irq,
        EventCode::ScreenOff,
        EventCode::ScreenOn,
        EventCode::TouchDown,
        EventCode::TouchUp,
        EventCode::UiReady,
        EventCode::Exit,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EventCode::Test => "test",
            EventCode::Irq => "irq",
            EventCode::ScreenOff => "screen_off",
            EventCode::ScreenOn => "screen_on",
            EventCode::TouchDown => "touch_down",
            EventCode::TouchUp => "touch_up",
            EventCode::UiReady => "ui_ready",
            EventCode::Exit => "exit",
            EventCode::Invalid => "invalid",
        }
    }

    /// First named event whose name prefixes `text`.
    pub fn from_name(text: &str) -> Option<Self> {
        Self::NAMED
            .iter()
            .copied()
            .find(|code| text.starts_with(code.name()))
    }
}

impl Display for EventCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `struct nlmsghdr`, native endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NlMsgHeader {
    pub len: u32,
    pub ty: u16,
    pub flags: u16,
    pub seq: u32,
    pub pid: u32,
}

impl NlMsgHeader {
    pub fn to_bytes(&self) -> [u8; NLMSG_HDRLEN] {
        let mut out = [0u8; NLMSG_HDRLEN];
        out[0..4].copy_from_slice(&self.len.to_ne_bytes());
        out[4..6].copy_from_slice(&self.ty.to_ne_bytes());
        out[6..8].copy_from_slice(&self.flags.to_ne_bytes());
        out[8..12].copy_from_slice(&self.seq.to_ne_bytes());
        out[12..16].copy_from_slice(&self.pid.to_ne_bytes());
        out
    }

    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        let buf = buf.get(..NLMSG_HDRLEN)?;
        Some(Self {
            len: u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]),
            ty: u16::from_ne_bytes([buf[4], buf[5]]),
            flags: u16::from_ne_bytes([buf[6], buf[7]]),
            seq: u32::from_ne_bytes([buf[8], buf[9], buf[10], buf[11]]),
            pid: u32::from_ne_bytes([buf[12], buf[13], buf[14], buf[15]]),
        })
    }
}

/// Builds a padded frame carrying `payload`, addressed from the kernel
/// (port 0, sequence 0).
pub fn build_frame(payload: &[u8]) -> Result<Vec<u8>, Error> {
    let total = nlmsg_total_size(payload.len());
    let len = u32::try_from(nlmsg_msg_size(payload.len())).map_err(|_| Error::InvalidArgument)?;

    let mut frame = Vec::new();
    frame.try_reserve_exact(total).map_err(|_| {
        debug!("netlink alloc failure");
        Error::ResourceExhausted
    })?;

    let header = NlMsgHeader {
        len,
        ty: NETLINK_ANC as u16,
        ..Default::default()
    };
    frame.extend_from_slice(&header.to_bytes());
    frame.extend_from_slice(payload);
    frame.resize(total, 0);
    Ok(frame)
}

/// Text payload of an inbound frame, up to the first NUL.
///
/// Frames shorter than a header carry nothing.
pub fn frame_text(frame: &[u8]) -> Option<&[u8]> {
    let header = NlMsgHeader::from_bytes(frame)?;
    let end = (header.len as usize).clamp(NLMSG_HDRLEN, frame.len());
    let data = &frame[NLMSG_HDRLEN..end];
    let text = match data.iter().position(|&b| b == 0) {
        Some(nul) => &data[..nul],
        None => data,
    };
    Some(text)
}

pub mod channel;
