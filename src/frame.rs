use std::cmp::Ordering;
use std::fmt;

use embedded_can::{ExtendedId, Frame as EmbeddedFrame, Id, StandardId};
use socketcan::CanFrame;

/// Maximum payload length of a classic CAN frame.
pub const MAX_FRAME_DATA: usize = 8;

const EFF_FLAG: u32 = libc::CAN_EFF_FLAG as u32;
const RTR_FLAG: u32 = libc::CAN_RTR_FLAG as u32;
const ERR_FLAG: u32 = libc::CAN_ERR_FLAG as u32;
const EFF_MASK: u32 = libc::CAN_EFF_MASK as u32;
const SFF_MASK: u32 = libc::CAN_SFF_MASK as u32;

/// A CAN 2.0 frame as carried through the tunnel.
///
/// The identifier is the raw 32-bit SocketCAN id word: the low 11 or 29 bits
/// hold the bus id and the top three bits carry the extended-format, remote
/// and error flags. Payload bytes past `len` are always zero, so whole-struct
/// equality matches payload-prefix equality.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TunnelFrame {
    can_id: u32,
    len: u8,
    data: [u8; MAX_FRAME_DATA],
}

impl TunnelFrame {
    /// Build a frame from a raw id word and a payload.
    ///
    /// Returns `None` when the payload exceeds [`MAX_FRAME_DATA`].
    pub fn new(can_id: u32, payload: &[u8]) -> Option<Self> {
        if payload.len() > MAX_FRAME_DATA {
            return None;
        }
        let mut data = [0u8; MAX_FRAME_DATA];
        data[..payload.len()].copy_from_slice(payload);
        Some(Self {
            can_id,
            len: payload.len() as u8,
            data,
        })
    }

    /// Build a frame from already-split wire parts.
    ///
    /// `data` must be zero past `len`; decoders that fill a fresh buffer get
    /// this for free. Returns `None` when `len` exceeds [`MAX_FRAME_DATA`].
    pub fn from_parts(can_id: u32, len: u8, data: [u8; MAX_FRAME_DATA]) -> Option<Self> {
        if len as usize > MAX_FRAME_DATA {
            return None;
        }
        Some(Self { can_id, len, data })
    }

    /// Raw 32-bit identifier word, flags included.
    pub fn can_id(&self) -> u32 {
        self.can_id
    }

    /// Payload length in bytes (0–8).
    pub fn len(&self) -> u8 {
        self.len
    }

    /// True when the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The significant payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// True for 29-bit extended-format identifiers.
    pub fn is_extended(&self) -> bool {
        self.can_id & EFF_FLAG != 0
    }

    /// True for remote transmission requests.
    pub fn is_remote(&self) -> bool {
        self.can_id & RTR_FLAG != 0
    }

    /// True for error frames.
    pub fn is_error(&self) -> bool {
        self.can_id & ERR_FLAG != 0
    }

    /// Overwrite this slot's contents with `src`.
    pub(crate) fn copy_from(&mut self, src: &TunnelFrame) {
        *self = *src;
    }

    /// Capture a frame read from a SocketCAN socket.
    pub fn from_can(frame: &CanFrame) -> Self {
        let mut can_id = match frame.id() {
            Id::Standard(id) => u32::from(id.as_raw()),
            Id::Extended(id) => id.as_raw() | EFF_FLAG,
        };
        if frame.is_remote_frame() {
            can_id |= RTR_FLAG;
        }
        let mut data = [0u8; MAX_FRAME_DATA];
        let payload = frame.data();
        data[..payload.len()].copy_from_slice(payload);
        Self {
            can_id,
            len: frame.dlc().min(MAX_FRAME_DATA) as u8,
            data,
        }
    }

    /// Convert into a frame writable to a SocketCAN socket.
    ///
    /// Returns `None` for id words SocketCAN cannot express as data or remote
    /// frames (error-flagged frames in particular).
    pub fn to_can(&self) -> Option<CanFrame> {
        if self.is_error() {
            return None;
        }
        let id = if self.is_extended() {
            Id::Extended(ExtendedId::new(self.can_id & EFF_MASK)?)
        } else {
            Id::Standard(StandardId::new((self.can_id & SFF_MASK) as u16)?)
        };
        if self.is_remote() {
            CanFrame::new_remote(id, self.len as usize)
        } else {
            CanFrame::new(id, self.payload())
        }
    }
}

/// Order used to group close identifiers together before transmission, which
/// improves acceptance-filter locality on the receiving bus: unsigned id
/// word, then payload length, then the payload bytes.
impl Ord for TunnelFrame {
    fn cmp(&self, other: &Self) -> Ordering {
        self.can_id
            .cmp(&other.can_id)
            .then_with(|| self.len.cmp(&other.len))
            .then_with(|| self.payload().cmp(other.payload()))
    }
}

impl PartialOrd for TunnelFrame {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TunnelFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, masked) = if self.is_extended() {
            ("EFF", self.can_id & EFF_MASK)
        } else {
            ("SFF", self.can_id & SFF_MASK)
        };
        write!(f, "{kind} frame id[{masked}] len:{}", self.len)?;
        for byte in self.payload() {
            write!(f, " {byte:02x}")?;
        }
        Ok(())
    }
}
