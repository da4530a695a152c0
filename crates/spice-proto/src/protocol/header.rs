//! Data-message headers.
//!
//! ```text
//! Full (18 bytes):  [serial:8][type:2][size:4][sub_list:4]
//! Mini  (6 bytes):  [type:2][size:4]
//! ```
//!
//! The mini layout is used when both peers advertise the `MINI_HEADER` common
//! capability.  It carries no serial and no sub-message list; receivers number
//! inbound messages locally.

use crate::protocol::codec::{read_u16, read_u32, read_u64, ProtocolError};

/// Which header layout a channel uses after link negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderLayout {
    #[default]
    Full,
    Mini,
}

impl HeaderLayout {
    /// Encoded header size in bytes.
    pub const fn size(self) -> usize {
        match self {
            HeaderLayout::Full => 18,
            HeaderLayout::Mini => 6,
        }
    }
}

/// A decoded data-message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataHeader {
    /// Sender-assigned serial (full layout) or a locally assigned one (mini).
    pub serial: u64,
    pub msg_type: u16,
    /// Body size in bytes, not counting the header.
    pub size: u32,
    /// Body offset of the sub-message list, or 0 for none.
    pub sub_list: u32,
}

impl DataHeader {
    /// Writes the header in `layout` to `out`.  Serial and sub-list are
    /// dropped for the mini layout.
    pub fn encode(&self, layout: HeaderLayout, out: &mut Vec<u8>) {
        if layout == HeaderLayout::Full {
            out.extend_from_slice(&self.serial.to_le_bytes());
        }
        out.extend_from_slice(&self.msg_type.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        if layout == HeaderLayout::Full {
            out.extend_from_slice(&self.sub_list.to_le_bytes());
        }
    }

    /// Decodes a header.  For the mini layout `serial` and `sub_list` are 0.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::InsufficientData`] if `buf` is shorter than `layout.size()`.
    pub fn decode(layout: HeaderLayout, buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < layout.size() {
            return Err(ProtocolError::InsufficientData {
                needed: layout.size(),
                available: buf.len(),
            });
        }
        match layout {
            HeaderLayout::Full => Ok(Self {
                serial: read_u64(buf, 0)?,
                msg_type: read_u16(buf, 8)?,
                size: read_u32(buf, 10)?,
                sub_list: read_u32(buf, 14)?,
            }),
            HeaderLayout::Mini => Ok(Self {
                serial: 0,
                msg_type: read_u16(buf, 0)?,
                size: read_u32(buf, 2)?,
                sub_list: 0,
            }),
        }
    }
}
