//! Frame assembly: splits an inbound byte stream into `header || body` frames.
//!
//! The socket delivers bytes in arbitrary chunks.  [`FrameAssembler`] keeps the
//! partial header or body between reads so that the sequence of frames it
//! yields is the same no matter how the stream was fragmented.
//!
//! ```text
//!            extend(bytes)
//!                 │
//!   ┌─────────────▼─────────────┐   header complete   ┌──────────────────┐
//!   │ WaitingForHeader          │────────────────────►│ WaitingForBody   │
//!   │ need layout.size() bytes  │◄────────────────────│ need header.size │
//!   └───────────────────────────┘   body complete     └──────────────────┘
//!                                   → Frame
//! ```

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::protocol::codec::{read_u16, read_u32, ProtocolError};
use crate::protocol::header::{DataHeader, HeaderLayout};
use crate::protocol::messages::MAX_MESSAGE_SIZE;

/// One complete inbound data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: DataHeader,
    /// Exactly `header.size` bytes.
    pub body: Bytes,
}

#[derive(Debug, Clone, Copy)]
enum State {
    WaitingForHeader,
    WaitingForBody { header: DataHeader },
}

/// Resumable splitter for the data-message stream of one channel.
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: BytesMut,
    state: State,
    layout: HeaderLayout,
    max_size: u32,
    /// Local inbound numbering, used when the header carries no serial.
    in_serial: u64,
}

impl FrameAssembler {
    pub fn new(layout: HeaderLayout) -> Self {
        Self::with_max_size(layout, MAX_MESSAGE_SIZE)
    }

    /// Creates an assembler that rejects bodies larger than `max_size`.
    pub fn with_max_size(layout: HeaderLayout, max_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            layout,
            max_size,
            in_serial: 0,
        }
    }

    /// Switches header layout.  Only valid between frames.
    pub fn set_layout(&mut self, layout: HeaderLayout) {
        self.layout = layout;
    }

    pub fn layout(&self) -> HeaderLayout {
        self.layout
    }

    /// Appends received bytes without extracting frames.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Appends received bytes and extracts every frame now complete.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MessageTooLarge`] if a header announces a body
    /// above the size limit.  The assembler must be reset afterwards.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>, ProtocolError> {
        self.extend(data);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Extracts one frame if enough bytes are buffered.
    ///
    /// # Errors
    ///
    /// See [`FrameAssembler::push`].
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        loop {
            match self.state {
                State::WaitingForHeader => {
                    let header_size = self.layout.size();
                    if self.buffer.len() < header_size {
                        return Ok(None);
                    }
                    let mut header = DataHeader::decode(self.layout, &self.buffer[..header_size])?;
                    if header.size > self.max_size {
                        return Err(ProtocolError::MessageTooLarge {
                            size: header.size,
                            max: self.max_size,
                        });
                    }
                    let _ = self.buffer.split_to(header_size);

                    self.in_serial += 1;
                    if self.layout == HeaderLayout::Mini {
                        header.serial = self.in_serial;
                    }
                    trace!(
                        "frame header: type {} size {} serial {}",
                        header.msg_type,
                        header.size,
                        header.serial
                    );
                    self.state = State::WaitingForBody { header };
                }
                State::WaitingForBody { header } => {
                    let size = header.size as usize;
                    if self.buffer.len() < size {
                        return Ok(None);
                    }
                    let body = self.buffer.split_to(size).freeze();
                    self.state = State::WaitingForHeader;
                    return Ok(Some(Frame { header, body }));
                }
            }
        }
    }

    /// Bytes of the current partial frame still missing, if a header has been
    /// read; `None` while waiting for a header.
    pub fn body_remaining(&self) -> Option<usize> {
        match self.state {
            State::WaitingForHeader => None,
            State::WaitingForBody { header } => {
                Some((header.size as usize).saturating_sub(self.buffer.len()))
            }
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drops all buffered bytes and restarts at a header boundary.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
        self.in_serial = 0;
    }
}

/// Builds a complete frame on the wire: header in `layout` followed by `body`.
pub fn encode_frame(layout: HeaderLayout, serial: u64, msg_type: u16, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(layout.size() + body.len());
    DataHeader {
        serial,
        msg_type,
        size: body.len() as u32,
        sub_list: 0,
    }
    .encode(layout, &mut out);
    out.extend_from_slice(body);
    out
}

// ── Sub-message lists ─────────────────────────────────────────────────────────

/// Location of one sub-message inside its parent's body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubMessageDescriptor {
    pub msg_type: u16,
    /// Body offset of the sub-message data (after its 6-byte sub-header).
    pub offset: usize,
    pub size: usize,
}

/// Size of the `{type u16, size u32}` record preceding each sub-message.
pub const SUB_MESSAGE_HEADER_SIZE: usize = 6;

/// Reads the sub-message list at body offset `sub_list`.
///
/// ```text
/// body[sub_list]:  [count:2][offset:4]*count
/// body[offset]:    [type:2][size:4][data:size]
/// ```
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if the list or any sub-message
/// lies outside `body`.
pub fn parse_sub_list(body: &[u8], sub_list: u32) -> Result<Vec<SubMessageDescriptor>, ProtocolError> {
    if sub_list == 0 {
        return Ok(Vec::new());
    }
    let list = sub_list as usize;
    let count = read_u16(body, list).map_err(|_| out_of_bounds("sub-message list", list))?
        as usize;

    let mut subs = Vec::with_capacity(count);
    for i in 0..count {
        let slot = list + 2 + i * 4;
        let at = read_u32(body, slot).map_err(|_| out_of_bounds("sub-message offset", slot))?
            as usize;
        let msg_type = read_u16(body, at).map_err(|_| out_of_bounds("sub-message header", at))?;
        let size = read_u32(body, at + 2)
            .map_err(|_| out_of_bounds("sub-message header", at))? as usize;
        let offset = at + SUB_MESSAGE_HEADER_SIZE;
        if offset.checked_add(size).map_or(true, |end| end > body.len()) {
            return Err(out_of_bounds("sub-message body", offset));
        }
        subs.push(SubMessageDescriptor {
            msg_type,
            offset,
            size,
        });
    }
    Ok(subs)
}

fn out_of_bounds(what: &str, at: usize) -> ProtocolError {
    ProtocolError::MalformedPayload(format!("{what} at offset {at} lies outside the body"))
}
