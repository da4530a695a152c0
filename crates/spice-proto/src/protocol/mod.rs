//! Protocol module: wire records, capability sets, frame assembly, and the
//! message body codec.

pub mod caps;
pub mod codec;
pub mod frame;
pub mod header;
pub mod link;
pub mod messages;
pub mod serial;

pub use caps::{common_cap, playback_cap, CapabilitySet};
pub use codec::{
    decode_client_message, encode_server_message, Demarshaller, Marshaller, ProtocolError,
    SpiceCodec,
};
pub use frame::{encode_frame, parse_sub_list, Frame, FrameAssembler, SubMessageDescriptor};
pub use header::{DataHeader, HeaderLayout};
pub use link::{LinkHeader, LinkMess, LinkReply};
pub use messages::*;
pub use serial::SerialCounter;
