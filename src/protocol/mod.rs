//! Protocol module - varint wire format, frame buffering, and the control
//! message catalogue.
//!
//! - Variable-length signed integers (7 bits per byte, MSB first)
//! - Frame buffer for assembling outgoing and accumulating incoming frames
//! - Frame guard that scopes decoding to one frame
//! - Control messages keyed by `(Direction, opcode)`

mod frame;
mod frame_buffer;
mod message;
mod wire_format;

pub use frame::{build_frame, FrameGuard};
pub use frame_buffer::FrameBuffer;
pub use message::{
    ComponentRef, Direction, HostInfo, Message, MessageKind, ModuleInfo, PtcVerdictEntry,
    TransportKind, Verdict, FIRST_PTC_COMPREF, MTC_COMPREF, NULL_COMPREF, SYSTEM_COMPREF,
};
pub use wire_format::{
    decode_varint, encode_magnitude, encode_u64, varint_extent, varint_len, WireInt, CONTINUATION,
    HEADER_RESERVE, INITIAL_CAPACITY, MAX_NATIVE_VARINT, READ_SLACK, SIGN,
};
