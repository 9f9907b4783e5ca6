//! Transport module - socket plumbing shared by the control channel and
//! port connections.
//!
//! - Event loop multiplexing reader tasks, accept tasks and a deadline
//! - Writer task per socket
//! - TCP connect/listen helpers for the inet-stream transport
//!
//! The local transport needs no sockets; it is implemented by the port
//! registry as direct dispatch.

mod event_loop;
mod inet;
mod writer;

pub use crate::protocol::TransportKind;
pub use event_loop::{Event, EventLoop, Handle, DEFAULT_READ_CHUNK};
pub use inet::{bind_listener, connect_stream};
pub use writer::{spawn_writer_task, WriterHandle};
