//! Per-peer connection records of a port.

use std::fmt;

use bytes::Bytes;

use crate::error::{LinkError, Result};
use crate::protocol::{build_frame, ComponentRef, FrameBuffer, TransportKind};
use crate::transport::{Handle, WriterHandle};

/// Lifecycle of one connection.
///
/// ```text
/// IDLE -> LISTENING -> CONNECTED
/// IDLE -> CONNECTED
/// CONNECTED -> LAST_MSG_SENT -> removed
/// CONNECTED -> LAST_MSG_RCVD -> removed
/// LISTENING -> removed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnState {
    Idle,
    Listening,
    Connected,
    LastMsgSent,
    LastMsgRcvd,
}

impl ConnState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnState::Idle => "IDLE",
            ConnState::Listening => "LISTENING",
            ConnState::Connected => "CONNECTED",
            ConnState::LastMsgSent => "LAST_MSG_SENT",
            ConnState::LastMsgRcvd => "LAST_MSG_RCVD",
        }
    }
}

/// Identity of a connection within its port.
///
/// Ordered by remote component, then remote port name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionKey {
    pub remote_component: ComponentRef,
    pub remote_port: String,
}

impl ConnectionKey {
    pub fn new(remote_component: ComponentRef, remote_port: impl Into<String>) -> Self {
        Self {
            remote_component,
            remote_port: remote_port.into(),
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.remote_component, self.remote_port)
    }
}

/// Kind of an application data frame on a port connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Message = 0,
    Call = 1,
    Reply = 2,
    Exception = 3,
    /// Graceful shutdown marker; carries no payload.
    Last = 4,
}

impl DataKind {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Message),
            1 => Some(Self::Call),
            2 => Some(Self::Reply),
            3 => Some(Self::Exception),
            4 => Some(Self::Last),
            _ => None,
        }
    }

    /// Complete frame `varint(len) | varint(kind) | payload`.
    pub fn frame(self, payload: &[u8]) -> Result<Bytes> {
        Ok(build_frame(self as i32, |b| b.push_raw(payload))?.to_bytes())
    }
}

/// Transport resources of a connection.
pub(crate) enum Link {
    /// Not yet bound to a transport.
    Pending,
    /// Direct dispatch to another port of this component.
    Local { peer_port: String },
    /// Waiting for the peer to connect.
    Listening { handle: Handle },
    /// Outgoing TCP connect in progress.
    Connecting { handle: Handle },
    /// Established TCP stream with its own incoming buffer.
    Stream {
        handle: Handle,
        writer: WriterHandle,
        incoming: FrameBuffer,
    },
}

impl Link {
    pub(crate) fn handle(&self) -> Option<Handle> {
        match self {
            Link::Listening { handle } | Link::Connecting { handle } | Link::Stream { handle, .. } => {
                Some(*handle)
            }
            Link::Pending | Link::Local { .. } => None,
        }
    }
}

/// One peer relationship of a port.
pub struct Connection {
    pub(crate) key: ConnectionKey,
    pub(crate) transport: TransportKind,
    pub(crate) state: ConnState,
    pub(crate) link: Link,
}

impl Connection {
    pub(crate) fn new(key: ConnectionKey, transport: TransportKind) -> Self {
        Self {
            key,
            transport,
            state: ConnState::Idle,
            link: Link::Pending,
        }
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Queue an encoded frame on the stream, if this is one.
    pub(crate) fn write(&self, frame: Bytes) -> Result<()> {
        match &self.link {
            Link::Stream { writer, .. } => writer.send(frame),
            _ => Err(LinkError::port(format!(
                "Connection to {} has no stream",
                self.key
            ))),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.key)
            .field("transport", &self.transport)
            .field("state", &self.state)
            .field("handle", &self.link.handle())
            .finish()
    }
}
