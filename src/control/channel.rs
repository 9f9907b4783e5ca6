//! The single connection from a component to the main controller.
//!
//! Outgoing messages are encoded for the channel's direction and queued on
//! the socket's writer task. Incoming bytes accumulate in one frame buffer
//! and are decoded frame by frame; a malformed frame is skipped, an unknown
//! opcode is skipped, a negative length is fatal.
//!
//! The connect runs on the event loop; the channel waits in a connecting
//! state until the loop reports the stream. There is no reconnect. Once
//! closed, the channel stays closed and every `send` fails.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{LinkError, Result};
use crate::protocol::{Direction, FrameBuffer, FrameGuard, Message};
use tokio::net::TcpStream;

use crate::transport::{EventLoop, Handle, WriterHandle};

#[derive(Debug)]
enum ChannelState {
    Unconnected,
    Connecting { handle: Handle },
    Connected { handle: Handle, writer: WriterHandle },
    Disconnected,
}

/// Control connection of one component.
#[derive(Debug)]
pub struct ControlChannel {
    outgoing: Direction,
    address: Option<SocketAddr>,
    local_address: Option<SocketAddr>,
    state: ChannelState,
    incoming: FrameBuffer,
    connect_timeout: Duration,
    nodelay: bool,
}

impl ControlChannel {
    /// Channel sending in `outgoing` direction to the coordinator at
    /// `address`.
    pub fn new(outgoing: Direction, address: Option<SocketAddr>) -> Self {
        Self {
            outgoing,
            address,
            local_address: None,
            state: ChannelState::Unconnected,
            incoming: FrameBuffer::new(),
            connect_timeout: Duration::from_secs(10),
            nodelay: true,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn set_address(&mut self, address: SocketAddr) {
        self.address = Some(address);
    }

    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    /// Local end of the control socket, once connected.
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.local_address
    }

    pub fn outgoing(&self) -> Direction {
        self.outgoing
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ChannelState::Connected { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self.state, ChannelState::Disconnected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self.state, ChannelState::Connecting { .. })
    }

    /// Event loop handle of the control socket.
    pub fn handle(&self) -> Option<Handle> {
        match &self.state {
            ChannelState::Connected { handle, .. } => Some(*handle),
            _ => None,
        }
    }

    /// Whether events of `handle` belong to this channel, connecting or
    /// connected.
    pub fn owns(&self, handle: Handle) -> bool {
        match &self.state {
            ChannelState::Connecting { handle: h } | ChannelState::Connected { handle: h, .. } => {
                *h == handle
            }
            _ => false,
        }
    }

    /// Start opening the connection to the coordinator.
    ///
    /// The loop reports the outcome for the returned handle; pass the
    /// stream to [`ControlChannel::complete_connect`]. Fails without an
    /// address, when a connection exists or is pending, or once closed.
    pub fn connect(&mut self, event_loop: &mut EventLoop) -> Result<Handle> {
        if !matches!(self.state, ChannelState::Unconnected) {
            return Err(LinkError::Protocol(
                "Control connection to MC already exists".to_string(),
            ));
        }
        let Some(address) = self.address else {
            return Err(LinkError::NotConnected);
        };
        let handle = event_loop.register_connect(address, self.connect_timeout, self.nodelay);
        self.state = ChannelState::Connecting { handle };
        tracing::debug!("Connecting to MC at {}", address);
        Ok(handle)
    }

    /// Take over the stream of a finished connect.
    ///
    /// Returns `Ok(false)` if `handle` is not the pending connect.
    pub fn complete_connect(
        &mut self,
        handle: Handle,
        stream: TcpStream,
        event_loop: &mut EventLoop,
    ) -> Result<bool> {
        match self.state {
            ChannelState::Connecting { handle: pending } if pending == handle => {}
            _ => return Ok(false),
        }
        event_loop.deregister(handle);
        let local = match stream.local_addr() {
            Ok(local) => local,
            Err(e) => {
                self.state = ChannelState::Disconnected;
                return Err(e.into());
            }
        };
        let (stream_handle, writer) = event_loop.register_stream(stream);
        self.attach(stream_handle, writer, Some(local));
        tracing::debug!("Connected to MC from {}", local);
        Ok(true)
    }

    /// Use an already established transport.
    pub fn attach(&mut self, handle: Handle, writer: WriterHandle, local_address: Option<SocketAddr>) {
        self.local_address = local_address;
        self.incoming.reset();
        self.state = ChannelState::Connected { handle, writer };
    }

    /// Encode `message` and queue it on the socket.
    ///
    /// A failed write closes the channel.
    pub fn send(&mut self, message: &Message, event_loop: &mut EventLoop) -> Result<()> {
        let writer = match &self.state {
            ChannelState::Connected { writer, .. } => writer,
            ChannelState::Unconnected | ChannelState::Connecting { .. } => {
                return Err(LinkError::NotConnected)
            }
            ChannelState::Disconnected => return Err(LinkError::ConnectionClosed),
        };
        let frame = message.encode(self.outgoing)?;
        tracing::trace!("Sending {} to MC", message.kind().name());
        if let Err(e) = writer.send(frame.to_bytes()) {
            self.close(event_loop);
            return Err(e);
        }
        Ok(())
    }

    /// Append bytes read from the control socket.
    pub fn receive(&mut self, bytes: &[u8]) {
        self.incoming.push_received(bytes);
    }

    pub fn incoming_mut(&mut self) -> &mut FrameBuffer {
        &mut self.incoming
    }

    /// Decode the next complete message, skipping malformed and unknown
    /// frames.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        let direction = self.outgoing.reverse();
        loop {
            let Some(mut frame) = FrameGuard::next(&mut self.incoming)? else {
                return Ok(None);
            };
            match Message::decode(direction, &mut frame) {
                Ok(Some(message)) => return Ok(Some(message)),
                Ok(None) => continue,
                Err(e) if !e.is_fatal() => {
                    tracing::warn!("Malformed message from MC skipped: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Close the connection for good.
    pub fn close(&mut self, event_loop: &mut EventLoop) {
        match self.state {
            ChannelState::Connecting { handle } | ChannelState::Connected { handle, .. } => {
                event_loop.deregister(handle)
            }
            _ => {}
        }
        self.state = ChannelState::Disconnected;
        self.incoming.reset();
    }
}
