//! Port connection manager.
//!
//! Owns every active port of one component together with its connections
//! and system mappings. Socket-backed connections are keyed by their event
//! loop [`Handle`] so the component can route [`Event`](crate::transport::Event)s
//! here. Everything the control side must report to the coordinator is
//! queued as a [`PortNotice`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;

use super::connection::{ConnState, Connection, ConnectionKey, DataKind, Link};
use super::{MapParams, PortHandler};
use crate::error::{LinkError, Result};
use crate::protocol::{ComponentRef, FrameBuffer, FrameGuard, TransportKind};
use crate::transport::{bind_listener, EventLoop, Handle, WriterHandle};

/// Default timeout for establishing an inet-stream connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a connection went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// This side asked for the disconnect.
    Local,
    /// The peer sent its LAST marker first.
    Peer,
    /// The transport failed without a shutdown handshake.
    Lost,
}

/// Something the control side has to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortNotice {
    /// A connection entered `state`; `None` means it was removed.
    State {
        port: String,
        key: ConnectionKey,
        state: Option<ConnState>,
    },
    /// A connection is established.
    Connected { port: String, key: ConnectionKey },
    /// An outgoing connect failed; the connection was removed.
    ConnectFailed {
        port: String,
        key: ConnectionKey,
        reason: String,
    },
    /// A connection is gone.
    Disconnected {
        port: String,
        key: ConnectionKey,
        reason: DisconnectReason,
    },
}

/// One named endpoint of the component.
pub struct Port {
    name: String,
    handler: Box<dyn PortHandler>,
    is_started: bool,
    is_halted: bool,
    connections: BTreeMap<ConnectionKey, Connection>,
    mappings: BTreeSet<String>,
}

impl Port {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_started(&self) -> bool {
        self.is_started
    }

    pub fn is_halted(&self) -> bool {
        self.is_halted
    }

    /// Connections in `(remote component, remote port)` order.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn connection(&self, key: &ConnectionKey) -> Option<&Connection> {
        self.connections.get(key)
    }

    pub fn mappings(&self) -> impl Iterator<Item = &str> {
        self.mappings.iter().map(String::as_str)
    }

    fn dispatch(&mut self, sender: ComponentRef, kind: DataKind, payload: Bytes) -> Result<()> {
        if !self.is_started {
            tracing::warn!(
                "Port {} is not started, data from component {} is dropped",
                self.name,
                sender
            );
            return Ok(());
        }
        let result = match kind {
            DataKind::Message => self.handler.process_message(sender, payload),
            DataKind::Call => self.handler.process_call(sender, payload),
            DataKind::Reply => self.handler.process_reply(sender, payload),
            DataKind::Exception => self.handler.process_exception(sender, payload),
            DataKind::Last => Ok(()),
        };
        match result {
            Err(e) if !e.is_fatal() => {
                tracing::warn!("Port {} rejected incoming data: {}", self.name, e);
                Ok(())
            }
            other => other,
        }
    }
}

/// All ports of one component.
pub struct PortRegistry {
    own_component: ComponentRef,
    ports: BTreeMap<String, Port>,
    handles: HashMap<Handle, (String, ConnectionKey)>,
    notices: Vec<PortNotice>,
    connect_timeout: Duration,
    nodelay: bool,
}

impl PortRegistry {
    /// Registry for the component `own_component`.
    pub fn new(own_component: ComponentRef) -> Self {
        Self {
            own_component,
            ports: BTreeMap::new(),
            handles: HashMap::new(),
            notices: Vec::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
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

    pub fn own_component(&self) -> ComponentRef {
        self.own_component
    }

    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports.get(name)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.ports.contains_key(name)
    }

    /// Names of every active port.
    pub fn port_names(&self) -> impl Iterator<Item = &str> {
        self.ports.keys().map(String::as_str)
    }

    pub fn connection_state(&self, port: &str, key: &ConnectionKey) -> Option<ConnState> {
        self.ports
            .get(port)
            .and_then(|p| p.connections.get(key))
            .map(Connection::state)
    }

    /// Whether `handle` belongs to one of the connections.
    pub fn owns(&self, handle: Handle) -> bool {
        self.handles.contains_key(&handle)
    }

    /// Take the queued notices in the order they happened.
    pub fn drain_notices(&mut self) -> Vec<PortNotice> {
        std::mem::take(&mut self.notices)
    }

    fn port_mut(&mut self, name: &str) -> Result<&mut Port> {
        self.ports
            .get_mut(name)
            .ok_or_else(|| LinkError::port(format!("Port {} does not exist", name)))
    }

    /// Register a new port. Names are unique within the component.
    pub fn activate(&mut self, name: impl Into<String>, handler: Box<dyn PortHandler>) -> Result<()> {
        let name = name.into();
        if self.ports.contains_key(&name) {
            return Err(LinkError::port(format!("Port {} is already active", name)));
        }
        tracing::debug!("Port {} was activated", name);
        self.ports.insert(
            name.clone(),
            Port {
                name,
                handler,
                is_started: false,
                is_halted: false,
                connections: BTreeMap::new(),
                mappings: BTreeSet::new(),
            },
        );
        Ok(())
    }

    pub fn start(&mut self, name: &str) -> Result<()> {
        let port = self.port_mut(name)?;
        if port.is_started {
            tracing::warn!(
                "Performing start operation on port {}, which is already started; the incoming queue is cleared",
                name
            );
            port.handler.clear_queue();
            return Ok(());
        }
        if port.is_halted {
            port.handler.clear_queue();
        } else {
            port.handler.user_start()?;
        }
        port.is_started = true;
        port.is_halted = false;
        tracing::debug!("Port {} was started", name);
        Ok(())
    }

    pub fn stop(&mut self, name: &str) -> Result<()> {
        let port = self.port_mut(name)?;
        if !port.is_started && !port.is_halted {
            tracing::warn!("Performing stop operation on port {}, which is already stopped", name);
            return Ok(());
        }
        port.is_started = false;
        port.is_halted = false;
        port.handler.user_stop()?;
        port.handler.clear_queue();
        tracing::debug!("Port {} was stopped", name);
        Ok(())
    }

    /// Stop accepting new data but keep what is queued.
    pub fn halt(&mut self, name: &str) -> Result<()> {
        let port = self.port_mut(name)?;
        if !port.is_started {
            tracing::warn!("Performing halt operation on port {}, which is not started", name);
            return Ok(());
        }
        port.is_started = false;
        port.is_halted = true;
        tracing::debug!("Port {} was halted", name);
        Ok(())
    }

    pub fn clear(&mut self, name: &str) -> Result<()> {
        self.port_mut(name)?.handler.clear_queue();
        Ok(())
    }

    /// Tear a port down. Never fails; every sub-step failure is logged.
    pub fn deactivate(&mut self, name: &str, event_loop: &mut EventLoop) {
        let Some(port) = self.ports.get(name) else {
            tracing::warn!("Port {} is not active, deactivation skipped", name);
            return;
        };
        let keys: Vec<ConnectionKey> = port.connections.keys().cloned().collect();
        for key in keys {
            self.terminate_connection(name, &key, event_loop);
        }

        let Some(mut port) = self.ports.remove(name) else {
            return;
        };
        let params = MapParams::default();
        for system_port in std::mem::take(&mut port.mappings) {
            if let Err(e) = port.handler.user_unmap(&system_port, &params) {
                tracing::warn!(
                    "Unmapping port {} from system:{} failed during deactivation: {}",
                    name,
                    system_port,
                    e
                );
            }
        }
        if port.is_started || port.is_halted {
            if let Err(e) = port.handler.user_stop() {
                tracing::warn!("Stopping port {} failed during deactivation: {}", name, e);
            }
        }
        port.handler.clear_queue();
        tracing::debug!("Port {} was deactivated", name);
    }

    /// Deactivate every port.
    pub fn deactivate_all(&mut self, event_loop: &mut EventLoop) {
        let names: Vec<String> = self.ports.keys().cloned().collect();
        for name in names {
            self.deactivate(&name, event_loop);
        }
    }

    fn terminate_connection(&mut self, port: &str, key: &ConnectionKey, event_loop: &mut EventLoop) {
        let Some(conn) = self.ports.get(port).and_then(|p| p.connections.get(key)) else {
            return;
        };
        let is_local = matches!(conn.link, Link::Local { .. });
        if matches!(conn.link, Link::Stream { .. }) && conn.state == ConnState::Connected {
            if let Err(e) = DataKind::Last.frame(&[]).and_then(|f| conn.write(f)) {
                tracing::warn!(
                    "Sending LAST on port {} to {} failed, trailing data may be lost: {}",
                    port,
                    key,
                    e
                );
            }
        }
        if is_local {
            self.remove_local_pair(port, key, event_loop);
        } else {
            self.remove_connection(port, key, event_loop);
        }
    }

    fn record(&mut self, port: &str, key: &ConnectionKey, state: Option<ConnState>) {
        match state {
            Some(s) => tracing::debug!("Connection of port {} to {} entered {}", port, key, s.as_str()),
            None => tracing::debug!("Connection of port {} to {} was removed", port, key),
        }
        self.notices.push(PortNotice::State {
            port: port.to_string(),
            key: key.clone(),
            state,
        });
    }

    fn set_state(&mut self, port: &str, key: &ConnectionKey, state: ConnState) {
        if let Some(conn) = self
            .ports
            .get_mut(port)
            .and_then(|p| p.connections.get_mut(key))
        {
            conn.state = state;
            self.record(port, key, Some(state));
        }
    }

    fn insert_connection(&mut self, port: &str, key: &ConnectionKey, transport: TransportKind) -> Result<()> {
        let conn = Connection::new(key.clone(), transport);
        self.port_mut(port)?.connections.insert(key.clone(), conn);
        self.record(port, key, Some(ConnState::Idle));
        Ok(())
    }

    fn set_link(&mut self, port: &str, key: &ConnectionKey, link: Link) {
        if let Some(handle) = link.handle() {
            self.handles.insert(handle, (port.to_string(), key.clone()));
        }
        if let Some(conn) = self
            .ports
            .get_mut(port)
            .and_then(|p| p.connections.get_mut(key))
        {
            conn.link = link;
        }
    }

    fn remove_connection(
        &mut self,
        port: &str,
        key: &ConnectionKey,
        event_loop: &mut EventLoop,
    ) -> Option<Connection> {
        let conn = self.ports.get_mut(port)?.connections.remove(key)?;
        if let Some(handle) = conn.link.handle() {
            event_loop.deregister(handle);
            self.handles.remove(&handle);
        }
        self.record(port, key, None);
        Some(conn)
    }

    fn remove_local_pair(&mut self, port: &str, key: &ConnectionKey, event_loop: &mut EventLoop) {
        let Some(conn) = self.remove_connection(port, key, event_loop) else {
            return;
        };
        if let Link::Local { peer_port } = conn.link {
            if peer_port != port {
                let back = ConnectionKey::new(self.own_component, port);
                self.remove_connection(&peer_port, &back, event_loop);
            }
        }
    }

    fn disconnected(&mut self, port: &str, key: &ConnectionKey, reason: DisconnectReason) {
        self.notices.push(PortNotice::Disconnected {
            port: port.to_string(),
            key: key.clone(),
            reason,
        });
    }

    /// `Ok(false)` for a duplicate; error if the port is mapped.
    fn check_connectable(&self, port: &str, key: &ConnectionKey) -> Result<bool> {
        let p = self
            .ports
            .get(port)
            .ok_or_else(|| LinkError::port(format!("Port {} does not exist", port)))?;
        if !p.mappings.is_empty() {
            return Err(LinkError::Configuration(format!(
                "Port {} has mappings, it cannot be connected to {}",
                port, key
            )));
        }
        if p.connections.contains_key(key) {
            tracing::warn!("Port {} is already connected to {}, connect ignored", port, key);
            return Ok(false);
        }
        Ok(true)
    }

    /// Connect two ports of this component directly.
    ///
    /// Returns `Ok(false)` if the connection already exists.
    pub fn connect_local(&mut self, port: &str, key: &ConnectionKey) -> Result<bool> {
        if key.remote_component != self.own_component {
            return Err(LinkError::port(format!(
                "Local transport needs both ports in component {}, got {}",
                self.own_component, key
            )));
        }
        if !self.check_connectable(port, key)? {
            return Ok(false);
        }
        let peer_port = key.remote_port.clone();
        let back = ConnectionKey::new(self.own_component, port);
        if peer_port != port && !self.check_connectable(&peer_port, &back)? {
            return Err(LinkError::port(format!(
                "Port {} already holds a one-sided connection to {}",
                peer_port, back
            )));
        }

        self.insert_connection(port, key, TransportKind::Local)?;
        self.set_link(
            port,
            key,
            Link::Local {
                peer_port: peer_port.clone(),
            },
        );
        self.set_state(port, key, ConnState::Connected);
        if peer_port != port {
            self.insert_connection(&peer_port, &back, TransportKind::Local)?;
            self.set_link(
                &peer_port,
                &back,
                Link::Local {
                    peer_port: port.to_string(),
                },
            );
            self.set_state(&peer_port, &back, ConnState::Connected);
        }
        self.notices.push(PortNotice::Connected {
            port: port.to_string(),
            key: key.clone(),
        });
        Ok(true)
    }

    /// Start connecting to a peer listening at `addr`.
    ///
    /// Returns `Ok(false)` for a duplicate. The connection stays `IDLE`
    /// until the event loop reports the outcome to
    /// [`PortRegistry::handle_connected`] or [`PortRegistry::handle_closed`];
    /// a failure is queued as [`PortNotice::ConnectFailed`].
    pub fn connect_inet(
        &mut self,
        port: &str,
        key: &ConnectionKey,
        addr: SocketAddr,
        event_loop: &mut EventLoop,
    ) -> Result<bool> {
        if !self.check_connectable(port, key)? {
            return Ok(false);
        }
        self.insert_connection(port, key, TransportKind::InetStream)?;
        let handle = event_loop.register_connect(addr, self.connect_timeout, self.nodelay);
        self.set_link(port, key, Link::Connecting { handle });
        tracing::debug!("Port {} is connecting to {} at {}", port, key, addr);
        Ok(true)
    }

    /// Complete a pending connect. Returns `false` for an unknown handle.
    pub fn handle_connected(&mut self, handle: Handle, stream: TcpStream, event_loop: &mut EventLoop) -> bool {
        let Some((port, key)) = self.handles.remove(&handle) else {
            return false;
        };
        event_loop.deregister(handle);
        if !self.is_connecting(&port, &key) {
            tracing::warn!("Unexpected connect completion on port {} to {}", port, key);
            return true;
        }
        let (stream_handle, writer) = event_loop.register_stream(stream);
        self.attach_stream(&port, &key, stream_handle, writer);
        true
    }

    /// Bind an ephemeral listener for `key` and return its address.
    ///
    /// Returns `Ok(None)` for a duplicate.
    pub fn listen(
        &mut self,
        port: &str,
        key: &ConnectionKey,
        bind_ip: IpAddr,
        event_loop: &mut EventLoop,
    ) -> Result<Option<SocketAddr>> {
        if !self.check_connectable(port, key)? {
            return Ok(None);
        }
        let (listener, addr) = bind_listener(bind_ip).map_err(|e| {
            LinkError::port(format!("Cannot open listening socket on {}: {}", bind_ip, e))
        })?;
        self.insert_connection(port, key, TransportKind::InetStream)?;
        let handle = event_loop.register_listener(listener);
        self.set_link(port, key, Link::Listening { handle });
        self.set_state(port, key, ConnState::Listening);
        Ok(Some(addr))
    }

    /// Bind an established stream to a connection and mark it connected.
    pub(crate) fn attach_stream(
        &mut self,
        port: &str,
        key: &ConnectionKey,
        handle: Handle,
        writer: WriterHandle,
    ) {
        self.set_link(
            port,
            key,
            Link::Stream {
                handle,
                writer,
                incoming: FrameBuffer::new(),
            },
        );
        self.set_state(port, key, ConnState::Connected);
        self.notices.push(PortNotice::Connected {
            port: port.to_string(),
            key: key.clone(),
        });
    }

    /// Start the disconnect of `key`.
    ///
    /// Local and listening connections go away at once. An established
    /// stream sends LAST and waits in `LAST_MSG_SENT` for the peer's marker.
    pub fn disconnect(&mut self, port: &str, key: &ConnectionKey, event_loop: &mut EventLoop) -> Result<()> {
        let p = self.port_mut(port)?;
        let Some(conn) = p.connections.get(key) else {
            tracing::warn!("Port {} has no connection to {}, disconnect ignored", port, key);
            self.disconnected(port, key, DisconnectReason::Local);
            return Ok(());
        };
        let state = conn.state;

        match &conn.link {
            Link::Local { .. } => {
                self.remove_local_pair(port, key, event_loop);
                self.disconnected(port, key, DisconnectReason::Local);
            }
            Link::Stream { .. } if state == ConnState::Connected => {
                let sent = DataKind::Last.frame(&[]).and_then(|f| conn.write(f));
                match sent {
                    Ok(()) => self.set_state(port, key, ConnState::LastMsgSent),
                    Err(e) => {
                        tracing::warn!(
                            "Sending LAST on port {} to {} failed, trailing data may be lost: {}",
                            port,
                            key,
                            e
                        );
                        self.remove_connection(port, key, event_loop);
                        self.disconnected(port, key, DisconnectReason::Local);
                    }
                }
            }
            Link::Stream { .. } => {
                tracing::warn!(
                    "Connection of port {} to {} is already terminating ({})",
                    port,
                    key,
                    state.as_str()
                );
            }
            Link::Pending | Link::Listening { .. } | Link::Connecting { .. } => {
                self.remove_connection(port, key, event_loop);
                self.disconnected(port, key, DisconnectReason::Local);
            }
        }
        Ok(())
    }

    /// Send application data to the single connection towards `destination`.
    pub fn send(&mut self, port: &str, destination: ComponentRef, kind: DataKind, payload: &[u8]) -> Result<()> {
        if kind == DataKind::Last {
            return Err(LinkError::port("LAST is reserved for disconnection"));
        }
        let p = self
            .ports
            .get(port)
            .ok_or_else(|| LinkError::port(format!("Port {} does not exist", port)))?;
        let mut candidates = p
            .connections
            .values()
            .filter(|c| c.key.remote_component == destination);
        let conn = match (candidates.next(), candidates.next()) {
            (Some(conn), None) => conn,
            (None, _) => {
                return Err(LinkError::port(format!(
                    "Port {} has no connection to component {}",
                    port, destination
                )))
            }
            (Some(_), Some(_)) => {
                return Err(LinkError::port(format!(
                    "Port {} has more than one connection to component {}",
                    port, destination
                )))
            }
        };
        if conn.state != ConnState::Connected {
            return Err(LinkError::port(format!(
                "Connection of port {} to {} is in state {}",
                port,
                conn.key,
                conn.state.as_str()
            )));
        }
        match &conn.link {
            Link::Local { peer_port } => {
                let peer_port = peer_port.clone();
                let sender = self.own_component;
                let payload = Bytes::copy_from_slice(payload);
                self.port_mut(&peer_port)?.dispatch(sender, kind, payload)
            }
            Link::Stream { .. } => conn.write(kind.frame(payload)?),
            _ => Err(LinkError::port(format!(
                "Connection of port {} to {} has no transport",
                port, conn.key
            ))),
        }
    }

    /// Route bytes read from `handle`.
    ///
    /// Returns `Ok(false)` when the handle is unknown (stale event). A
    /// malformed frame length tears the connection down and is returned
    /// as the fatal error.
    pub fn handle_data(&mut self, handle: Handle, bytes: &[u8], event_loop: &mut EventLoop) -> Result<bool> {
        let Some((port, key)) = self.handles.get(&handle).cloned() else {
            return Ok(false);
        };
        match self.incoming_mut(&port, &key) {
            Some(incoming) => incoming.push_received(bytes),
            None => {
                tracing::warn!("Data on port {} from {} has no stream buffer", port, key);
                return Ok(true);
            }
        }

        loop {
            let Some(incoming) = self.incoming_mut(&port, &key) else {
                break;
            };
            let (kind, payload) = match next_data_frame(incoming) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) if e.is_fatal() => {
                    tracing::warn!("Invalid data on port {} from {}: {}", port, key, e);
                    self.remove_connection(&port, &key, event_loop);
                    self.disconnected(&port, &key, DisconnectReason::Lost);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!("Malformed frame on port {} from {} skipped: {}", port, key, e);
                    continue;
                }
            };

            if kind == DataKind::Last {
                self.process_last(&port, &key, event_loop);
                continue;
            }
            let state = self.connection_state(&port, &key);
            match state {
                Some(ConnState::Connected) | Some(ConnState::LastMsgSent) => {
                    self.port_mut(&port)?
                        .dispatch(key.remote_component, kind, payload)?;
                }
                _ => tracing::warn!(
                    "Unexpected data arrived on port {} from {} after the termination of the connection",
                    port,
                    key
                ),
            }
        }
        Ok(true)
    }

    fn is_connecting(&self, port: &str, key: &ConnectionKey) -> bool {
        self.ports
            .get(port)
            .and_then(|p| p.connections.get(key))
            .is_some_and(|c| matches!(c.link, Link::Connecting { .. }))
    }

    fn incoming_mut(&mut self, port: &str, key: &ConnectionKey) -> Option<&mut FrameBuffer> {
        match &mut self.ports.get_mut(port)?.connections.get_mut(key)?.link {
            Link::Stream { incoming, .. } => Some(incoming),
            _ => None,
        }
    }

    fn process_last(&mut self, port: &str, key: &ConnectionKey, event_loop: &mut EventLoop) {
        let Some(state) = self.connection_state(port, key) else {
            return;
        };
        let reason = match state {
            ConnState::Connected => {
                tracing::debug!("Port {} was disconnected from {} by the peer", port, key);
                self.set_state(port, key, ConnState::LastMsgRcvd);
                if let Some(conn) = self.ports.get(port).and_then(|p| p.connections.get(key)) {
                    if let Err(e) = DataKind::Last.frame(&[]).and_then(|f| conn.write(f)) {
                        tracing::warn!(
                            "Acknowledging LAST on port {} to {} failed: {}",
                            port,
                            key,
                            e
                        );
                    }
                }
                DisconnectReason::Peer
            }
            ConnState::LastMsgSent => DisconnectReason::Local,
            other => {
                tracing::warn!(
                    "Unexpected LAST message on port {} from {} in state {}",
                    port,
                    key,
                    other.as_str()
                );
                return;
            }
        };

        if let Some(incoming) = self.incoming_mut(port, key) {
            if !incoming.is_empty() {
                tracing::warn!(
                    "{} bytes arrived on port {} from {} after the LAST message and are discarded",
                    incoming.len(),
                    port,
                    key
                );
            }
        }
        self.remove_connection(port, key, event_loop);
        self.disconnected(port, key, reason);
    }

    /// Complete a pending listen. Returns `false` for an unknown handle.
    pub fn handle_accept(&mut self, handle: Handle, stream: TcpStream, event_loop: &mut EventLoop) -> bool {
        let Some((port, key)) = self.handles.remove(&handle) else {
            return false;
        };
        event_loop.deregister(handle);
        if self.connection_state(&port, &key) != Some(ConnState::Listening) {
            tracing::warn!("Unexpected incoming connection on port {} from {}", port, key);
            return true;
        }
        if let Err(e) = stream.set_nodelay(self.nodelay) {
            tracing::warn!("Setting TCP_NODELAY on port {} failed: {}", port, e);
        }
        let (stream_handle, writer) = event_loop.register_stream(stream);
        self.attach_stream(&port, &key, stream_handle, writer);
        true
    }

    /// A socket of `handle` closed or failed. Returns `false` for an
    /// unknown handle.
    pub fn handle_closed(
        &mut self,
        handle: Handle,
        error: Option<io::Error>,
        event_loop: &mut EventLoop,
    ) -> bool {
        let Some((port, key)) = self.handles.get(&handle).cloned() else {
            return false;
        };
        let detail = error.map(|e| e.to_string()).unwrap_or_else(|| "EOF".to_string());
        if self.is_connecting(&port, &key) {
            tracing::warn!("Connecting port {} to {} failed: {}", port, key, detail);
            self.remove_connection(&port, &key, event_loop);
            self.notices.push(PortNotice::ConnectFailed {
                port,
                key,
                reason: format!("TCP connection establishment failed: {}", detail),
            });
            return true;
        }
        let reason = match self.connection_state(&port, &key) {
            Some(ConnState::LastMsgSent) => {
                tracing::warn!(
                    "Peer of port {} at {} closed the connection before acknowledging LAST ({})",
                    port,
                    key,
                    detail
                );
                DisconnectReason::Local
            }
            _ => {
                tracing::warn!(
                    "Connection of port {} to {} was lost unexpectedly ({})",
                    port,
                    key,
                    detail
                );
                DisconnectReason::Lost
            }
        };
        self.remove_connection(&port, &key, event_loop);
        self.disconnected(&port, &key, reason);
        true
    }

    /// Map `port` to `system_port`. `Ok(false)` if already mapped.
    pub fn map(&mut self, port: &str, system_port: &str, params: &MapParams) -> Result<bool> {
        let p = self.port_mut(port)?;
        if !p.connections.is_empty() {
            return Err(LinkError::Configuration(format!(
                "Port {} has connections, it cannot be mapped to system:{}",
                port, system_port
            )));
        }
        if p.mappings.contains(system_port) {
            tracing::warn!("Port {} is already mapped to system:{}, map ignored", port, system_port);
            return Ok(false);
        }
        p.handler.user_map(system_port, params)?;
        p.mappings.insert(system_port.to_string());
        tracing::debug!("Port {} was mapped to system:{}", port, system_port);
        Ok(true)
    }

    /// Unmap `port` from `system_port`. `Ok(false)` if it was not mapped.
    pub fn unmap(&mut self, port: &str, system_port: &str, params: &MapParams) -> Result<bool> {
        let p = self.port_mut(port)?;
        if !p.mappings.contains(system_port) {
            tracing::warn!("Port {} is not mapped to system:{}, unmap ignored", port, system_port);
            return Ok(false);
        }
        p.handler.user_unmap(system_port, params)?;
        p.mappings.remove(system_port);
        tracing::debug!("Port {} was unmapped from system:{}", port, system_port);
        Ok(true)
    }
}

fn next_data_frame(incoming: &mut FrameBuffer) -> Result<Option<(DataKind, Bytes)>> {
    let Some(mut frame) = FrameGuard::next(incoming)? else {
        return Ok(None);
    };
    let raw = frame.pull_i32()?;
    let kind = DataKind::from_i32(raw)
        .ok_or_else(|| LinkError::decode(format!("Invalid data kind {}", raw)))?;
    let payload = frame.rest()?;
    Ok(Some((kind, payload)))
}
