//! Port module - named endpoints, their peer connections and system
//! mappings.
//!
//! A port holds zero or more connections to other components' ports, or
//! system mappings, never both. Connections use either the local transport
//! (direct dispatch between ports of one component) or an inet-stream TCP
//! connection with its own incoming frame buffer. Stream connections end
//! with a LAST handshake:
//!
//! ```text
//! initiator                         peer
//! CONNECTED --LAST--> ............. CONNECTED
//! LAST_MSG_SENT                     LAST_MSG_RCVD
//!             <--LAST-- ........... removed
//! removed
//! ```

mod connection;
mod handler;
mod map_params;
mod registry;

pub use connection::{ConnState, Connection, ConnectionKey, DataKind};
pub use handler::{PortHandler, PortQueue, QueueHandler, Received};
pub use map_params::MapParams;
pub use registry::{DisconnectReason, Port, PortNotice, PortRegistry, DEFAULT_CONNECT_TIMEOUT};
