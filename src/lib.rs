//! # mctr-link
//!
//! Runtime coordination layer of a distributed test platform.
//!
//! A test run is made of one main controller (MC), host controllers (HC),
//! one main test component (MTC) and any number of parallel test
//! components (PTC). This crate is the executor side: the control channel
//! from each process to the MC, the executor state machine that validates
//! every control message, and the port connections that components open
//! between each other.
//!
//! ## Architecture
//!
//! - **Frame buffer** ([`protocol`]): varint length-prefixed frames shared
//!   by the control channel and the port connections
//! - **Transport** ([`transport`]): one event loop per component with
//!   reader and writer tasks per TCP socket
//! - **Control channel** ([`control`]): MC connection, transition tables
//!   and the liveness timer
//! - **Ports** ([`port`]): connect, listen, map and the LAST-marker
//!   disconnect handshake
//!
//! ## Example
//!
//! ```ignore
//! use mctr_link::{Component, Role, RuntimeConfig};
//!
//! #[tokio::main]
//! async fn main() -> mctr_link::Result<()> {
//!     let config = RuntimeConfig::from_json(r#"{"mc_address": "127.0.0.1:9000"}"#)?;
//!     let mut hc = Component::builder(Role::Hc).config(config).build();
//!     hc.connect()?;
//!     hc.run().await
//! }
//! ```

pub mod config;
pub mod control;
pub mod error;
pub mod hooks;
pub mod port;
pub mod protocol;
pub mod transport;

mod component;

pub use component::{Component, ComponentBuilder, RUNTIME_VERSION};
pub use config::RuntimeConfig;
pub use control::{ExecutorState, LocalAction, Role};
pub use error::{LinkError, Result};
