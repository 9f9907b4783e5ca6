//! TCP helpers for the inet-stream transport.
//!
//! Connects run on their own task spawned by the event loop; the owner
//! learns the outcome from an event. Listeners bind an ephemeral port.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::error::Result;

/// Connect to `addr`, giving up after `timeout`.
pub async fn connect_stream(addr: SocketAddr, timeout: Duration, nodelay: bool) -> io::Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connecting to {} timed out after {:?}", addr, timeout),
            )
        })??;
    stream.set_nodelay(nodelay)?;
    Ok(stream)
}

/// Bind a listener on an ephemeral port of `ip`.
///
/// Returns the listener and its bound address.
pub fn bind_listener(ip: IpAddr) -> Result<(TcpListener, SocketAddr)> {
    let listener = std::net::TcpListener::bind(SocketAddr::new(ip, 0))?;
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;
    Ok((TcpListener::from_std(listener)?, addr))
}
