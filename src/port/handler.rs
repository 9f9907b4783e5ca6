//! Application side of a port.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use super::{DataKind, MapParams};
use crate::error::{LinkError, Result};
use crate::protocol::ComponentRef;

/// Decoders and user hooks of one port.
///
/// Only `process_message` is required; procedure-based operations are
/// rejected unless the port overrides them.
pub trait PortHandler: Send {
    /// An incoming asynchronous message.
    fn process_message(&mut self, sender: ComponentRef, payload: Bytes) -> Result<()>;

    /// An incoming procedure call.
    fn process_call(&mut self, _sender: ComponentRef, _payload: Bytes) -> Result<()> {
        Err(LinkError::port("procedure calls are not supported"))
    }

    /// An incoming procedure reply.
    fn process_reply(&mut self, _sender: ComponentRef, _payload: Bytes) -> Result<()> {
        Err(LinkError::port("procedure replies are not supported"))
    }

    /// An incoming procedure exception.
    fn process_exception(&mut self, _sender: ComponentRef, _payload: Bytes) -> Result<()> {
        Err(LinkError::port("procedure exceptions are not supported"))
    }

    fn user_map(&mut self, _system_port: &str, _params: &MapParams) -> Result<()> {
        Ok(())
    }

    fn user_unmap(&mut self, _system_port: &str, _params: &MapParams) -> Result<()> {
        Ok(())
    }

    fn user_start(&mut self) -> Result<()> {
        Ok(())
    }

    fn user_stop(&mut self) -> Result<()> {
        Ok(())
    }

    /// Drop everything queued for the test logic.
    fn clear_queue(&mut self) {}
}

/// One item delivered to a [`QueueHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub kind: DataKind,
    pub sender: ComponentRef,
    pub payload: Bytes,
}

/// Shared view of a [`QueueHandler`]'s incoming queue.
#[derive(Debug, Clone, Default)]
pub struct PortQueue {
    inner: Arc<Mutex<VecDeque<Received>>>,
}

impl PortQueue {
    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Received>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take the oldest item.
    pub fn pop(&self) -> Option<Received> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn push(&self, item: Received) {
        self.lock().push_back(item);
    }

    fn clear(&self) {
        self.lock().clear();
    }
}

/// Port handler that queues every kind of incoming data.
#[derive(Debug, Clone, Default)]
pub struct QueueHandler {
    queue: PortQueue,
}

impl QueueHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the queue, usable after the handler is moved into a
    /// registry.
    pub fn queue(&self) -> PortQueue {
        self.queue.clone()
    }

    fn enqueue(&mut self, kind: DataKind, sender: ComponentRef, payload: Bytes) -> Result<()> {
        self.queue.push(Received {
            kind,
            sender,
            payload,
        });
        Ok(())
    }
}

impl PortHandler for QueueHandler {
    fn process_message(&mut self, sender: ComponentRef, payload: Bytes) -> Result<()> {
        self.enqueue(DataKind::Message, sender, payload)
    }

    fn process_call(&mut self, sender: ComponentRef, payload: Bytes) -> Result<()> {
        self.enqueue(DataKind::Call, sender, payload)
    }

    fn process_reply(&mut self, sender: ComponentRef, payload: Bytes) -> Result<()> {
        self.enqueue(DataKind::Reply, sender, payload)
    }

    fn process_exception(&mut self, sender: ComponentRef, payload: Bytes) -> Result<()> {
        self.enqueue(DataKind::Exception, sender, payload)
    }

    fn clear_queue(&mut self) {
        self.queue.clear();
    }
}
