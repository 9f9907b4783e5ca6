//! Dedicated writer task per socket.
//!
//! The owning loop never awaits a socket write. Encoded frames go through an
//! unbounded channel to a task that batches whatever is ready and writes it
//! with one vectored call.
//!
//! ```text
//! Component loop ─► mpsc::UnboundedSender<Bytes> ─► Writer Task ─► TcpStream
//! ```
//!
//! Dropping every [`WriterHandle`] flushes the queued frames and then shuts
//! down the write half. A write error is reported to the loop as
//! [`Event::Closed`] so the owner tears the connection down.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::event_loop::{Event, Handle};
use crate::error::{LinkError, Result};

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Handle for queueing frames on a writer task.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl WriterHandle {
    /// Queue one encoded frame.
    ///
    /// Fails with `ConnectionClosed` once the writer task has stopped.
    pub fn send(&self, frame: Bytes) -> Result<()> {
        self.tx.send(frame).map_err(|_| LinkError::ConnectionClosed)
    }

    /// Whether the writer task is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// A handle whose frames land in the returned receiver instead of a
    /// socket.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

/// Spawn the writer task for `writer`.
pub fn spawn_writer_task<W>(
    writer: W,
    handle: Handle,
    events: mpsc::UnboundedSender<Event>,
) -> WriterHandle
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        if let Err(e) = writer_loop(rx, writer).await {
            tracing::debug!("Writer for {:?} failed: {}", handle, e);
            let error = match e {
                LinkError::Io(io) => Some(io),
                _ => None,
            };
            let _ = events.send(Event::Closed { handle, error });
        }
    });
    WriterHandle { tx }
}

/// Receive frames and write them in batches until the channel closes.
async fn writer_loop<W>(mut rx: mpsc::UnboundedReceiver<Bytes>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(first) = rx.recv().await {
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }
        write_batch(&mut writer, &batch).await?;
    }
    writer.shutdown().await?;
    Ok(())
}

/// Write a batch with `write_vectored`, continuing after partial writes.
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(Bytes::len).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(LinkError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// IoSlice array for the bytes after `skip_bytes`.
fn build_remaining_slices(batch: &[Bytes], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut start = 0;
    for frame in batch {
        let end = start + frame.len();
        if skip_bytes < end && !frame.is_empty() {
            let offset = skip_bytes.saturating_sub(start);
            slices.push(IoSlice::new(&frame[offset..]));
        }
        start = end;
    }
    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    #[test]
    fn test_build_remaining_slices_no_skip() {
        let batch = vec![Bytes::from_static(b"abc"), Bytes::from_static(b"de")];
        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 2);
    }

    #[test]
    fn test_build_remaining_slices_partial_frame() {
        let batch = vec![Bytes::from_static(b"abc"), Bytes::from_static(b"de")];
        let slices = build_remaining_slices(&batch, 2);
        assert_eq!(slices.len(), 2);
        assert_eq!(&*slices[0], b"c");
        assert_eq!(&*slices[1], b"de");
    }

    #[test]
    fn test_build_remaining_slices_skip_frame() {
        let batch = vec![Bytes::from_static(b"abc"), Bytes::from_static(b"de")];
        let slices = build_remaining_slices(&batch, 3);
        assert_eq!(slices.len(), 1);
        assert_eq!(&*slices[0], b"de");
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<_> = (0..5).map(|_| Bytes::from_static(b"xyz")).collect();
        write_batch(&mut buf, &batch).await.unwrap();
        assert_eq!(buf.into_inner().len(), 15);
    }

    #[tokio::test]
    async fn test_writer_flushes_then_shuts_down() {
        let (client, mut server) = duplex(4096);
        let (events, _events_rx) = mpsc::unbounded_channel();
        let handle = spawn_writer_task(client, Handle::from_raw(1), events);

        for i in 0..10u8 {
            handle.send(Bytes::copy_from_slice(&[i])).unwrap();
        }
        drop(handle);

        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(1), server.read_to_end(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, (0..10u8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_detached_handle() {
        let (handle, mut rx) = WriterHandle::detached();
        handle.send(Bytes::from_static(b"frame")).unwrap();
        assert_eq!(rx.recv().await.unwrap().as_ref(), b"frame");

        drop(rx);
        assert!(handle.is_closed());
        assert!(matches!(
            handle.send(Bytes::new()),
            Err(LinkError::ConnectionClosed)
        ));
    }
}
