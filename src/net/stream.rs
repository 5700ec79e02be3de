//! Bidirectional streams with per-direction half-close tracking.
//!
//! # State per direction
//! ```text
//! Open ──(end-of-stream)──▶ HalfClosed ──(connection close)──▶ Closed
//!   └──────────────(reset / connection close)──────────────────▶ Closed
//! ```
//! A stream counts as closed once neither direction is `Open`.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use bytes::{Bytes, BytesMut};
use futures_util::FutureExt;
use quinn::VarInt;
use tokio::sync::watch;

use crate::net::connection::ConnectionInner;
use crate::net::error::{TransportError, TransportResult};

pub use quinn::StreamId;

/// State of one stream direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SideState {
    Open = 0,
    HalfClosed = 1,
    Closed = 2,
}

impl SideState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SideState::Open,
            1 => SideState::HalfClosed,
            _ => SideState::Closed,
        }
    }
}

#[derive(Debug)]
struct Side(AtomicU8);

impl Side {
    fn new() -> Self {
        Self(AtomicU8::new(SideState::Open as u8))
    }

    fn get(&self) -> SideState {
        SideState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// `Open → HalfClosed`; false if the side had already left `Open`.
    fn half_close(&self) -> bool {
        self.0
            .compare_exchange(
                SideState::Open as u8,
                SideState::HalfClosed as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    fn close(&self) {
        self.0.store(SideState::Closed as u8, Ordering::SeqCst);
    }
}

/// Direction states shared between a [`Stream`] and its connection's registry.
#[derive(Debug)]
pub(crate) struct StreamSides {
    read: Side,
    write: Side,
    /// False while finished data awaits acknowledgement.
    flushed: watch::Sender<bool>,
    /// Set once the owning `Stream` handle is dropped.
    detached: AtomicBool,
}

impl StreamSides {
    pub(crate) fn new() -> Self {
        let (flushed, _) = watch::channel(true);
        Self {
            read: Side::new(),
            write: Side::new(),
            flushed,
            detached: AtomicBool::new(false),
        }
    }

    pub(crate) fn close_both(&self) {
        self.read.close();
        self.write.close();
    }

    pub(crate) fn flush_pending(&self) -> bool {
        !*self.flushed.borrow()
    }

    pub(crate) fn flushed(&self) -> watch::Receiver<bool> {
        self.flushed.subscribe()
    }

    fn is_closed(&self) -> bool {
        self.read.get() != SideState::Open && self.write.get() != SideState::Open
    }
}

/// A bidirectional byte stream multiplexed over a connection.
#[derive(Debug)]
pub struct Stream {
    id: StreamId,
    /// Dropped once the write side half-closes.
    send: Option<quinn::SendStream>,
    recv: quinn::RecvStream,
    sides: Arc<StreamSides>,
    owner: Weak<ConnectionInner>,
}

impl Stream {
    pub(crate) fn new(
        send: quinn::SendStream,
        recv: quinn::RecvStream,
        sides: Arc<StreamSides>,
        owner: Weak<ConnectionInner>,
    ) -> Self {
        Self {
            id: send.id(),
            send: Some(send),
            recv,
            sides,
            owner,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn read_state(&self) -> SideState {
        self.sides.read.get()
    }

    pub fn write_state(&self) -> SideState {
        self.sides.write.get()
    }

    pub fn is_closed(&self) -> bool {
        self.sides.is_closed()
    }

    /// Queue `bytes` for sending; with `end_of_stream`, half-close the write
    /// side after them.
    ///
    /// Suspends while the peer's flow-control window is full.
    pub async fn write(&mut self, bytes: &[u8], end_of_stream: bool) -> TransportResult<()> {
        if self.sides.write.get() != SideState::Open {
            return Err(TransportError::StreamClosed(self.id));
        }
        let send = self
            .send
            .as_mut()
            .ok_or(TransportError::StreamClosed(self.id))?;

        if let Err(e) = send.write_all(bytes).await {
            return Err(self.write_failed(e));
        }
        if end_of_stream {
            self.finish()?;
        }
        Ok(())
    }

    /// Half-close the write side without sending more data.
    pub fn finish(&mut self) -> TransportResult<()> {
        if !self.sides.write.half_close() {
            return Err(TransportError::StreamClosed(self.id));
        }
        let Some(mut send) = self.send.take() else {
            return Err(TransportError::StreamClosed(self.id));
        };
        if send.finish().is_err() {
            self.sides.write.close();
            return Err(TransportError::StreamClosed(self.id));
        }

        self.sides.flushed.send_replace(false);
        let sides = Arc::clone(&self.sides);
        let owner = self.owner.clone();
        let id = self.id;
        tokio::spawn(async move {
            // Resolves once the peer has acknowledged everything, or the
            // connection is gone.
            let _ = send.stopped().await;
            sides.flushed.send_replace(true);
            if sides.detached.load(Ordering::SeqCst) {
                if let Some(owner) = owner.upgrade() {
                    owner.forget_stream(id);
                }
            }
        });

        tracing::trace!(stream_id = %self.id, "Write side half-closed");
        Ok(())
    }

    /// Wait for up to `max_bytes`. Returns `(bytes, true)` once the peer has
    /// half-closed and everything before it was read.
    pub async fn read(&mut self, max_bytes: usize) -> TransportResult<(Bytes, bool)> {
        if let Some(done) = self.check_readable()? {
            return Ok(done);
        }
        match self.recv.read_chunk(max_bytes, true).await {
            Ok(chunk) => Ok(self.on_chunk(chunk)),
            Err(e) => Err(self.read_failed(e)),
        }
    }

    /// Like [`Stream::read`], but returns zero bytes instead of waiting.
    pub fn try_read(&mut self, max_bytes: usize) -> TransportResult<(Bytes, bool)> {
        if let Some(done) = self.check_readable()? {
            return Ok(done);
        }
        match self.recv.read_chunk(max_bytes, true).now_or_never() {
            None => Ok((Bytes::new(), false)),
            Some(Ok(chunk)) => Ok(self.on_chunk(chunk)),
            Some(Err(e)) => Err(self.read_failed(e)),
        }
    }

    /// Read until the peer half-closes, failing once more than `limit` bytes
    /// have arrived.
    pub async fn read_to_end(&mut self, chunk_size: usize, limit: usize) -> TransportResult<Bytes> {
        let mut buffer = BytesMut::new();
        loop {
            let (bytes, end_of_stream) = self.read(chunk_size).await?;
            if buffer.len() + bytes.len() > limit {
                return Err(TransportError::PayloadTooLarge { limit });
            }
            buffer.extend_from_slice(&bytes);
            if end_of_stream {
                return Ok(buffer.freeze());
            }
        }
    }

    /// Abandon both directions, telling the peer with `code`.
    pub fn reset(&mut self, code: u32) {
        if let Some(mut send) = self.send.take() {
            let _ = send.reset(VarInt::from_u32(code));
        }
        let _ = self.recv.stop(VarInt::from_u32(code));
        self.sides.close_both();
    }

    fn check_readable(&self) -> TransportResult<Option<(Bytes, bool)>> {
        if self.sides.is_closed() {
            return Err(TransportError::StreamClosed(self.id));
        }
        if self.sides.read.get() != SideState::Open {
            return Ok(Some((Bytes::new(), true)));
        }
        Ok(None)
    }

    fn on_chunk(&mut self, chunk: Option<quinn::Chunk>) -> (Bytes, bool) {
        match chunk {
            Some(chunk) => (chunk.bytes, false),
            None => {
                self.sides.read.half_close();
                tracing::trace!(stream_id = %self.id, "Peer half-closed");
                (Bytes::new(), true)
            }
        }
    }

    fn read_failed(&mut self, err: quinn::ReadError) -> TransportError {
        match err {
            quinn::ReadError::ConnectionLost(e) => self.connection_lost(&e),
            other => {
                tracing::debug!(stream_id = %self.id, error = %other, "Read side aborted");
                self.sides.read.close();
                TransportError::StreamClosed(self.id)
            }
        }
    }

    fn write_failed(&mut self, err: quinn::WriteError) -> TransportError {
        match err {
            quinn::WriteError::ConnectionLost(e) => self.connection_lost(&e),
            other => {
                tracing::debug!(stream_id = %self.id, error = %other, "Write side aborted");
                self.send = None;
                self.sides.write.close();
                TransportError::StreamClosed(self.id)
            }
        }
    }

    fn connection_lost(&mut self, err: &quinn::ConnectionError) -> TransportError {
        self.sides.close_both();
        if let Some(owner) = self.owner.upgrade() {
            owner.mark_lost();
        }
        TransportError::from_connection(err)
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.sides.detached.store(true, Ordering::SeqCst);
        if !self.sides.flush_pending() {
            if let Some(owner) = self.owner.upgrade() {
                owner.forget_stream(self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_transitions() {
        let side = Side::new();
        assert_eq!(side.get(), SideState::Open);
        assert!(side.half_close());
        assert_eq!(side.get(), SideState::HalfClosed);
        assert!(!side.half_close());
        side.close();
        assert_eq!(side.get(), SideState::Closed);
    }

    #[test]
    fn closed_only_when_no_side_open() {
        let sides = StreamSides::new();
        assert!(!sides.is_closed());
        sides.write.half_close();
        assert!(!sides.is_closed());
        sides.read.half_close();
        assert!(sides.is_closed());
    }

    #[test]
    fn flush_flag_starts_clear() {
        let sides = StreamSides::new();
        assert!(!sides.flush_pending());
        sides.flushed.send_replace(false);
        assert!(sides.flush_pending());
    }
}
