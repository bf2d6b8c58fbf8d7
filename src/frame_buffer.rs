//! Latest-frame broadcaster between the encoder callback and stream clients.
//!
//! The encoder delivers a continuous MJPEG byte stream. [`FrameWriter`] cuts it
//! into frames on the JPEG start-of-image marker and publishes each completed
//! frame into the shared [`FrameBuffer`] slot. Every [`FrameSubscriber`] waiting
//! on the slot is woken by the publish and receives the same `Bytes` handle.
//! There is no queue: a subscriber that falls behind only ever sees the most
//! recent frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::watch;

/// JPEG start-of-image marker.
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

const BUF_CAPACITY: usize = 1920 * 1080 / 4;

/// Shared current-frame slot.
#[derive(Debug)]
pub struct FrameBuffer {
    slot: watch::Sender<Option<Bytes>>,
    published: AtomicU64,
}

impl FrameBuffer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: watch::channel(None).0,
            published: AtomicU64::new(0),
        })
    }

    /// Create the write half used by the encoder path.
    ///
    /// Each recording session gets a fresh writer so a half-accumulated frame
    /// from a stopped pipeline never leaks into the next one.
    pub fn writer(self: &Arc<Self>) -> FrameWriter {
        FrameWriter {
            buffer: Arc::clone(self),
            pending: BytesMut::with_capacity(BUF_CAPACITY),
        }
    }

    /// Attach a reader. The reader waits for the next publish, even when a
    /// frame is already in the slot.
    pub fn subscribe(&self) -> FrameSubscriber {
        FrameSubscriber {
            rx: self.slot.subscribe(),
        }
    }

    /// Most recently published frame, if any.
    pub fn latest(&self) -> Option<Bytes> {
        self.slot.borrow().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.slot.receiver_count()
    }

    pub fn frames_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    fn publish(&self, frame: Bytes) {
        // send_replace stores the frame even when nobody is subscribed yet
        self.slot.send_replace(Some(frame));
        self.published.fetch_add(1, Ordering::Relaxed);
    }
}

/// Accumulator owned by the encoder callback.
#[derive(Debug)]
pub struct FrameWriter {
    buffer: Arc<FrameBuffer>,
    pending: BytesMut,
}

impl FrameWriter {
    /// Append an encoder chunk, publishing the previous frame first when the
    /// chunk opens a new image. Returns the number of bytes consumed.
    pub fn write(&mut self, chunk: &[u8]) -> usize {
        if chunk.starts_with(&JPEG_SOI) {
            self.finish();
        }
        self.pending.extend_from_slice(chunk);
        chunk.len()
    }

    /// Publish whatever has been accumulated as a complete frame.
    pub fn finish(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let frame = self.pending.split().freeze();
        self.buffer.publish(frame);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Read half held by one streaming connection.
#[derive(Debug)]
pub struct FrameSubscriber {
    rx: watch::Receiver<Option<Bytes>>,
}

impl FrameSubscriber {
    /// Suspend until the next frame is published and return it.
    ///
    /// Returns `None` once the [`FrameBuffer`] has been dropped.
    pub async fn wait_for_frame(&mut self) -> Option<Bytes> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(frame) = self.rx.borrow_and_update().clone() {
                return Some(frame);
            }
        }
    }
}
