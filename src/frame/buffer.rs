//! Latest-wins frame slot shared by the producer callback and the display loop
//!
//! # Design
//!
//! The slot holds at most one frame behind an `Arc`:
//! - **Producer**: copies runtime memory into owned storage *outside* the
//!   lock, then swaps the new frame in. The lock is only held for the swap.
//! - **Consumer**: clones the `Arc` under the lock and presents it without
//!   the lock held. The producer can replace the slot meanwhile, but never
//!   mutate a frame that a reader still holds.
//!
//! A frame replaced before anyone read it is dropped and counted. Storage of
//! evicted frames that nobody references any more goes back to a small pool,
//! so a steady stream of same-sized frames stops allocating.

use super::pool::FramePool;
use super::{Frame, FrameError, FrameMetadata};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const POOL_CAPACITY: usize = 2;

struct Slot {
    frame: Option<Arc<Frame>>,
    /// Set by the producer, cleared by the first read of that frame
    unread: bool,
}

/// Counters describing the traffic through a [`FrameBuffer`].
#[derive(Debug, Default)]
pub struct FrameStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
    snapshots: AtomicU64,
}

impl FrameStats {
    /// Frames stored by the producer
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Frames replaced before the consumer saw them
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Non-empty snapshots handed to the consumer
    pub fn snapshots(&self) -> u64 {
        self.snapshots.load(Ordering::Relaxed)
    }
}

/// Holds the most recent frame delivered by a chain.
pub struct FrameBuffer {
    slot: Mutex<Slot>,
    pool: Mutex<FramePool>,
    stats: FrameStats,
}

impl FrameBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                frame: None,
                unread: false,
            }),
            pool: Mutex::new(FramePool::new(POOL_CAPACITY)),
            stats: FrameStats::default(),
        }
    }

    // A poisoned lock still guards a consistent slot: every critical section
    // is a plain field swap.
    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pool(&self) -> MutexGuard<'_, FramePool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `frame`, evicting whatever was held before.
    pub fn replace(&self, frame: Frame) {
        let frame = Arc::new(frame);
        let (previous, was_unread) = {
            let mut slot = self.lock_slot();
            let was_unread = slot.unread;
            slot.unread = true;
            (slot.frame.replace(frame), was_unread)
        };

        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
        if let Some(previous) = previous {
            if was_unread {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
            self.recycle(previous);
        }
    }

    /// Copy memory owned by the runtime into the buffer.
    ///
    /// `raw` is only read during this call, so the runtime may reuse it as
    /// soon as this returns.
    pub fn replace_from_raw(&self, raw: &[u8], meta: FrameMetadata) -> Result<(), FrameError> {
        let storage = match meta.byte_len() {
            Some(len) => self.lock_pool().take(len),
            None => Vec::new(),
        };
        let frame = Frame::copy_into(raw, meta, storage)?;
        self.replace(frame);
        Ok(())
    }

    /// Get the most recent frame, if any was delivered yet.
    pub fn read_snapshot(&self) -> Option<Arc<Frame>> {
        let snapshot = {
            let mut slot = self.lock_slot();
            slot.unread = false;
            slot.frame.clone()
        };
        if snapshot.is_some() {
            self.stats.snapshots.fetch_add(1, Ordering::Relaxed);
        }
        snapshot
    }

    /// Check if a frame arrived since the last snapshot
    pub fn has_new_frame(&self) -> bool {
        self.lock_slot().unread
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    fn recycle(&self, previous: Arc<Frame>) {
        // Still shared with a reader: the reader frees it when done.
        if let Ok(frame) = Arc::try_unwrap(previous) {
            self.lock_pool().put(frame.into_data());
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
