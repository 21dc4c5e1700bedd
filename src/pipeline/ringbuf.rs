//! Bounded frame ring buffer shared between one producer and its consumers

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crossbeam::utils::CachePadded;
use tracing::{debug, warn};

use crate::capture::{Frame, FrameShape, Roi};

/// What `add_frame` did with a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Stored at the head
    Appended,
    /// Stored after evicting the oldest frame
    Overwrote,
    /// Stored, and the buffer adopted the frame's shape
    Reshaped,
    /// Stored, and this frame completed the target count
    TargetReached,
    /// Not stored: count-limited buffer is full, target already reached, or closed
    Rejected,
}

impl AddOutcome {
    pub fn stored(self) -> bool {
        self != AddOutcome::Rejected
    }
}

/// Sent to subscribers once a count-limited buffer reaches its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetReached {
    pub target: usize,
}

/// Frame ring buffer with overwrite or count-limited policy.
///
/// The deque's back is the head (newest frame), its front the tail. Every
/// operation takes the single internal lock and does no I/O under it.
pub struct FrameBuffer {
    name: String,
    inner: Mutex<Inner>,

    /// Statistics
    stats: CachePadded<Stats>,
}

struct Inner {
    frames: VecDeque<Frame>,
    capacity: usize,
    shape: FrameShape,
    overwrite: bool,
    appended: usize,
    target: usize,
    target_hit: bool,
    closed: bool,
    subscribers: Vec<flume::Sender<TargetReached>>,
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicUsize,
    frames_read: AtomicUsize,
    frames_dropped: AtomicUsize,
}

impl FrameBuffer {
    /// Overwriting buffer of `capacity` frames (at least one)
    pub fn new(name: impl Into<String>, capacity: usize, shape: FrameShape) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                capacity,
                shape,
                overwrite: true,
                appended: 0,
                target: 0,
                target_hit: false,
                closed: false,
                subscribers: Vec::new(),
            }),
            stats: CachePadded::new(Stats::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking holder cannot leave the deque torn; keep serving
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Producer: store a frame according to the buffer's policy
    pub fn add_frame(&self, frame: Frame) -> AddOutcome {
        let mut inner = self.lock();

        if inner.closed || inner.target_hit {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return AddOutcome::Rejected;
        }

        let shape = frame.shape();
        let reshaped = shape != inner.shape;
        if reshaped {
            // Frames of the old shape stay queued until drained
            warn!(buffer = %self.name, old = ?inner.shape, new = ?shape, "Frame shape changed");
            inner.shape = shape;
        }

        let mut evicted = false;
        if inner.frames.len() >= inner.capacity {
            if !inner.overwrite {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                return AddOutcome::Rejected;
            }
            inner.frames.pop_front();
            evicted = true;
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }

        inner.frames.push_back(frame);
        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);

        if inner.target > 0 {
            inner.appended += 1;
            if inner.appended >= inner.target {
                inner.target_hit = true;
                inner.appended = 0;
                let note = TargetReached {
                    target: inner.target,
                };
                inner.subscribers.retain(|tx| tx.send(note).is_ok());
                debug!(buffer = %self.name, target = note.target, "Target reached");
                return AddOutcome::TargetReached;
            }
        }

        if reshaped {
            AddOutcome::Reshaped
        } else if evicted {
            AddOutcome::Overwrote
        } else {
            AddOutcome::Appended
        }
    }

    /// Consumer: remove the oldest frame
    pub fn pop_oldest(&self) -> Option<Frame> {
        let frame = self.lock().frames.pop_front()?;
        self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    /// Consumer: remove the newest frame
    pub fn pop_newest(&self) -> Option<Frame> {
        let frame = self.lock().frames.pop_back()?;
        self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    /// Newest frame without removing it
    pub fn peek_newest(&self) -> Option<Frame> {
        self.lock().frames.back().cloned()
    }

    /// Change capacity, dropping the oldest frames if the buffer shrinks
    pub fn resize(&self, capacity: usize) {
        let capacity = capacity.max(1);
        let mut inner = self.lock();
        while inner.frames.len() > capacity {
            inner.frames.pop_front();
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
        inner.capacity = capacity;
    }

    /// Adopt the ROI's geometry and discard everything queued
    pub fn change_roi(&self, roi: &Roi) {
        let mut inner = self.lock();
        inner.shape = FrameShape {
            height: roi.height,
            width: roi.width,
            channels: inner.shape.channels.max(1),
        };
        Self::reset(&mut inner);
    }

    /// Set the fill policy for a new session and empty the buffer.
    ///
    /// A non-zero `target` caps how many frames the session stores in
    /// either mode; 0 disables it. Reopens a closed buffer.
    pub fn configure(&self, overwrite: bool, capacity: usize, target: usize) {
        let mut inner = self.lock();
        inner.overwrite = overwrite;
        inner.capacity = capacity.max(1);
        inner.target = target;
        Self::reset(&mut inner);
    }

    pub fn clear(&self) {
        Self::reset(&mut self.lock());
    }

    fn reset(inner: &mut Inner) {
        inner.frames.clear();
        inner.appended = 0;
        inner.target_hit = false;
        inner.closed = false;
    }

    /// Refuse every further frame until the next `configure` or `clear`.
    ///
    /// Once a consumer has seen the buffer closed, an empty pop means it is
    /// fully drained.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Receive a message each time the target count is reached
    pub fn subscribe_target(&self) -> flume::Receiver<TargetReached> {
        let (tx, rx) = flume::unbounded();
        self.lock().subscribers.push(tx);
        rx
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn shape(&self) -> FrameShape {
        self.lock().shape
    }

    pub fn overwrite_allowed(&self) -> bool {
        self.lock().overwrite
    }

    pub fn appended_count(&self) -> usize {
        self.lock().appended
    }

    pub fn target_count(&self) -> usize {
        self.lock().target
    }

    pub fn is_complete(&self) -> bool {
        self.lock().target_hit
    }

    /// `(written, read, dropped)` frame counters
    pub fn stats(&self) -> (usize, usize, usize) {
        (
            self.stats.frames_written.load(Ordering::Relaxed),
            self.stats.frames_read.load(Ordering::Relaxed),
            self.stats.frames_dropped.load(Ordering::Relaxed),
        )
    }
}
