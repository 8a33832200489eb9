//! Fixed-capacity circular store of decoded pictures

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;
use tracing::{debug, warn};

use crate::capture::Picture;
use crate::error::{Error, OverflowError, ValidationError};
use crate::pipeline::lock;

const NO_HEAD: u64 = u64::MAX;

/// Decides when the occupant of a slot may be overwritten.
///
/// `publish` must run while the gate holds whatever lock readers resolve
/// indices under, so a reader never observes an index it was not handed.
pub trait EvictionGate {
    fn admit<F: FnOnce()>(
        &self,
        incoming: u64,
        evicting: Option<u64>,
        publish: F,
    ) -> Result<Admission, OverflowError>;
}

/// How a write got its slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// No consumer needed the evicted picture
    Clear,
    /// The picture was dropped while `lagging` consumers still needed it
    Forced { evicted: u64, lagging: Vec<String> },
}

/// Gate for a buffer with no consumers attached
#[derive(Debug, Default, Clone, Copy)]
pub struct Ungated;

impl EvictionGate for Ungated {
    fn admit<F: FnOnce()>(
        &self,
        _incoming: u64,
        _evicting: Option<u64>,
        publish: F,
    ) -> Result<Admission, OverflowError> {
        publish();
        Ok(Admission::Clear)
    }
}

/// Result of waiting for a new picture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    Ready(u64),
    Closed,
    TimedOut,
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicU64,
    frames_dropped: AtomicU64,
}

/// Ring of `capacity` slots addressed by `index % capacity`.
///
/// Single writer, many readers. Each slot is an atomically swapped `Arc`, so a
/// reader either gets the whole old picture or the whole new one, and keeps it
/// alive for as long as it holds the `Arc`.
pub struct FrameBuffer {
    slots: Box<[ArcSwapOption<Picture>]>,
    /// Index of the most recently published picture, `NO_HEAD` before the first write
    head: CachePadded<AtomicU64>,
    /// Set once the producer side is gone; guards `arrived`
    closed: Mutex<bool>,
    arrived: Condvar,
    stats: CachePadded<Stats>,
}

impl FrameBuffer {
    /// # Panics
    ///
    /// Panics if `capacity` is zero. `Config::validate` rejects a zero `buffer.size`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "frame buffer needs at least one slot");
        Self {
            slots: (0..capacity).map(|_| ArcSwapOption::empty()).collect(),
            head: CachePadded::new(AtomicU64::new(NO_HEAD)),
            closed: Mutex::new(false),
            arrived: Condvar::new(),
            stats: CachePadded::new(Stats::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, index: u64) -> &ArcSwapOption<Picture> {
        &self.slots[(index % self.slots.len() as u64) as usize]
    }

    /// Index of the most recently written picture
    pub fn head_index(&self) -> Option<u64> {
        match self.head.load(Ordering::Acquire) {
            NO_HEAD => None,
            head => Some(head),
        }
    }

    /// `(oldest, head)` indices currently addressable
    pub fn window(&self) -> Option<(u64, u64)> {
        self.head_index().map(|head| {
            let oldest = (head + 1).saturating_sub(self.slots.len() as u64);
            (oldest, head)
        })
    }

    /// Producer: publish the next picture into its slot.
    ///
    /// Waits on `gate` while the slot's occupant is still needed; the gate
    /// decides between dropping it and failing with an overflow.
    pub fn write<G: EvictionGate>(&self, picture: Picture, gate: &G) -> Result<Admission, Error> {
        let index = picture.index;
        if let Some(head) = self.head_index() {
            if index <= head {
                return Err(ValidationError::NonIncreasingIndex { index, head }.into());
            }
        }

        let slot = self.slot(index);
        let evicting = slot.load().as_ref().map(|p| p.index);
        let picture = Arc::new(picture);
        let admission = gate.admit(index, evicting, || {
            slot.store(Some(picture));
            self.head.store(index, Ordering::Release);
        })?;

        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_written").increment(1);
        match &admission {
            Admission::Clear => debug!(index, ?evicting, "Frame published"),
            Admission::Forced { evicted, lagging } => {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("frames_dropped").increment(1);
                warn!(index, evicted, ?lagging, "Dropped frame still needed by lagging consumers");
            }
        }

        // Lock before notifying so a reader between its head check and its wait cannot miss this.
        let _closed = lock(&self.closed);
        self.arrived.notify_all();
        Ok(admission)
    }

    /// Read-only view of the picture with `index`, if it is still live
    pub fn read(&self, index: u64) -> Result<Arc<Picture>, ValidationError> {
        let window = self.window();
        let out_of_window = || ValidationError::IndexOutOfWindow { index, window };
        let (oldest, head) = window.ok_or_else(out_of_window)?;
        if index < oldest || index > head {
            return Err(out_of_window());
        }

        match self.slot(index).load_full() {
            Some(picture) if picture.index == index => Ok(picture),
            // overwritten between the window check and the load, or never written
            _ => Err(ValidationError::IndexOutOfWindow {
                index,
                window: self.window(),
            }),
        }
    }

    /// Blocks until the head moves past `after` (or until any picture exists when `after` is `None`).
    pub fn wait_for_head_beyond(&self, after: Option<u64>, timeout: Duration) -> Arrival {
        let deadline = Instant::now() + timeout;
        let mut closed = lock(&self.closed);
        loop {
            if let Some(head) = self.head_index() {
                if after.map_or(true, |after| head > after) {
                    return Arrival::Ready(head);
                }
            }
            if *closed {
                return Arrival::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return Arrival::TimedOut;
            }
            closed = match self.arrived.wait_timeout(closed, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Wakes every waiting reader; no further pictures will arrive
    pub fn close(&self) {
        *lock(&self.closed) = true;
        self.arrived.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        *lock(&self.closed)
    }

    /// `(frames_written, frames_dropped)`
    pub fn stats(&self) -> (u64, u64) {
        (
            self.stats.frames_written.load(Ordering::Relaxed),
            self.stats.frames_dropped.load(Ordering::Relaxed),
        )
    }
}
