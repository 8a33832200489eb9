//! Named consumers and the eviction watermark they hold

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::capture::Picture;
use crate::error::{Error, OverflowError, ValidationError};
use crate::pipeline::buffer::{Admission, EvictionGate, FrameBuffer};
use crate::pipeline::lock;

/// Deepest delay a consumer may ask for
pub const MIN_DELAY: i32 = -10;

/// What ingestion does when a slot is still needed after the overflow wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Overwrite anyway and mark the lagging consumers as lapsed
    #[default]
    DropOldest,
    /// Fail ingestion with [`OverflowError::Stalled`]
    Backpressure,
}

/// Per-consumer bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerState {
    /// Index handed out by the latest read
    pub last_index: u64,
    /// Buffer head at the latest read
    pub last_head: u64,
    pub reads: u64,
    /// Lost a frame to overflow; holds no watermark until its next read
    pub lapsed: bool,
}

/// A resolved read: the index and the picture that lives there
#[derive(Debug, Clone)]
pub struct Resolved {
    pub index: u64,
    pub head: u64,
    pub picture: Arc<Picture>,
}

#[derive(Default)]
struct Inner {
    consumers: HashMap<String, ConsumerState>,
    /// Multiset of `last_index` over consumers that are not lapsed
    marks: BTreeMap<u64, usize>,
    closed: bool,
}

impl Inner {
    fn watermark(&self) -> Option<u64> {
        self.marks.keys().next().copied()
    }

    fn add_mark(&mut self, index: u64) {
        *self.marks.entry(index).or_insert(0) += 1;
    }

    fn remove_mark(&mut self, index: u64) {
        if let Some(count) = self.marks.get_mut(&index) {
            *count -= 1;
            if *count == 0 {
                self.marks.remove(&index);
            }
        }
    }

    /// Every watermark-holding consumer has been handed `evicted` or later
    fn releases(&self, evicted: u64) -> bool {
        self.watermark().map_or(true, |mark| mark >= evicted)
    }

    fn lagging(&self, evicted: u64) -> Vec<String> {
        let mut names: Vec<String> = self
            .consumers
            .iter()
            .filter(|(_, state)| !state.lapsed && state.last_index < evicted)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

/// Tracks what each named consumer has been given and gates slot reuse on
/// the slowest of them.
pub struct ConsumerRegistry {
    inner: Mutex<Inner>,
    /// Signalled whenever the watermark may have moved
    progress: Condvar,
    policy: OverflowPolicy,
    overflow_wait: Duration,
    lapses: AtomicU64,
}

impl ConsumerRegistry {
    pub fn new(policy: OverflowPolicy, overflow_wait: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            progress: Condvar::new(),
            policy,
            overflow_wait,
            lapses: AtomicU64::new(0),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }

    pub fn validate_delay(name: &str, delay: i32) -> Result<(), ValidationError> {
        if (MIN_DELAY..=0).contains(&delay) {
            Ok(())
        } else {
            Err(ValidationError::DelayOutOfRange {
                consumer: name.to_string(),
                delay,
                min: MIN_DELAY,
            })
        }
    }

    /// Maps `delay` frames before the head to a live index and hands out the
    /// picture there, creating the consumer on first use.
    ///
    /// Deep delays are clamped to the oldest live picture.
    pub fn resolve(&self, name: &str, delay: i32, buffer: &FrameBuffer) -> Result<Resolved, Error> {
        Self::validate_delay(name, delay)?;

        let mut inner = self.inner();
        if inner.closed {
            return Err(Error::Stopped);
        }
        let (oldest, head) = buffer.window().ok_or(Error::NotReady)?;
        let index = head.saturating_sub(delay.unsigned_abs() as u64).max(oldest);
        let picture = buffer.read(index)?;

        let previous = inner.consumers.get(name).copied();
        match previous {
            Some(state) if !state.lapsed => inner.remove_mark(state.last_index),
            Some(_) => info!(consumer = name, index, "Lapsed consumer caught up"),
            None => info!(consumer = name, index, "Registered consumer"),
        }
        inner.add_mark(index);
        inner.consumers.insert(
            name.to_string(),
            ConsumerState {
                last_index: index,
                last_head: head,
                reads: previous.map_or(0, |s| s.reads) + 1,
                lapsed: false,
            },
        );
        drop(inner);

        self.progress.notify_all();
        Ok(Resolved {
            index,
            head,
            picture,
        })
    }

    /// Head the consumer saw on its latest read
    pub fn last_head(&self, name: &str) -> Option<u64> {
        self.inner().consumers.get(name).map(|state| state.last_head)
    }

    pub fn consumer(&self, name: &str) -> Option<ConsumerState> {
        self.inner().consumers.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.inner().consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Minimum `last_index` over consumers that still hold frames back
    pub fn watermark(&self) -> Option<u64> {
        self.inner().watermark()
    }

    pub fn lapses(&self) -> u64 {
        self.lapses.load(Ordering::Relaxed)
    }

    /// Forgets every consumer and stops gating writes
    pub fn close(&self) {
        let mut inner = self.inner();
        inner.closed = true;
        inner.consumers.clear();
        inner.marks.clear();
        drop(inner);
        self.progress.notify_all();
    }
}

impl EvictionGate for ConsumerRegistry {
    fn admit<F: FnOnce()>(
        &self,
        incoming: u64,
        evicting: Option<u64>,
        publish: F,
    ) -> Result<Admission, OverflowError> {
        let mut inner = self.inner();
        let Some(evicted) = evicting else {
            publish();
            return Ok(Admission::Clear);
        };

        let started = Instant::now();
        let deadline = started + self.overflow_wait;
        loop {
            if inner.closed || inner.releases(evicted) {
                publish();
                return Ok(Admission::Clear);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            inner = match self.progress.wait_timeout(inner, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }

        let lagging = inner.lagging(evicted);
        match self.policy {
            OverflowPolicy::DropOldest => {
                for name in &lagging {
                    if let Some(state) = inner.consumers.get_mut(name) {
                        state.lapsed = true;
                        let last = state.last_index;
                        inner.remove_mark(last);
                    }
                    debug!(consumer = %name, evicted, "Consumer lapsed");
                }
                self.lapses
                    .fetch_add(lagging.len() as u64, Ordering::Relaxed);
                metrics::counter!("consumer_lapsed").increment(lagging.len() as u64);
                publish();
                Ok(Admission::Forced { evicted, lagging })
            }
            OverflowPolicy::Backpressure => Err(OverflowError::Stalled {
                index: incoming,
                evicted,
                lagging,
                waited: started.elapsed(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{DecodedPicture, SyntheticDecoder};
    use proptest::prelude::*;
    use std::thread;

    fn picture(index: u64) -> Picture {
        Picture::from_decoded(
            index,
            DecodedPicture {
                width: 2,
                height: 2,
                data: SyntheticDecoder::pattern(2, 2, index),
                pts: None,
            },
        )
        .unwrap()
    }

    fn registry(policy: OverflowPolicy) -> ConsumerRegistry {
        ConsumerRegistry::new(policy, Duration::from_millis(20))
    }

    #[test]
    fn rejects_delay_outside_range() {
        let buffer = FrameBuffer::new(4);
        let registry = registry(OverflowPolicy::DropOldest);
        buffer.write(picture(0), &registry).unwrap();
        for delay in [1, -11] {
            let err = registry.resolve("a", delay, &buffer).unwrap_err();
            assert!(matches!(
                err,
                Error::Validation(ValidationError::DelayOutOfRange { .. })
            ));
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn not_ready_before_first_frame() {
        let buffer = FrameBuffer::new(4);
        let registry = registry(OverflowPolicy::DropOldest);
        assert!(matches!(registry.resolve("a", 0, &buffer), Err(Error::NotReady)));
    }

    #[test]
    fn deep_delay_clamps_to_oldest() {
        let buffer = FrameBuffer::new(4);
        let registry = registry(OverflowPolicy::DropOldest);
        for i in 0..3 {
            buffer.write(picture(i), &registry).unwrap();
        }
        assert_eq!(registry.resolve("a", -10, &buffer).unwrap().index, 0);
        assert_eq!(registry.resolve("a", -1, &buffer).unwrap().index, 1);
        assert_eq!(registry.resolve("a", 0, &buffer).unwrap().index, 2);
    }

    #[test]
    fn watermark_is_minimum_over_consumers() {
        let buffer = FrameBuffer::new(8);
        let registry = registry(OverflowPolicy::DropOldest);
        for i in 0..6 {
            buffer.write(picture(i), &registry).unwrap();
        }
        registry.resolve("fast", 0, &buffer).unwrap();
        registry.resolve("slow", -4, &buffer).unwrap();
        assert_eq!(registry.watermark(), Some(1));

        // a re-read further back lowers the mark, it never raises it past the old one
        registry.resolve("fast", -5, &buffer).unwrap();
        assert_eq!(registry.watermark(), Some(0));
        assert_eq!(registry.consumer("fast").unwrap().reads, 2);
    }

    #[test]
    fn lagging_consumer_blocks_then_lapses() {
        let buffer = FrameBuffer::new(2);
        let registry = registry(OverflowPolicy::DropOldest);
        buffer.write(picture(0), &registry).unwrap();
        registry.resolve("slow", 0, &buffer).unwrap();
        buffer.write(picture(1), &registry).unwrap();

        // slot of frame 0 is free: "slow" already has it
        assert_eq!(buffer.write(picture(2), &registry).unwrap(), Admission::Clear);

        // frame 1 has not been handed to "slow" yet
        let started = Instant::now();
        let admission = buffer.write(picture(3), &registry).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(
            admission,
            Admission::Forced {
                evicted: 1,
                lagging: vec!["slow".to_string()]
            }
        );
        assert!(registry.consumer("slow").unwrap().lapsed);
        assert_eq!(registry.watermark(), None);
        assert_eq!(registry.lapses(), 1);
        assert_eq!(buffer.stats(), (4, 1));

        // a lapsed consumer no longer slows ingestion
        let started = Instant::now();
        assert_eq!(buffer.write(picture(4), &registry).unwrap(), Admission::Clear);
        assert!(started.elapsed() < Duration::from_millis(20));

        // and rejoins the watermark on its next read
        registry.resolve("slow", 0, &buffer).unwrap();
        assert_eq!(registry.watermark(), Some(4));
    }

    #[test]
    fn backpressure_policy_reports_stall() {
        let buffer = FrameBuffer::new(1);
        let registry = registry(OverflowPolicy::Backpressure);
        buffer.write(picture(0), &registry).unwrap();
        registry.resolve("stuck", 0, &buffer).unwrap();
        buffer.write(picture(1), &registry).unwrap();
        let err = buffer.write(picture(2), &registry).unwrap_err();
        match err {
            Error::Overflow(OverflowError::Stalled {
                index,
                evicted,
                lagging,
                ..
            }) => {
                assert_eq!((index, evicted), (2, 1));
                assert_eq!(lagging, vec!["stuck".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
        // nothing was overwritten
        assert_eq!(buffer.head_index(), Some(1));
    }

    #[test]
    fn reader_progress_releases_waiting_writer() {
        let buffer = Arc::new(FrameBuffer::new(1));
        let registry = Arc::new(ConsumerRegistry::new(
            OverflowPolicy::Backpressure,
            Duration::from_secs(5),
        ));
        buffer.write(picture(0), &*registry).unwrap();
        registry.resolve("reader", 0, &buffer).unwrap();
        buffer.write(picture(1), &*registry).unwrap();

        let writer = {
            let (buffer, registry) = (buffer.clone(), registry.clone());
            thread::spawn(move || buffer.write(picture(2), &*registry))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(registry.resolve("reader", 0, &buffer).unwrap().index, 1);
        assert_eq!(writer.join().unwrap().unwrap(), Admission::Clear);
        assert_eq!(buffer.head_index(), Some(2));
    }

    #[test]
    fn close_releases_writer_and_refuses_readers() {
        let buffer = FrameBuffer::new(1);
        let registry = registry(OverflowPolicy::Backpressure);
        buffer.write(picture(0), &registry).unwrap();
        registry.resolve("a", 0, &buffer).unwrap();
        buffer.write(picture(1), &registry).unwrap();
        registry.close();
        assert_eq!(buffer.write(picture(2), &registry).unwrap(), Admission::Clear);
        assert!(matches!(registry.resolve("a", 0, &buffer), Err(Error::Stopped)));
        assert!(registry.is_empty());
    }

    #[test]
    fn timely_reader_sees_every_frame() {
        // buffer of 10, 20 frames, "B" reads each one as it lands
        let buffer = FrameBuffer::new(10);
        let registry = registry(OverflowPolicy::DropOldest);
        let mut seen = Vec::new();
        for i in 0..20 {
            assert_eq!(buffer.write(picture(i), &registry).unwrap(), Admission::Clear);
            seen.push(registry.resolve("B", 0, &buffer).unwrap().index);
        }
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
        assert_eq!(buffer.window(), Some((10, 19)));
        assert!(buffer.read(9).is_err());
    }

    proptest! {
        #[test]
        fn resolved_index_stays_in_window(
            capacity in 1usize..16,
            writes in 1u64..40,
            delays in prop::collection::vec(MIN_DELAY..=0, 1..20),
        ) {
            let buffer = FrameBuffer::new(capacity);
            let registry = ConsumerRegistry::new(OverflowPolicy::DropOldest, Duration::ZERO);
            for i in 0..writes {
                buffer.write(picture(i), &registry).unwrap();
            }
            for delay in delays {
                let resolved = registry.resolve("p", delay, &buffer).unwrap();
                let (oldest, head) = buffer.window().unwrap();
                prop_assert!(resolved.index >= oldest && resolved.index <= head);
                prop_assert_eq!(resolved.picture.index, resolved.index);
            }
        }
    }
}
