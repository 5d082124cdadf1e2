//! Lock-free sample ring for handing audio from the capture callback to the UI tick
//!
//! The audio callback runs on a real-time thread and must never wait for the
//! thread that redraws the display or writes the recording to disk. This ring
//! is a fixed block of atomic slots with monotonically increasing cursors:
//!
//! - `claimed` / `written` are owned by the producer (audio thread)
//! - `read` is owned by the consumer (UI tick)
//!
//! Unlike a plain SPSC queue, the producer never waits for space. When it laps
//! the consumer, the oldest unread samples are overwritten and the loss shows
//! up in [`RingStats::overruns`]. The producer announces the range it is about
//! to overwrite in `claimed` before touching any slot, and the consumer checks
//! `claimed` after copying, so a range that was overwritten mid-copy is
//! dropped instead of being returned torn.
//!
//! The single [`SampleConsumer`] is handed out together with the ring. At most
//! one [`SampleProducer`] exists at a time; it releases its claim when dropped,
//! so a new capture stream can take it after the previous stream is gone.

use std::sync::atomic::{fence, AtomicBool, AtomicI16, AtomicU64, Ordering};
use std::sync::Arc;

/// One mono amplitude value (signed 16-bit PCM)
pub type Sample = i16;

struct Shared {
    slots: Box<[AtomicI16]>,
    capacity: u64,

    /// End of the range the producer is currently writing
    claimed: AtomicU64,
    /// End of the range the producer has committed
    written: AtomicU64,
    /// Next position the consumer will read
    read: AtomicU64,

    /// Samples the consumer skipped or threw away because they were overwritten
    lost: AtomicU64,
    /// Samples offered after the ring was closed
    discarded: AtomicU64,

    closed: AtomicBool,
    producer_taken: AtomicBool,
    pull_threshold: usize,
}

impl Shared {
    /// Oldest position that can still be read
    #[inline]
    fn floor(&self, written: u64) -> u64 {
        written.saturating_sub(self.capacity)
    }

    #[inline]
    fn slot(&self, pos: u64) -> &AtomicI16 {
        &self.slots[(pos % self.capacity) as usize]
    }

    fn available(&self) -> usize {
        let written = self.written.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        (written - read.max(self.floor(written))) as usize
    }

    fn pending_overrun(&self) -> u64 {
        let written = self.written.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        self.floor(written).saturating_sub(read)
    }
}

/// Counters describing the ring's health
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    pub capacity: usize,
    /// Unread samples, never more than `capacity`
    pub available: usize,
    /// Total samples accepted by `push`
    pub written: u64,
    /// Unread samples lost to overwriting
    pub overruns: u64,
    /// Samples offered after the ring was closed
    pub discarded: u64,
}

/// Shared handle to the ring.
///
/// Cloning is cheap and every clone refers to the same storage. The handle
/// itself can only observe and open/close the ring; reading and writing go
/// through the producer and consumer halves.
#[derive(Clone)]
pub struct SampleRing {
    shared: Arc<Shared>,
}

impl SampleRing {
    /// Create a ring holding `capacity` samples, along with its consumer
    ///
    /// Panics if `capacity` is zero.
    pub fn with_consumer(capacity: usize) -> (Self, SampleConsumer) {
        Self::with_pull_threshold(capacity, 1)
    }

    /// Like [`with_consumer`](Self::with_consumer), but the consumer's
    /// `pull_into` returns nothing until at least `threshold` samples are ready
    pub fn with_pull_threshold(capacity: usize, threshold: usize) -> (Self, SampleConsumer) {
        assert!(capacity > 0, "sample ring capacity must be non-zero");

        let slots: Box<[AtomicI16]> = (0..capacity).map(|_| AtomicI16::new(0)).collect();

        let shared = Arc::new(Shared {
            slots,
            capacity: capacity as u64,
            claimed: AtomicU64::new(0),
            written: AtomicU64::new(0),
            read: AtomicU64::new(0),
            lost: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            producer_taken: AtomicBool::new(false),
            pull_threshold: threshold.clamp(1, capacity),
        });
        let consumer = SampleConsumer {
            shared: Arc::clone(&shared),
        };
        (Self { shared }, consumer)
    }

    /// Take the producer half, if nobody holds it
    pub fn producer(&self) -> Option<SampleProducer> {
        self.shared
            .producer_taken
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SampleProducer {
                shared: Arc::clone(&self.shared),
            })
    }

    /// Stop accepting samples. Anything already written can still be pulled.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }

    /// Accept samples again after `close`
    pub fn reopen(&self) {
        self.shared.closed.store(false, Ordering::Release);
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity as usize
    }

    /// Number of unread samples
    pub fn available(&self) -> usize {
        self.shared.available()
    }

    pub fn stats(&self) -> RingStats {
        let shared = &*self.shared;
        RingStats {
            capacity: shared.capacity as usize,
            available: shared.available(),
            written: shared.written.load(Ordering::Acquire),
            overruns: shared.lost.load(Ordering::Acquire) + shared.pending_overrun(),
            discarded: shared.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Producer half of the ring (owned by the audio callback)
pub struct SampleProducer {
    shared: Arc<Shared>,
}

impl SampleProducer {
    /// Append samples, overwriting the oldest unread ones if the ring is full
    ///
    /// Never blocks and never allocates. Returns the number of samples
    /// accepted, which is zero once the ring is closed.
    #[inline]
    pub fn push(&mut self, samples: &[Sample]) -> usize {
        let shared = &*self.shared;

        if shared.closed.load(Ordering::Acquire) {
            shared
                .discarded
                .fetch_add(samples.len() as u64, Ordering::Relaxed);
            return 0;
        }
        if samples.is_empty() {
            return 0;
        }

        let start = shared.written.load(Ordering::Relaxed);
        let end = start + samples.len() as u64;

        // Only the newest `capacity` samples of an oversized push can survive.
        let skip = samples.len().saturating_sub(shared.slots.len());
        let first = start + skip as u64;

        shared.claimed.store(end, Ordering::Relaxed);
        fence(Ordering::Release);

        for (offset, &sample) in samples[skip..].iter().enumerate() {
            shared
                .slot(first + offset as u64)
                .store(sample, Ordering::Relaxed);
        }

        shared.written.store(end, Ordering::Release);
        samples.len()
    }

    /// Count samples that were dropped before reaching the ring
    #[inline]
    pub fn discard(&mut self, count: usize) {
        if count > 0 {
            self.shared
                .discarded
                .fetch_add(count as u64, Ordering::Relaxed);
        }
    }
}

impl Drop for SampleProducer {
    fn drop(&mut self) {
        self.shared.producer_taken.store(false, Ordering::Release);
    }
}

/// Consumer half of the ring (owned by the periodic tick)
pub struct SampleConsumer {
    shared: Arc<Shared>,
}

impl SampleConsumer {
    /// Pull up to `max_count` of the oldest unread samples into `out`
    ///
    /// `out` is cleared first. Nothing is pulled while fewer than the ring's
    /// pull threshold are ready.
    pub fn pull_into(&mut self, out: &mut Vec<Sample>, max_count: usize) -> usize {
        let threshold = self.shared.pull_threshold;
        self.pull_min(out, threshold, max_count)
    }

    /// Pull into `out` only if at least `min_count` samples are ready
    pub fn pull_min(&mut self, out: &mut Vec<Sample>, min_count: usize, max_count: usize) -> usize {
        out.clear();

        let shared = &*self.shared;
        let written = shared.written.load(Ordering::Acquire);
        let read = shared.read.load(Ordering::Relaxed);
        let start = read.max(shared.floor(written));
        let ready = (written - start) as usize;

        if max_count == 0 || ready == 0 || ready < min_count {
            return 0;
        }

        let count = ready.min(max_count);
        let end = start + count as u64;
        out.extend((start..end).map(|pos| shared.slot(pos).load(Ordering::Relaxed)));

        // Anything below the producer's claimed floor may have been
        // overwritten while we were copying.
        fence(Ordering::Acquire);
        let valid_from = shared
            .floor(shared.claimed.load(Ordering::Relaxed))
            .clamp(start, end);
        let torn = (valid_from - start) as usize;
        if torn > 0 {
            out.drain(..torn);
        }

        shared.read.store(end, Ordering::Release);

        let lost = (start - read) + torn as u64;
        if lost > 0 {
            shared.lost.fetch_add(lost, Ordering::AcqRel);
        }

        out.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn ramp(start: i16, len: usize) -> Vec<Sample> {
        (0..len).map(|i| start.wrapping_add(i as i16)).collect()
    }

    fn pull(consumer: &mut SampleConsumer, max_count: usize) -> Vec<Sample> {
        let mut out = Vec::new();
        consumer.pull_into(&mut out, max_count);
        out
    }

    #[test]
    fn test_pull_returns_pushed_in_order() {
        let (ring, mut consumer) = SampleRing::with_consumer(16);
        let mut producer = ring.producer().unwrap();

        assert_eq!(producer.push(&[1, 2, 3]), 3);
        assert_eq!(producer.push(&[4, 5]), 2);
        assert_eq!(ring.available(), 5);

        assert_eq!(pull(&mut consumer, 2), vec![1, 2]);
        assert_eq!(pull(&mut consumer, 10), vec![3, 4, 5]);
        assert_eq!(ring.available(), 0);
        assert!(pull(&mut consumer, 10).is_empty());
    }

    #[test]
    fn test_interleaved_within_capacity_is_lossless() {
        let (ring, mut consumer) = SampleRing::with_consumer(8);
        let mut producer = ring.producer().unwrap();

        let mut expected = Vec::new();
        let mut received = Vec::new();
        let mut next = 0i16;
        for round in 0..20 {
            let chunk = ramp(next, 1 + round % 5);
            next = next.wrapping_add(chunk.len() as i16);
            producer.push(&chunk);
            expected.extend_from_slice(&chunk);
            received.extend(pull(&mut consumer, 8));
        }

        assert_eq!(received, expected);
        assert_eq!(ring.stats().overruns, 0);
    }

    #[test]
    fn test_five_chunks_into_four_chunk_ring() {
        let (ring, mut consumer) = SampleRing::with_consumer(4096);
        let mut producer = ring.producer().unwrap();

        let pushes: Vec<Vec<Sample>> = (0..5).map(|n| ramp(n * 1024, 1024)).collect();
        for chunk in &pushes {
            producer.push(chunk);
        }

        assert_eq!(ring.available(), 4096);
        assert_eq!(ring.stats().overruns, 1024);

        let retained = pull(&mut consumer, 4096);
        assert_eq!(retained, pushes[1..].concat());

        // The loss stays counted once the consumer catches up.
        assert_eq!(ring.stats().overruns, 1024);
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn test_available_never_exceeds_capacity() {
        let (ring, mut consumer) = SampleRing::with_consumer(10);
        let mut producer = ring.producer().unwrap();

        let mut all = Vec::new();
        for n in 0..7 {
            let chunk = ramp(n * 3, 3);
            producer.push(&chunk);
            all.extend_from_slice(&chunk);
            assert!(ring.available() <= ring.capacity());
        }

        assert_eq!(pull(&mut consumer, 100), all[all.len() - 10..].to_vec());
        assert_eq!(ring.stats().overruns, (all.len() - 10) as u64);
    }

    #[test]
    fn test_push_larger_than_capacity_keeps_tail() {
        let (ring, mut consumer) = SampleRing::with_consumer(4);
        let mut producer = ring.producer().unwrap();

        assert_eq!(producer.push(&[1, 2, 3, 4, 5, 6, 7]), 7);
        assert_eq!(ring.available(), 4);
        assert_eq!(pull(&mut consumer, 4), vec![4, 5, 6, 7]);
        assert_eq!(ring.stats().overruns, 3);
    }

    #[test]
    fn test_partial_overrun_after_some_reads() {
        let (ring, mut consumer) = SampleRing::with_consumer(4);
        let mut producer = ring.producer().unwrap();

        producer.push(&[1, 2, 3]);
        assert_eq!(pull(&mut consumer, 2), vec![1, 2]);

        // 3 is unread; pushing 5 more laps it and one fresh sample.
        producer.push(&[4, 5, 6, 7, 8]);
        assert_eq!(ring.stats().overruns, 2);
        assert_eq!(pull(&mut consumer, 10), vec![5, 6, 7, 8]);
    }

    #[test]
    fn test_pull_threshold() {
        let (ring, mut consumer) = SampleRing::with_pull_threshold(16, 4);
        let mut producer = ring.producer().unwrap();
        let mut out = Vec::new();

        producer.push(&[1, 2, 3]);
        assert_eq!(consumer.pull_into(&mut out, 16), 0);
        assert!(out.is_empty());
        assert_eq!(ring.available(), 3);

        producer.push(&[4]);
        assert_eq!(consumer.pull_into(&mut out, 16), 4);
        assert_eq!(out, vec![1, 2, 3, 4]);

        producer.push(&[5]);
        assert_eq!(consumer.pull_min(&mut out, 1, 16), 1);
        assert_eq!(out, vec![5]);
    }

    #[test]
    fn test_closed_ring_discards_pushes_and_drains() {
        let (ring, mut consumer) = SampleRing::with_consumer(8);
        let mut producer = ring.producer().unwrap();

        producer.push(&[1, 2, 3]);
        ring.close();

        assert_eq!(producer.push(&[4, 5]), 0);
        assert_eq!(ring.available(), 3);
        assert_eq!(ring.stats().discarded, 2);

        assert_eq!(pull(&mut consumer, 2), vec![1, 2]);
        assert_eq!(pull(&mut consumer, 2), vec![3]);
        assert!(pull(&mut consumer, 2).is_empty());

        ring.reopen();
        assert_eq!(producer.push(&[9]), 1);
        assert_eq!(pull(&mut consumer, 2), vec![9]);
    }

    #[test]
    fn test_single_producer() {
        let (ring, _consumer) = SampleRing::with_consumer(4);

        let producer = ring.producer();
        assert!(producer.is_some());
        assert!(ring.producer().is_none());
        assert!(ring.clone().producer().is_none());
        drop(producer);
        assert!(ring.producer().is_some());
    }

    #[test]
    fn test_concurrent_handoff_preserves_order() {
        // Stays below i16::MAX so every sample is its own absolute index.
        const TOTAL: usize = 30_000;
        let (ring, mut consumer) = SampleRing::with_consumer(256);
        let mut producer = ring.producer().unwrap();

        let writer = thread::spawn(move || {
            let mut next = 0usize;
            while next < TOTAL {
                let len = (TOTAL - next).min(16);
                let chunk: Vec<Sample> = (next..next + len).map(|v| v as Sample).collect();
                producer.push(&chunk);
                next += len;
                if next % 512 == 0 {
                    thread::yield_now();
                }
            }
        });

        let mut received: Vec<Sample> = Vec::new();
        let mut out = Vec::new();
        loop {
            if consumer.pull_into(&mut out, 64) == 0 {
                if writer.is_finished() && ring.available() == 0 {
                    break;
                }
                thread::yield_now();
                continue;
            }
            received.extend_from_slice(&out);
        }
        writer.join().unwrap();

        assert!(received.windows(2).all(|w| w[0] < w[1]));
        let stats = ring.stats();
        assert_eq!(stats.written, TOTAL as u64);
        assert_eq!(received.len() as u64 + stats.overruns, TOTAL as u64);
    }
}
