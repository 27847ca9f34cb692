//! Bounded audio frame queues.
//!
//! Two instances run per session:
//! - **capture** (mic callback → network sender): a full queue drops the
//!   incoming frame, bounding capture-to-network latency.
//! - **playback** (event dispatcher → speaker): a full queue evicts the
//!   oldest frame so the newest generated audio is always kept.
//!
//! Producers never block beyond the queue mutex. Consumers either await
//! ([`FrameQueue::pop`]) or block with a timeout ([`FrameQueue::pop_timeout`])
//! so they can observe shutdown.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

use super::level;

// ── Audio frame ──────────────────────────────────────────────────

/// PCM16 little-endian mono audio.
///
/// Immutable once built; ownership moves through the queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    data: Vec<u8>,
}

impl AudioFrame {
    /// Wrap raw PCM16LE bytes. A trailing odd byte is dropped.
    pub fn new(mut data: Vec<u8>) -> Self {
        if data.len() % 2 != 0 {
            data.pop();
        }
        Self { data }
    }

    /// Encode samples as PCM16LE.
    pub fn from_samples(samples: &[i16]) -> Self {
        Self {
            data: samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decoded samples in order.
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }

    /// Peak level of this frame.
    pub fn level(&self) -> f32 {
        level::peak_level(&self.data)
    }
}

// ── Overflow policy ──────────────────────────────────────────────

/// What a full queue does with a new frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Reject the incoming frame.
    DropNewest,
    /// Evict the head to make room for the incoming frame.
    DropOldest,
}

/// Result of [`FrameQueue::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queue was full; the pushed frame was discarded.
    DroppedNewest,
    /// Queue was full; the oldest frame was discarded and the pushed one queued.
    EvictedOldest,
}

// ── Queue ────────────────────────────────────────────────────────

/// Fixed-capacity FIFO of [`AudioFrame`]s.
pub struct FrameQueue {
    name: &'static str,
    capacity: usize,
    policy: OverflowPolicy,
    frames: Mutex<VecDeque<AudioFrame>>,
    /// Wakes blocking consumers.
    available: Condvar,
    /// Wakes async consumers. Stores a permit when nobody waits.
    notify: Notify,
    dropped: AtomicU64,
}

impl FrameQueue {
    pub fn new(name: &'static str, capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            name,
            capacity,
            policy,
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Capture-side queue (drops newest on overflow).
    pub fn capture(capacity: usize) -> Self {
        Self::new("capture", capacity, OverflowPolicy::DropNewest)
    }

    /// Playback-side queue (evicts oldest on overflow).
    pub fn playback(capacity: usize) -> Self {
        Self::new("playback", capacity, OverflowPolicy::DropOldest)
    }

    /// Enqueue without blocking, applying the overflow policy.
    pub fn push(&self, frame: AudioFrame) -> PushOutcome {
        let outcome = {
            let mut frames = self.frames.lock();
            if frames.len() < self.capacity {
                frames.push_back(frame);
                PushOutcome::Queued
            } else {
                match self.policy {
                    OverflowPolicy::DropNewest => PushOutcome::DroppedNewest,
                    OverflowPolicy::DropOldest => {
                        frames.pop_front();
                        frames.push_back(frame);
                        PushOutcome::EvictedOldest
                    }
                }
            }
        };

        if outcome != PushOutcome::DroppedNewest {
            self.available.notify_one();
            self.notify.notify_one();
        }
        if outcome != PushOutcome::Queued {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    pub fn try_pop(&self) -> Option<AudioFrame> {
        self.frames.lock().pop_front()
    }

    /// Block until a frame arrives or `timeout` elapses.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<AudioFrame> {
        let deadline = Instant::now() + timeout;
        let mut frames = self.frames.lock();
        loop {
            if let Some(frame) = frames.pop_front() {
                return Some(frame);
            }
            if self.available.wait_until(&mut frames, deadline).timed_out() {
                return frames.pop_front();
            }
        }
    }

    /// Wait asynchronously for the next frame.
    pub async fn pop(&self) -> AudioFrame {
        loop {
            let notified = self.notify.notified();
            if let Some(frame) = self.try_pop() {
                return frame;
            }
            notified.await;
        }
    }

    /// Discard every pending frame; returns how many were dropped.
    pub fn flush(&self) -> usize {
        let mut frames = self.frames.lock();
        let flushed = frames.len();
        frames.clear();
        if flushed > 0 {
            tracing::trace!(queue = self.name, flushed, "Flushed frame queue");
        }
        flushed
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames lost to the overflow policy since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn frame(tag: i16) -> AudioFrame {
        AudioFrame::from_samples(&[tag, tag])
    }

    fn first_sample(frame: &AudioFrame) -> i16 {
        frame.samples().next().unwrap()
    }

    #[test]
    fn frame_encodes_little_endian() {
        let f = AudioFrame::from_samples(&[1, -2]);
        assert_eq!(f.as_bytes(), &[0x01, 0x00, 0xFE, 0xFF]);
        assert_eq!(f.samples().collect::<Vec<_>>(), vec![1, -2]);
    }

    #[test]
    fn frame_drops_trailing_odd_byte() {
        let f = AudioFrame::new(vec![1, 0, 9]);
        assert_eq!(f.len(), 2);
    }

    #[test]
    fn preserves_fifo_order() {
        let q = FrameQueue::capture(4);
        for tag in 1..=3 {
            assert_eq!(q.push(frame(tag)), PushOutcome::Queued);
        }
        let order: Vec<i16> = std::iter::from_fn(|| q.try_pop())
            .map(|f| first_sample(&f))
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn full_capture_queue_drops_newest() {
        let q = FrameQueue::capture(2);
        q.push(frame(1));
        q.push(frame(2));
        assert_eq!(q.push(frame(3)), PushOutcome::DroppedNewest);
        assert_eq!(q.len(), 2);
        assert_eq!(q.dropped(), 1);
        assert_eq!(first_sample(&q.try_pop().unwrap()), 1);
        assert_eq!(first_sample(&q.try_pop().unwrap()), 2);
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn full_playback_queue_evicts_oldest() {
        let q = FrameQueue::playback(2);
        q.push(frame(1));
        q.push(frame(2));
        assert_eq!(q.push(frame(3)), PushOutcome::EvictedOldest);
        assert_eq!(q.len(), 2);
        assert_eq!(q.dropped(), 1);
        assert_eq!(first_sample(&q.try_pop().unwrap()), 2);
        assert_eq!(first_sample(&q.try_pop().unwrap()), 3);
    }

    #[test]
    fn flush_empties_queue() {
        let q = FrameQueue::playback(8);
        for tag in 0..5 {
            q.push(frame(tag));
        }
        assert_eq!(q.flush(), 5);
        assert!(q.is_empty());
        assert_eq!(q.flush(), 0);
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let q = FrameQueue::capture(0);
        assert_eq!(q.capacity(), 1);
        assert_eq!(q.push(frame(1)), PushOutcome::Queued);
    }

    #[test]
    fn pop_timeout_returns_none_when_idle() {
        let q = FrameQueue::playback(2);
        let started = Instant::now();
        assert!(q.pop_timeout(Duration::from_millis(20)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn pop_timeout_wakes_on_push_from_other_thread() {
        let q = Arc::new(FrameQueue::playback(2));
        let producer = Arc::clone(&q);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            producer.push(frame(7));
        });
        let got = q.pop_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first_sample(&got), 7);
        handle.join().unwrap();
    }

    #[test]
    fn flush_races_producer_and_consumer_without_losing_wakeups() {
        use std::sync::atomic::AtomicBool;

        const CAPACITY: usize = 8;
        const SENTINEL: i16 = -1;
        let q = Arc::new(FrameQueue::playback(CAPACITY));
        let stop = Arc::new(AtomicBool::new(false));

        let consumer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                let mut last = 0;
                loop {
                    let got = q
                        .pop_timeout(Duration::from_secs(5))
                        .expect("frame pushed after flush must be delivered");
                    let tag = first_sample(&got);
                    if tag == SENTINEL {
                        return Instant::now();
                    }
                    assert!(tag > last, "frame {tag} delivered after {last}");
                    last = tag;
                }
            })
        };

        let flusher = {
            let q = Arc::clone(&q);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    q.flush();
                    assert!(q.len() <= CAPACITY);
                    std::thread::yield_now();
                }
            })
        };

        let producer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                for tag in 1..=2_000 {
                    q.push(frame(tag));
                    assert!(q.len() <= CAPACITY);
                    if tag % 16 == 0 {
                        std::thread::yield_now();
                    }
                }
            })
        };

        producer.join().unwrap();
        stop.store(true, Ordering::Relaxed);
        flusher.join().unwrap();

        // Let the consumer drain and park before the final push.
        std::thread::sleep(Duration::from_millis(20));
        let pushed_at = Instant::now();
        q.push(frame(SENTINEL));
        let received_at = consumer.join().unwrap();
        assert!(received_at.duration_since(pushed_at) < Duration::from_secs(1));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn async_pop_wakes_on_push() {
        let q = Arc::new(FrameQueue::capture(4));
        let producer = Arc::clone(&q);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            producer.push(frame(9));
        });
        let got = tokio::time::timeout(Duration::from_secs(2), q.pop())
            .await
            .unwrap();
        assert_eq!(first_sample(&got), 9);
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn async_pop_returns_queued_frame_immediately() {
        let q = FrameQueue::capture(4);
        q.push(frame(4));
        assert_eq!(first_sample(&q.pop().await), 4);
    }
}
