//! # Playback Scheduler
//!
//! Turns decoded agent audio into gapless output while supporting instant
//! barge-in interruption.
//!
//! ## Scheduling algorithm:
//! The scheduler keeps a `next_start_time` cursor (seconds on the sink's
//! playback clock, starting at 0). Each decoded buffer is scheduled at
//! `max(next_start_time, sink.now())`, never in the past if playback fell
//! behind and never overlapping if buffers arrive back-to-back, and the
//! cursor advances by the buffer's duration.
//!
//! ## Invariants:
//! - The live set is exactly the buffers received but not yet finished or
//!   interrupted: natural completion removes one entry, interruption stops
//!   and removes all of them.
//! - `next_start_time` is monotonically non-decreasing except on
//!   interruption, where it resets to 0 so the next utterance starts fresh.

use std::collections::HashMap;
use tracing::debug;

/// Identifier of one scheduled playback source, unique within a session.
pub type SourceId = u64;

/// Output seam for the scheduler.
///
/// The production implementation mixes onto a real output device
/// ([`crate::audio::output::DeviceSink`]); tests substitute a recording sink
/// with a hand-driven clock.
pub trait PlaybackSink: Send {
    /// Current playback clock time in seconds.
    fn now(&self) -> f64;

    /// Start playing `samples` at `start` seconds on the playback clock.
    fn schedule(&mut self, id: SourceId, samples: Vec<f32>, start: f64);

    /// Force-stop a source. Must be safe to call for ids that already
    /// finished on their own.
    fn stop(&mut self, id: SourceId);
}

/// A scheduled unit of decoded audio, owned exclusively by the scheduler from
/// creation until it finishes playing or is forcibly stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSource {
    pub id: SourceId,
    pub start: f64,
    pub duration: f64,
}

/// Gapless playback scheduler over an abstract sink.
pub struct PlaybackScheduler {
    sink: Box<dyn PlaybackSink>,
    sample_rate: u32,
    next_start_time: f64,
    live: HashMap<SourceId, PlaybackSource>,
    next_id: SourceId,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn PlaybackSink>, sample_rate: u32) -> Self {
        Self {
            sink,
            sample_rate,
            next_start_time: 0.0,
            live: HashMap::new(),
            next_id: 0,
        }
    }

    /// Schedule a decoded buffer for gapless playback.
    ///
    /// Non-blocking relative to the receive path: this computes the start
    /// time, hands the buffer to the sink, and returns. Buffers may be
    /// scheduled while earlier ones are still playing.
    pub fn schedule(&mut self, samples: Vec<f32>) -> PlaybackSource {
        let start = self.next_start_time.max(self.sink.now());
        let duration = samples.len() as f64 / self.sample_rate as f64;

        let id = self.next_id;
        self.next_id += 1;

        self.sink.schedule(id, samples, start);
        self.next_start_time = start + duration;

        let source = PlaybackSource {
            id,
            start,
            duration,
        };
        self.live.insert(id, source.clone());

        debug!(
            source_id = id,
            start, duration, "Scheduled playback source"
        );
        source
    }

    /// A scheduled source finished playing naturally. Removes it from the
    /// live set; no other action.
    pub fn on_source_ended(&mut self, id: SourceId) {
        self.live.remove(&id);
    }

    /// Barge-in: stop every live source, clear the set, and reset the cursor
    /// to 0 so the next server utterance starts fresh without trailing audio
    /// from the cut-off one.
    ///
    /// Idempotent; also used by session teardown.
    pub fn interrupt(&mut self) {
        let stopped = self.live.len();
        for id in self.live.keys().copied().collect::<Vec<_>>() {
            self.sink.stop(id);
        }
        self.live.clear();
        self.next_start_time = 0.0;

        if stopped > 0 {
            debug!(stopped, "Interrupted playback, live set cleared");
        }
    }

    /// Number of currently live (scheduled but unfinished) sources.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Whether server audio is still in flight, i.e. the session's Receiving
    /// sub-state is active.
    pub fn is_receiving(&self) -> bool {
        !self.live.is_empty()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Recording sink with a hand-driven clock.
    #[derive(Clone, Default)]
    struct TestSink {
        clock: Arc<Mutex<f64>>,
        scheduled: Arc<Mutex<Vec<(SourceId, usize, f64)>>>,
        stopped: Arc<Mutex<Vec<SourceId>>>,
    }

    impl TestSink {
        fn set_clock(&self, t: f64) {
            *self.clock.lock().unwrap() = t;
        }
    }

    impl PlaybackSink for TestSink {
        fn now(&self) -> f64 {
            *self.clock.lock().unwrap()
        }

        fn schedule(&mut self, id: SourceId, samples: Vec<f32>, start: f64) {
            self.scheduled.lock().unwrap().push((id, samples.len(), start));
        }

        fn stop(&mut self, id: SourceId) {
            self.stopped.lock().unwrap().push(id);
        }
    }

    fn one_second(rate: u32) -> Vec<f32> {
        vec![0.1; rate as usize]
    }

    #[test]
    fn test_back_to_back_buffers_never_overlap() {
        let sink = TestSink::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(sink.clone()), 24_000);

        let b1 = scheduler.schedule(one_second(24_000));
        let b2 = scheduler.schedule(one_second(24_000));
        let b3 = scheduler.schedule(vec![0.0; 12_000]);

        assert_eq!(b1.start, 0.0);
        assert!(b2.start >= b1.start + b1.duration);
        assert!(b3.start >= b2.start + b2.duration);
        assert_eq!(scheduler.next_start_time(), b3.start + b3.duration);
        assert_eq!(scheduler.live_count(), 3);
    }

    #[test]
    fn test_never_schedules_in_the_past() {
        let sink = TestSink::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(sink.clone()), 24_000);

        let b1 = scheduler.schedule(one_second(24_000));
        assert_eq!(b1.start, 0.0);

        // Playback clock ran past the cursor (e.g. a long silence)
        sink.set_clock(5.0);
        let b2 = scheduler.schedule(one_second(24_000));
        assert_eq!(b2.start, 5.0);
        assert_eq!(scheduler.next_start_time(), 6.0);
    }

    #[test]
    fn test_natural_completion_only_shrinks_live_set() {
        let sink = TestSink::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(sink.clone()), 24_000);

        let b1 = scheduler.schedule(one_second(24_000));
        let b2 = scheduler.schedule(one_second(24_000));
        let cursor = scheduler.next_start_time();

        scheduler.on_source_ended(b1.id);
        assert_eq!(scheduler.live_count(), 1);
        // Completion never touches the cursor or stops anything
        assert_eq!(scheduler.next_start_time(), cursor);
        assert!(sink.stopped.lock().unwrap().is_empty());

        scheduler.on_source_ended(b2.id);
        assert!(!scheduler.is_receiving());
    }

    #[test]
    fn test_interrupt_stops_everything_and_resets_cursor() {
        let sink = TestSink::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(sink.clone()), 24_000);

        let b1 = scheduler.schedule(one_second(24_000));
        let b2 = scheduler.schedule(one_second(24_000));

        scheduler.interrupt();

        assert_eq!(scheduler.live_count(), 0);
        assert_eq!(scheduler.next_start_time(), 0.0);
        let stopped = sink.stopped.lock().unwrap().clone();
        assert_eq!(stopped.len(), 2);
        assert!(stopped.contains(&b1.id));
        assert!(stopped.contains(&b2.id));

        // Idempotent
        scheduler.interrupt();
        assert_eq!(sink.stopped.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_interrupt_mid_utterance_then_fresh_start() {
        let sink = TestSink::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(sink.clone()), 24_000);

        // One second of agent audio arrives, then barge-in before it finishes
        scheduler.schedule(one_second(24_000));
        sink.set_clock(0.4);
        scheduler.interrupt();

        assert_eq!(scheduler.next_start_time(), 0.0);
        assert!(!scheduler.is_receiving());

        // The next utterance starts at the current clock, not after the
        // cut-off buffer's old end time
        let fresh = scheduler.schedule(one_second(24_000));
        assert_eq!(fresh.start, 0.4);
    }
}
