//! # Behavioral Analyzer (mock)
//!
//! Stand-in for the on-device behavioral model that will eventually score
//! speech confidence in real time. The UI polls it while a live session is
//! receiving agent audio. The real implementation is out of scope; this one
//! reports pseudo-random confidence in the 0.7-1.0 band while analyzing and
//! exactly 0 when idle, matching the reference mock.

use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

#[derive(Default)]
pub struct BehavioralAnalyzer {
    analyzing: AtomicBool,
}

impl BehavioralAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_analysis(&self) {
        self.analyzing.store(true, Ordering::SeqCst);
        info!("Behavioral analysis started");
    }

    pub fn stop_analysis(&self) {
        self.analyzing.store(false, Ordering::SeqCst);
    }

    pub fn is_analyzing(&self) -> bool {
        self.analyzing.load(Ordering::SeqCst)
    }

    /// Simulated real-time speech-confidence inference.
    pub fn get_realtime_confidence(&self) -> f32 {
        if !self.is_analyzing() {
            return 0.0;
        }
        rand::thread_rng().gen_range(0.7..=1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_analyzer_reports_zero() {
        let analyzer = BehavioralAnalyzer::new();
        assert!(!analyzer.is_analyzing());
        assert_eq!(analyzer.get_realtime_confidence(), 0.0);
    }

    #[test]
    fn test_active_analyzer_stays_in_band() {
        let analyzer = BehavioralAnalyzer::new();
        analyzer.start_analysis();
        for _ in 0..100 {
            let confidence = analyzer.get_realtime_confidence();
            assert!((0.7..=1.0).contains(&confidence));
        }
        analyzer.stop_analysis();
        assert_eq!(analyzer.get_realtime_confidence(), 0.0);
    }
}
