use std::sync::atomic::AtomicU64;
use std::sync::Arc;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    /// Ticks accepted from the feed.
    pub ticks: Arc<AtomicU64>,
    /// Alerts produced by the rule engine.
    pub alerts_fired: Arc<AtomicU64>,
    /// Alerts dropped because the work queue was full.
    pub alerts_dropped: Arc<AtomicU64>,
    /// TTS synthesis failures (alerts still broadcast without audio).
    pub tts_failures: Arc<AtomicU64>,
}
