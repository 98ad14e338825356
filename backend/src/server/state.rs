use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::tts::TtsClient;

pub const EVENT_CLOUD: &str = "cloud";
pub const EVENT_CLOUD_PULSE: &str = "cloud_pulse";

/// History ring: compact to the last `HISTORY_KEEP` once `HISTORY_MAX`
/// entries accumulate.
const HISTORY_MAX: usize = 500;
const HISTORY_KEEP: usize = 400;
/// Per-subscriber channel depth; slower clients lose events beyond this.
const SUBSCRIBER_BUFFER: usize = 64;

/// The envelope delivered to subscribers. Optional fields are omitted from
/// JSON so alert, snapshot and pulse events share one stable schema.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub time: DateTime<Utc>,
    pub symbol: String,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adv: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dec: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flat: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_hz: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_pct: Option<f64>,
}

impl Event {
    /// Envelope with only the always-present fields set.
    pub fn base(kind: &str, symbol: &str, price: f64, message: String) -> Event {
        Event {
            time: Utc::now(),
            symbol: symbol.to_string(),
            price,
            volume: None,
            kind: kind.to_string(),
            message,
            audio_url: None,
            cache_hit: None,
            direction: None,
            strength: None,
            score: None,
            adv: None,
            dec: None,
            flat: None,
            active: None,
            total: None,
            rate_hz: None,
            delta_pct: None,
        }
    }
}

struct Inner {
    clients: HashMap<u64, mpsc::Sender<Event>>,
    next_id: u64,
    history: Vec<Event>,
    latest_cloud: Option<Event>,
    cues: HashMap<String, String>,
}

struct Shared {
    inner: Mutex<Inner>,
    dropped: AtomicU64,
}

/// Live subscription: replay to deliver first, then the live channel.
/// Dropping the guard deregisters the subscriber.
pub struct Subscription {
    pub replay: Vec<Event>,
    pub rx: mpsc::Receiver<Event>,
    pub guard: SubscriberGuard,
}

pub struct SubscriberGuard {
    id: u64,
    shared: Arc<Shared>,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.shared.inner.lock().clients.remove(&self.id);
    }
}

/// Fan-out registry with bounded history and lossy delivery.
///
/// Snapshot events (`cloud`) only overwrite the latest-snapshot slot;
/// pulse events (`cloud_pulse`) are stream-only; everything else lands in
/// the history ring. Sends never block: a full subscriber channel drops
/// the event for that subscriber and counts it.
pub struct Broadcaster {
    shared: Arc<Shared>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    clients: HashMap::new(),
                    next_id: 0,
                    history: Vec::with_capacity(200),
                    latest_cloud: None,
                    cues: HashMap::new(),
                }),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn broadcast(&self, ev: Event) {
        let mut inner = self.shared.inner.lock();

        match ev.kind.as_str() {
            EVENT_CLOUD => {
                inner.latest_cloud = Some(ev.clone());
            }
            EVENT_CLOUD_PULSE => {}
            _ => {
                if inner.history.len() >= HISTORY_MAX {
                    let cut = inner.history.len() - HISTORY_KEEP;
                    inner.history.drain(..cut);
                }
                inner.history.push(ev.clone());
            }
        }

        for tx in inner.clients.values() {
            if tx.try_send(ev.clone()).is_err() {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Register a subscriber and capture its initial replay: the history
    /// in order, then the latest snapshot if one exists.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);

        let mut inner = self.shared.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.clients.insert(id, tx);

        let mut replay = inner.history.clone();
        if let Some(cloud) = &inner.latest_cloud {
            replay.push(cloud.clone());
        }

        Subscription {
            replay,
            rx,
            guard: SubscriberGuard {
                id,
                shared: self.shared.clone(),
            },
        }
    }

    pub fn latest_cloud(&self) -> Option<Event> {
        self.shared.inner.lock().latest_cloud.clone()
    }

    pub fn history_and_cloud(&self) -> (Vec<Event>, Option<Event>) {
        let inner = self.shared.inner.lock();
        (inner.history.clone(), inner.latest_cloud.clone())
    }

    pub fn set_cues(&self, cues: HashMap<String, String>) {
        self.shared.inner.lock().cues = cues;
    }

    pub fn cues(&self) -> HashMap<String, String> {
        self.shared.inner.lock().cues.clone()
    }

    /// Events lost to full or closed subscriber channels.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn history_len(&self) -> usize {
        self.shared.inner.lock().history.len()
    }

    #[cfg(test)]
    fn client_count(&self) -> usize {
        self.shared.inner.lock().clients.len()
    }
}

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct ServerState {
    pub broadcaster: Arc<Broadcaster>,
    pub tts: Arc<TtsClient>,
    pub audio_dir: PathBuf,
    pub net_bucket_step: i64,
    pub net_bucket_flat: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(n: usize) -> Event {
        Event::base("base_up", "AGQ", 100.0 + n as f64, format!("alert {n}"))
    }

    fn cloud() -> Event {
        let mut ev = Event::base(EVENT_CLOUD, "CLOUD", 0.0, "Cloud UP".into());
        ev.direction = Some("up".into());
        ev
    }

    fn pulse() -> Event {
        Event::base(EVENT_CLOUD_PULSE, "AGQ", 100.0, String::new())
    }

    #[test]
    fn cloud_events_skip_history_and_update_latest() {
        let b = Broadcaster::new();
        b.broadcast(cloud());
        assert_eq!(b.history_len(), 0);
        assert!(b.latest_cloud().is_some());
    }

    #[test]
    fn pulse_events_touch_nothing() {
        let b = Broadcaster::new();
        b.broadcast(pulse());
        assert_eq!(b.history_len(), 0);
        assert!(b.latest_cloud().is_none());
    }

    #[test]
    fn history_compacts_at_500_to_400() {
        let b = Broadcaster::new();
        for n in 0..HISTORY_MAX {
            b.broadcast(alert(n));
        }
        assert_eq!(b.history_len(), 500);

        b.broadcast(alert(500));
        // compacted to the last 400, plus the new event
        assert_eq!(b.history_len(), 401);
        let (hist, _) = b.history_and_cloud();
        assert_eq!(hist.first().map(|e| e.message.clone()).unwrap(), "alert 100");
        assert_eq!(hist.last().map(|e| e.message.clone()).unwrap(), "alert 500");
    }

    #[test]
    fn replay_is_history_then_latest_cloud() {
        let b = Broadcaster::new();
        b.broadcast(alert(1));
        b.broadcast(cloud());
        b.broadcast(alert(2));

        let sub = b.subscribe();
        let kinds: Vec<_> = sub.replay.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, vec!["base_up", "base_up", EVENT_CLOUD]);
    }

    #[test]
    fn dropping_guard_deregisters() {
        let b = Broadcaster::new();
        let sub = b.subscribe();
        assert_eq!(b.client_count(), 1);
        drop(sub);
        assert_eq!(b.client_count(), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_drops_without_blocking_others() {
        let b = Arc::new(Broadcaster::new());

        // blocked subscriber: never drained
        let blocked = b.subscribe();

        // healthy subscriber: drained concurrently
        let healthy = b.subscribe();
        let drain = tokio::spawn(async move {
            let mut rx = healthy.rx;
            let _guard = healthy.guard;
            let mut seen = Vec::new();
            while let Some(ev) = rx.recv().await {
                seen.push(ev.message);
                if seen.len() == 1_000 {
                    break;
                }
            }
            seen
        });

        for n in 0..1_000 {
            b.broadcast(alert(n));
            tokio::task::yield_now().await;
        }

        let seen = drain.await.unwrap();
        assert_eq!(seen.len(), 1_000);
        // strictly ordered delivery for the healthy subscriber
        for (n, msg) in seen.iter().enumerate() {
            assert_eq!(msg, &format!("alert {n}"));
        }

        // the blocked channel kept only its buffer; the rest were dropped
        assert!(b.dropped() >= (1_000 - SUBSCRIBER_BUFFER) as u64);
        let (hist, _) = b.history_and_cloud();
        assert!(hist.len() >= 400 && hist.len() <= 500);
        drop(blocked);
    }
}
