//! Alert worker pool: resolve speak text to a cached audio artifact, wrap
//! the alert in an event envelope, and hand it to the broadcaster.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use engine::{Alert, AlertType};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{error, info};

use crate::metrics::counters::Counters;
use crate::server::state::Event;
use crate::server::Broadcaster;
use crate::tts::TtsClient;

pub const AUDIO_URL_PREFIX: &str = "/audio";

pub fn direction_for(kind: AlertType) -> &'static str {
    match kind {
        AlertType::BaseUp | AlertType::MomentumUp | AlertType::CrossAbove => "up",
        AlertType::BaseDown | AlertType::MomentumDown | AlertType::CrossBelow => "down",
    }
}

pub fn event_from_alert(alert: &Alert, audio: Option<(String, bool)>) -> Event {
    let mut ev = Event::base(
        alert.kind.as_str(),
        &alert.symbol,
        alert.price,
        alert.message.clone(),
    );
    ev.direction = Some(direction_for(alert.kind).to_string());
    if let Some((url, cache_hit)) = audio {
        ev.audio_url = Some(url);
        ev.cache_hit = Some(cache_hit);
    }
    ev
}

/// Drain the shared alert queue until shutdown. A TTS failure is logged
/// and the event goes out without audio; alerts are never dropped here.
pub async fn run_alert_worker(
    worker_id: usize,
    queue: Arc<Mutex<mpsc::Receiver<Alert>>>,
    tts: Arc<TtsClient>,
    broadcaster: Arc<Broadcaster>,
    counters: Counters,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(worker_id, "alert worker started");

    loop {
        let alert = tokio::select! {
            _ = shutdown.changed() => return,
            next = async { queue.lock().await.recv().await } => {
                match next {
                    Some(a) => a,
                    None => return,
                }
            }
        };

        let audio = match tts.speak(&alert.speak_text).await {
            Ok(res) => res.path.file_name().map(|name| {
                (
                    format!("{AUDIO_URL_PREFIX}/{}", name.to_string_lossy()),
                    res.cache_hit,
                )
            }),
            Err(e) => {
                counters.tts_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    error = %e,
                    symbol = %alert.symbol,
                    kind = alert.kind.as_str(),
                    "tts failed; broadcasting alert without audio"
                );
                None
            }
        };

        broadcaster.broadcast(event_from_alert(&alert, audio));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::{Synthesizer, TtsError, TtsSettings};
    use async_trait::async_trait;

    struct StubSynth {
        fail: bool,
    }

    #[async_trait]
    impl Synthesizer for StubSynth {
        async fn synthesize(&self, text: &str) -> Result<Vec<u8>, TtsError> {
            if self.fail {
                return Err(TtsError::Api {
                    status: 503,
                    message: "down".into(),
                });
            }
            Ok(format!("AUDIO:{text}").into_bytes())
        }
    }

    fn tts_in(dir: &std::path::Path, fail: bool) -> Arc<TtsClient> {
        Arc::new(
            TtsClient::new(
                TtsSettings {
                    cache_dir: dir.to_path_buf(),
                    ..Default::default()
                },
                Arc::new(StubSynth { fail }),
            )
            .unwrap(),
        )
    }

    fn alert() -> Alert {
        Alert {
            kind: AlertType::BaseUp,
            symbol: "AGQ".into(),
            price: 101.2,
            message: "AGQ up 1.20% vs baseline".into(),
            speak_text: "Alert. AGQ up 1.2 percent.".into(),
        }
    }

    #[test]
    fn direction_follows_alert_type() {
        assert_eq!(direction_for(AlertType::BaseUp), "up");
        assert_eq!(direction_for(AlertType::MomentumUp), "up");
        assert_eq!(direction_for(AlertType::CrossAbove), "up");
        assert_eq!(direction_for(AlertType::BaseDown), "down");
        assert_eq!(direction_for(AlertType::MomentumDown), "down");
        assert_eq!(direction_for(AlertType::CrossBelow), "down");
    }

    #[test]
    fn event_composition_with_and_without_audio() {
        let a = alert();

        let ev = event_from_alert(&a, Some(("/audio/abc.mp3".into(), true)));
        assert_eq!(ev.kind, "base_up");
        assert_eq!(ev.direction.as_deref(), Some("up"));
        assert_eq!(ev.audio_url.as_deref(), Some("/audio/abc.mp3"));
        assert_eq!(ev.cache_hit, Some(true));

        let ev = event_from_alert(&a, None);
        assert!(ev.audio_url.is_none());
        assert!(ev.cache_hit.is_none());
    }

    #[tokio::test]
    async fn worker_attaches_audio_and_broadcasts() {
        let dir = tempfile::tempdir().unwrap();
        let tts = tts_in(dir.path(), false);
        let broadcaster = Arc::new(Broadcaster::new());
        let mut sub = broadcaster.subscribe();

        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(run_alert_worker(
            0,
            Arc::new(Mutex::new(rx)),
            tts,
            broadcaster.clone(),
            Counters::default(),
            shutdown_rx,
        ));

        tx.send(alert()).await.unwrap();
        drop(tx); // queue closes, worker exits after draining
        worker.await.unwrap();

        let ev = sub.rx.try_recv().unwrap();
        assert_eq!(ev.kind, "base_up");
        let url = ev.audio_url.unwrap();
        assert!(url.starts_with("/audio/"));
        assert!(url.ends_with(".mp3"));
        assert_eq!(ev.cache_hit, Some(false));
    }

    #[tokio::test]
    async fn tts_failure_still_broadcasts() {
        let dir = tempfile::tempdir().unwrap();
        let tts = tts_in(dir.path(), true);
        let broadcaster = Arc::new(Broadcaster::new());
        let mut sub = broadcaster.subscribe();
        let counters = Counters::default();

        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(run_alert_worker(
            0,
            Arc::new(Mutex::new(rx)),
            tts,
            broadcaster.clone(),
            counters.clone(),
            shutdown_rx,
        ));

        tx.send(alert()).await.unwrap();
        drop(tx);
        worker.await.unwrap();

        let ev = sub.rx.try_recv().unwrap();
        assert_eq!(ev.kind, "base_up");
        assert!(ev.audio_url.is_none());
        assert_eq!(counters.tts_failures.load(Ordering::Relaxed), 1);
    }
}
