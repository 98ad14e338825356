//! Feed consumption: normalize provider messages, drive both engines,
//! queue alerts for the worker pool.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use adapters::massive::FeedMessage;
use engine::{Alert, CloudEngine, CloudPulse, CloudSnapshot, RuleEngine, Tick};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::metrics::counters::Counters;
use crate::server::state::{Event, EVENT_CLOUD, EVENT_CLOUD_PULSE};
use crate::server::Broadcaster;
use crate::time::datetime_from_ms;

/// Handle one accepted tick: cloud first (pulse broadcast), then the rule
/// engine. A full alert queue drops the alert; ingestion never blocks.
pub fn process_tick(
    tick: &Tick,
    rules: &RuleEngine,
    cloud: &CloudEngine,
    broadcaster: &Broadcaster,
    alert_tx: &mpsc::Sender<Alert>,
    counters: &Counters,
) {
    counters.ticks.fetch_add(1, Ordering::Relaxed);

    if let Some(pulse) = cloud.update(&tick.symbol, tick.price, tick.volume, tick.ts_ms) {
        broadcaster.broadcast(pulse_event(&pulse));
    }

    for alert in rules.update(&tick.symbol, tick.price, tick.volume, tick.ts_ms) {
        counters.alerts_fired.fetch_add(1, Ordering::Relaxed);
        if alert_tx.try_send(alert).is_err() {
            counters.alerts_dropped.fetch_add(1, Ordering::Relaxed);
            warn!("alert queue full; dropping alert");
        }
    }
}

pub fn pulse_event(p: &CloudPulse) -> Event {
    let mut ev = Event::base(EVENT_CLOUD_PULSE, &p.symbol, p.price, String::new());
    ev.time = datetime_from_ms(p.ts_ms);
    ev.volume = Some(p.volume);
    ev.delta_pct = Some(p.delta_pct);
    ev.direction = Some(p.direction.as_str().to_string());
    ev.strength = Some(p.strength);
    ev
}

pub fn snapshot_event(s: &CloudSnapshot) -> Event {
    let mut ev = Event::base(EVENT_CLOUD, "CLOUD", 0.0, s.message.clone());
    ev.time = datetime_from_ms(s.ts_ms);
    ev.direction = Some(s.direction.as_str().to_string());
    ev.strength = Some(s.strength);
    ev.score = Some(s.score_pct);
    ev.adv = Some(s.adv);
    ev.dec = Some(s.dec);
    ev.flat = Some(s.flat);
    ev.active = Some(s.active);
    ev.total = Some(s.total);
    ev.rate_hz = Some(s.rate_hz);
    ev
}

/// Consume the feed until shutdown. A fatal provider error or a closed
/// feed channel cancels the whole process via the shutdown sender.
#[allow(clippy::too_many_arguments)]
pub async fn run_ingest_loop(
    mut feed_rx: mpsc::Receiver<FeedMessage>,
    mut fatal_rx: mpsc::Receiver<anyhow::Error>,
    rules: Arc<RuleEngine>,
    cloud: Arc<CloudEngine>,
    broadcaster: Arc<Broadcaster>,
    alert_tx: mpsc::Sender<Alert>,
    counters: Counters,
    shutdown: watch::Sender<bool>,
) {
    let mut shutdown_rx = shutdown.subscribe();
    let mut fatal_open = true;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                info!("ingest loop stopping");
                return;
            }
            err = fatal_rx.recv(), if fatal_open => {
                match err {
                    Some(e) => {
                        error!(error = ?e, "fatal feed error; shutting down");
                        let _ = shutdown.send(true);
                        return;
                    }
                    None => fatal_open = false,
                }
            }
            msg = feed_rx.recv() => {
                match msg {
                    None => {
                        warn!("feed channel closed; shutting down");
                        let _ = shutdown.send(true);
                        return;
                    }
                    Some(FeedMessage::SecondAgg(v)) => {
                        if let Some(tick) = Tick::from_value(&v) {
                            process_tick(&tick, &rules, &cloud, &broadcaster, &alert_tx, &counters);
                        }
                    }
                    Some(_) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::watchlist::{BaseChangeRule, PriceCrossRule, SymbolEntry, Watchlist};
    use engine::{CloudConfig, RuleConfig};
    use std::time::Duration;

    const T0: u64 = 1_700_000_000_000;

    fn fixtures(alert_queue: usize) -> (
        Arc<RuleEngine>,
        Arc<CloudEngine>,
        Arc<Broadcaster>,
        mpsc::Sender<Alert>,
        mpsc::Receiver<Alert>,
        Counters,
    ) {
        let wl = Arc::new(Watchlist {
            symbols: vec![SymbolEntry {
                ticker: "AGQ".into(),
                base_change: Some(BaseChangeRule {
                    up_pct: 1.0,
                    down_pct: 1.0,
                    cooldown: Duration::from_secs(60),
                }),
                price_cross: Some(PriceCrossRule {
                    above: 101.0,
                    below: 0.0,
                    cooldown: Duration::from_secs(60),
                }),
                ..Default::default()
            }],
        });
        let rules = Arc::new(RuleEngine::new(RuleConfig::default(), wl.clone()));
        let cloud = Arc::new(CloudEngine::new(CloudConfig::default(), wl));
        let broadcaster = Arc::new(Broadcaster::new());
        let (tx, rx) = mpsc::channel(alert_queue);
        (rules, cloud, broadcaster, tx, rx, Counters::default())
    }

    fn tick(price: f64, ts_ms: u64) -> Tick {
        Tick {
            symbol: "AGQ".into(),
            price,
            volume: 100.0,
            ts_ms,
        }
    }

    #[tokio::test]
    async fn ticks_produce_pulses_and_alerts() {
        let (rules, cloud, broadcaster, tx, mut rx, counters) = fixtures(16);
        let mut sub = broadcaster.subscribe();

        process_tick(&tick(100.0, T0), &rules, &cloud, &broadcaster, &tx, &counters);
        // +1.5% vs baseline fires base_up and crosses 101.0
        process_tick(&tick(101.5, T0 + 1_000), &rules, &cloud, &broadcaster, &tx, &counters);

        assert_eq!(counters.ticks.load(Ordering::Relaxed), 2);
        assert_eq!(counters.alerts_fired.load(Ordering::Relaxed), 2);

        let a = rx.try_recv().unwrap();
        assert_eq!(a.symbol, "AGQ");

        // both ticks were accepted by the cloud engine
        let first = sub.rx.try_recv().unwrap();
        assert_eq!(first.kind, EVENT_CLOUD_PULSE);
        let second = sub.rx.try_recv().unwrap();
        assert_eq!(second.kind, EVENT_CLOUD_PULSE);
        assert_eq!(second.direction.as_deref(), Some("up"));
    }

    #[tokio::test]
    async fn full_alert_queue_drops_and_counts() {
        let (rules, cloud, broadcaster, tx, mut rx, counters) = fixtures(1);

        process_tick(&tick(100.0, T0), &rules, &cloud, &broadcaster, &tx, &counters);
        // fires base_up AND cross_above in one tick; queue holds only one
        process_tick(&tick(101.5, T0 + 1_000), &rules, &cloud, &broadcaster, &tx, &counters);

        assert_eq!(counters.alerts_fired.load(Ordering::Relaxed), 2);
        assert_eq!(counters.alerts_dropped.load(Ordering::Relaxed), 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn snapshot_event_carries_cloud_fields() {
        let (_, cloud, ..) = fixtures(1);
        let snap = cloud.snapshot(T0);
        let ev = snapshot_event(&snap);

        assert_eq!(ev.kind, EVENT_CLOUD);
        assert_eq!(ev.symbol, "CLOUD");
        assert_eq!(ev.direction.as_deref(), Some("flat"));
        assert_eq!(ev.active, Some(0));
        assert_eq!(ev.total, Some(1));
        assert_eq!(ev.time.timestamp_millis() as u64, T0);
    }

    #[test]
    fn pulse_event_carries_tick_fields() {
        let (_, cloud, ..) = fixtures(1);
        cloud.update("AGQ", 100.0, 5.0, T0);
        let pulse = cloud.update("AGQ", 100.2, 7.0, T0 + 1_000).unwrap();
        let ev = pulse_event(&pulse);

        assert_eq!(ev.kind, EVENT_CLOUD_PULSE);
        assert_eq!(ev.symbol, "AGQ");
        assert_eq!(ev.price, 100.2);
        assert_eq!(ev.volume, Some(7.0));
        assert_eq!(ev.direction.as_deref(), Some("up"));
        assert!(ev.delta_pct.unwrap() > 0.0);
    }
}
