use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::watchlist::Watchlist;

/// Sign of a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Flat => "flat",
        }
    }
}

/// Watchlist-wide signal configuration. Percent fields are percent units:
/// `deadband_pct = 0.003` means 0.003%.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub enabled: bool,
    pub emit_every: Duration,
    pub stale_after: Duration,
    pub deadband_pct: f64,
    /// Clamp for per-symbol delta percent per update. 0 disables clamping.
    pub cap_move_pct: f64,
    /// Percent magnitude that maps to strength = 1.0.
    pub strength_pct: f64,
    /// EWMA alpha in (0, 1].
    pub smoothing: f64,
    pub min_rate_hz: f64,
    pub max_rate_hz: f64,
    /// Blend between average move and breadth, in [0, 1].
    pub breadth_weight: f64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            emit_every: Duration::from_millis(200),
            stale_after: Duration::from_secs(3),
            deadband_pct: 0.003,
            cap_move_pct: 0.30,
            strength_pct: 0.03,
            smoothing: 0.25,
            min_rate_hz: 1.0,
            max_rate_hz: 12.0,
            breadth_weight: 0.45,
        }
    }
}

impl CloudConfig {
    /// Replace out-of-range values with the defaults so the engine also
    /// works with a partially filled config.
    pub fn sanitized(mut self) -> Self {
        let d = CloudConfig::default();
        if self.emit_every.is_zero() {
            self.emit_every = d.emit_every;
        }
        if self.stale_after.is_zero() {
            self.stale_after = d.stale_after;
        }
        if self.deadband_pct < 0.0 {
            self.deadband_pct = 0.0;
        }
        if self.deadband_pct == 0.0 {
            self.deadband_pct = d.deadband_pct;
        }
        self.cap_move_pct = self.cap_move_pct.abs();
        self.strength_pct = self.strength_pct.abs();
        if self.strength_pct == 0.0 {
            self.strength_pct = d.strength_pct;
        }
        if self.smoothing <= 0.0 || self.smoothing > 1.0 {
            self.smoothing = d.smoothing;
        }
        if self.min_rate_hz < 0.0 {
            self.min_rate_hz = 0.0;
        }
        if self.max_rate_hz <= 0.0 {
            self.max_rate_hz = d.max_rate_hz;
        }
        if self.max_rate_hz < self.min_rate_hz {
            self.max_rate_hz = self.min_rate_hz;
        }
        self.breadth_weight = self.breadth_weight.clamp(0.0, 1.0);
        if self.breadth_weight == 0.0 {
            self.breadth_weight = d.breadth_weight;
        }
        self
    }
}

/// One per-tick "click": the shape clients render at feed pace.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudPulse {
    pub ts_ms: u64,
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
    /// Delta percent, clamped to `cap_move_pct`.
    pub delta_pct: f64,
    pub direction: Direction,
    /// 0..1
    pub strength: f64,
}

/// The smoothed aggregate shape emitted on a fixed cadence.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudSnapshot {
    pub ts_ms: u64,
    pub direction: Direction,
    /// 0..1, from the smoothed composite score.
    pub strength: f64,
    /// Suggested client tick rate. Zero when flat.
    pub rate_hz: f64,
    /// Smoothed composite score, percent units.
    pub score_pct: f64,
    pub raw_pct: f64,
    /// (adv - dec) / active, in [-1, 1].
    pub breadth: f64,
    pub adv: usize,
    pub dec: usize,
    pub flat: usize,
    pub active: usize,
    pub total: usize,
    pub message: String,
}

#[derive(Default)]
struct CloudSym {
    last_price: f64,
    last_delta_pct: f64,
    last_vol: f64,
    last_ts_ms: u64,
    /// False until the second tick so the first delta is not spurious.
    ready: bool,
}

struct CloudInner {
    syms: HashMap<String, CloudSym>,
    ewma: f64,
    has_ewma: bool,
}

/// Smoothed breadth/momentum indicator over the whole watchlist.
pub struct CloudEngine {
    cfg: CloudConfig,
    wl: Arc<Watchlist>,
    inner: Mutex<CloudInner>,
}

impl CloudEngine {
    pub fn new(cfg: CloudConfig, wl: Arc<Watchlist>) -> Self {
        let cfg = cfg.sanitized();

        // pre-seed the symbol map: stable `total`, fewer allocations
        let mut syms = HashMap::new();
        for t in wl.tickers() {
            syms.insert(t, CloudSym::default());
        }

        Self {
            cfg,
            wl,
            inner: Mutex::new(CloudInner {
                syms,
                ewma: 0.0,
                has_ewma: false,
            }),
        }
    }

    pub fn enabled(&self) -> bool {
        self.cfg.enabled
    }

    pub fn emit_every(&self) -> Duration {
        self.cfg.emit_every
    }

    /// Record one tick and derive its pulse. Returns `None` when the engine
    /// is disabled or the tick does not belong to an enabled watchlist
    /// symbol.
    pub fn update(&self, symbol: &str, price: f64, volume: f64, ts_ms: u64) -> Option<CloudPulse> {
        if !self.cfg.enabled || price <= 0.0 {
            return None;
        }
        let entry = self.wl.find(symbol)?;
        if !entry.is_enabled() {
            return None;
        }
        let symbol = entry.ticker.clone();

        let mut inner = self.inner.lock();
        let st = inner.syms.entry(symbol.clone()).or_default();

        let raw_delta = if st.ready && st.last_price > 0.0 {
            ((price - st.last_price) / st.last_price) * 100.0
        } else {
            0.0
        };

        let clamped = clamp_move(raw_delta, self.cfg.cap_move_pct);

        let direction = if clamped > 0.0 {
            Direction::Up
        } else if clamped < 0.0 {
            Direction::Down
        } else {
            Direction::Flat
        };

        let strength = (clamped.abs() / self.cfg.strength_pct).clamp(0.0, 1.0);

        st.last_delta_pct = raw_delta;
        st.last_price = price;
        st.last_vol = volume;
        st.last_ts_ms = ts_ms;
        st.ready = true;

        Some(CloudPulse {
            ts_ms,
            symbol,
            price,
            volume,
            delta_pct: clamped,
            direction,
            strength,
        })
    }

    /// Compute the smoothed aggregate over symbols with fresh state.
    /// Per-symbol state is read-only here; only the EWMA is advanced.
    pub fn snapshot(&self, now_ms: u64) -> CloudSnapshot {
        let mut inner = self.inner.lock();

        let total = inner.syms.len();
        let stale_ms = self.cfg.stale_after.as_millis() as u64;

        let mut sum = 0.0;
        let mut n = 0usize;
        let (mut adv, mut dec, mut flat) = (0usize, 0usize, 0usize);

        for st in inner.syms.values() {
            if !st.ready || st.last_price <= 0.0 {
                continue;
            }
            if stale_ms > 0 && now_ms.saturating_sub(st.last_ts_ms) > stale_ms {
                continue;
            }

            let d = st.last_delta_pct;
            if d > 0.0 {
                adv += 1;
            } else if d < 0.0 {
                dec += 1;
            } else {
                flat += 1;
            }

            sum += clamp_move(d, self.cfg.cap_move_pct);
            n += 1;
        }

        let (raw_score, breadth) = if n > 0 {
            (sum / n as f64, (adv as f64 - dec as f64) / n as f64)
        } else {
            (0.0, 0.0)
        };

        let bw = self.cfg.breadth_weight;
        let composite = (1.0 - bw) * raw_score + bw * (breadth * self.cfg.strength_pct);

        if inner.has_ewma {
            let a = self.cfg.smoothing;
            inner.ewma = (1.0 - a) * inner.ewma + a * composite;
        } else {
            inner.ewma = composite;
            inner.has_ewma = true;
        }
        let score = inner.ewma;

        let direction = if score.abs() < self.cfg.deadband_pct {
            Direction::Flat
        } else if score > 0.0 {
            Direction::Up
        } else {
            Direction::Down
        };

        let strength = if direction == Direction::Flat {
            0.0
        } else {
            (score.abs() / self.cfg.strength_pct).clamp(0.0, 1.0)
        };

        let rate_hz = if direction == Direction::Flat {
            0.0
        } else {
            (self.cfg.min_rate_hz + strength * (self.cfg.max_rate_hz - self.cfg.min_rate_hz))
                .max(0.0)
        };

        let label = match direction {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
            Direction::Flat => "FLAT",
        };
        let message = format!(
            "Cloud {label} • strength {strength:.2} • score {score:+.4}% • adv {adv} / dec {dec} / flat {flat}"
        );

        CloudSnapshot {
            ts_ms: now_ms,
            direction,
            strength,
            rate_hz,
            score_pct: score,
            raw_pct: raw_score,
            breadth,
            adv,
            dec,
            flat,
            active: n,
            total,
            message,
        }
    }
}

fn clamp_move(delta: f64, cap: f64) -> f64 {
    if cap > 0.0 {
        delta.clamp(-cap, cap)
    } else {
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchlist::SymbolEntry;

    const T0: u64 = 1_700_000_000_000;

    fn wl(tickers: &[&str]) -> Arc<Watchlist> {
        Arc::new(Watchlist {
            symbols: tickers
                .iter()
                .map(|t| SymbolEntry {
                    ticker: (*t).to_string(),
                    ..Default::default()
                })
                .collect(),
        })
    }

    fn cfg(smoothing: f64) -> CloudConfig {
        CloudConfig {
            strength_pct: 0.03,
            deadband_pct: 0.003,
            breadth_weight: 0.5,
            smoothing,
            cap_move_pct: 0.30,
            ..Default::default()
        }
    }

    /// Feed one symbol a base price then a moved price so its delta is set.
    fn seed_delta(e: &CloudEngine, sym: &str, delta_pct: f64, ts_ms: u64) {
        let base = 100.0;
        e.update(sym, base, 0.0, ts_ms.saturating_sub(1_000));
        e.update(sym, base * (1.0 + delta_pct / 100.0), 0.0, ts_ms);
    }

    #[test]
    fn first_tick_is_flat_pulse() {
        let e = CloudEngine::new(cfg(1.0), wl(&["A"]));
        let p = e.update("A", 100.0, 5.0, T0).unwrap();
        assert_eq!(p.direction, Direction::Flat);
        assert_eq!(p.delta_pct, 0.0);
        assert_eq!(p.strength, 0.0);
    }

    #[test]
    fn pulse_direction_and_strength() {
        let e = CloudEngine::new(cfg(1.0), wl(&["A"]));
        e.update("A", 100.0, 0.0, T0);
        let p = e.update("A", 100.015, 0.0, T0 + 1_000).unwrap();
        assert_eq!(p.direction, Direction::Up);
        // 0.015% of a 0.03% full scale
        assert!((p.strength - 0.5).abs() < 1e-9);

        let p = e.update("A", 100.0, 0.0, T0 + 2_000).unwrap();
        assert_eq!(p.direction, Direction::Down);
    }

    #[test]
    fn pulse_delta_is_clamped() {
        let e = CloudEngine::new(cfg(1.0), wl(&["A"]));
        e.update("A", 100.0, 0.0, T0);
        let p = e.update("A", 150.0, 0.0, T0 + 1_000).unwrap();
        assert!((p.delta_pct - 0.30).abs() < 1e-12);
        assert_eq!(p.strength, 1.0);
    }

    #[test]
    fn rejects_unlisted_and_disabled_symbols() {
        let mut list = Watchlist {
            symbols: vec![SymbolEntry {
                ticker: "OFF".into(),
                enabled: Some(false),
                ..Default::default()
            }],
        };
        list.normalize(&crate::watchlist::RuleDefaults::default());
        let e = CloudEngine::new(cfg(1.0), Arc::new(list));
        assert!(e.update("NOPE", 100.0, 0.0, T0).is_none());
        assert!(e.update("OFF", 100.0, 0.0, T0).is_none());
        assert!(e.update("OFF", 0.0, 0.0, T0).is_none());
    }

    #[test]
    fn snapshot_breadth_and_direction() {
        let e = CloudEngine::new(cfg(1.0), wl(&["A", "B", "C", "D"]));
        let now = T0 + 10_000;

        seed_delta(&e, "A", 0.02, now);
        seed_delta(&e, "B", 0.02, now);
        seed_delta(&e, "C", 0.02, now);
        seed_delta(&e, "D", -0.01, now);

        let s = e.snapshot(now);
        assert_eq!(s.adv, 3);
        assert_eq!(s.dec, 1);
        assert_eq!(s.flat, 0);
        assert_eq!(s.active, 4);
        assert_eq!(s.total, 4);
        assert!((s.breadth - 0.5).abs() < 1e-9);

        let raw = (0.02 + 0.02 + 0.02 - 0.01) / 4.0;
        assert!((s.raw_pct - raw).abs() < 1e-9);
        let composite = 0.5 * raw + 0.5 * (0.5 * 0.03);
        assert!((s.score_pct - composite).abs() < 1e-9);

        assert_eq!(s.direction, Direction::Up);
        assert!((s.strength - (composite / 0.03)).abs() < 1e-9);
        assert!(s.rate_hz >= 1.0 && s.rate_hz <= 12.0);
        assert_eq!(s.adv + s.dec + s.flat, s.active);
    }

    #[test]
    fn snapshot_inside_deadband_is_flat() {
        let e = CloudEngine::new(cfg(1.0), wl(&["A", "B"]));
        let now = T0 + 10_000;
        seed_delta(&e, "A", 0.001, now);
        seed_delta(&e, "B", -0.001, now);

        let s = e.snapshot(now);
        assert_eq!(s.direction, Direction::Flat);
        assert_eq!(s.strength, 0.0);
        assert_eq!(s.rate_hz, 0.0);
    }

    #[test]
    fn stale_symbols_are_excluded() {
        let e = CloudEngine::new(cfg(1.0), wl(&["A", "B"]));
        let now = T0 + 60_000;
        seed_delta(&e, "A", 0.02, now);
        seed_delta(&e, "B", 0.02, now - 30_000); // 30s old, stale_after = 3s

        let s = e.snapshot(now);
        assert_eq!(s.active, 1);
        assert_eq!(s.total, 2);
    }

    #[test]
    fn ewma_smooths_across_snapshots() {
        let e = CloudEngine::new(cfg(0.5), wl(&["A"]));
        let now = T0 + 10_000;
        seed_delta(&e, "A", 0.02, now);

        let first = e.snapshot(now);
        // first snapshot initializes the EWMA to the composite
        let composite = 0.5 * 0.02 + 0.5 * 0.03;
        assert!((first.score_pct - composite).abs() < 1e-9);

        // symbol goes stale; composite drops to zero, EWMA halves
        let later = now + 60_000;
        let second = e.snapshot(later);
        assert_eq!(second.active, 0);
        assert!((second.score_pct - composite / 2.0).abs() < 1e-9);
    }

    #[test]
    fn empty_cloud_is_flat_with_zero_score() {
        let e = CloudEngine::new(cfg(1.0), wl(&["A"]));
        let s = e.snapshot(T0);
        assert_eq!(s.active, 0);
        assert_eq!(s.direction, Direction::Flat);
        assert_eq!(s.score_pct, 0.0);
        assert_eq!(s.raw_pct, 0.0);
        assert_eq!(s.breadth, 0.0);
    }

    #[test]
    fn disabled_engine_emits_nothing() {
        let e = CloudEngine::new(
            CloudConfig {
                enabled: false,
                ..Default::default()
            },
            wl(&["A"]),
        );
        assert!(e.update("A", 100.0, 0.0, T0).is_none());
    }
}
