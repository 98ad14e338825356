use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::history::PriceHistory;
use crate::watchlist::{SymbolEntry, Watchlist};

/// Discrete signal classes the per-symbol engine can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertType {
    BaseUp,
    BaseDown,
    MomentumUp,
    MomentumDown,
    CrossAbove,
    CrossBelow,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::BaseUp => "base_up",
            AlertType::BaseDown => "base_down",
            AlertType::MomentumUp => "momentum_up",
            AlertType::MomentumDown => "momentum_down",
            AlertType::CrossAbove => "cross_above",
            AlertType::CrossBelow => "cross_below",
        }
    }
}

/// One fired rule, ready for audio materialization and broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub kind: AlertType,
    pub symbol: String,
    pub price: f64,
    pub message: String,
    pub speak_text: String,
}

#[derive(Debug, Clone)]
pub struct RuleConfig {
    /// Cooldown applied when neither the rule nor the symbol sets one.
    pub global_cooldown: Duration,
    /// How much per-symbol price history to retain.
    pub history_window: Duration,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            global_cooldown: Duration::from_secs(25),
            history_window: Duration::from_secs(300),
        }
    }
}

#[derive(Default)]
struct SymbolState {
    /// First observed price; set once, never updated.
    base_price: f64,
    last_price: f64,
    last_ts_ms: u64,
    hist: PriceHistory,
    /// Edge detection: last evaluated condition per rule key.
    active: HashMap<String, bool>,
    /// Cooldown bookkeeping: last fire time per rule key.
    last_fired: HashMap<String, u64>,
}

/// Edge-triggered signal detection with cooldowns over rolling history.
///
/// `update` is serialized under a single mutex, so concurrent callers are
/// safe and per-symbol updates are never interleaved mid-evaluation.
pub struct RuleEngine {
    global_cooldown_ms: u64,
    history_window_ms: u64,
    wl: Arc<Watchlist>,
    state: Mutex<HashMap<String, SymbolState>>,
}

impl RuleEngine {
    pub fn new(cfg: RuleConfig, wl: Arc<Watchlist>) -> Self {
        let defaults = RuleConfig::default();
        let global_cooldown = if cfg.global_cooldown.is_zero() {
            defaults.global_cooldown
        } else {
            cfg.global_cooldown
        };
        let history_window = if cfg.history_window.is_zero() {
            defaults.history_window
        } else {
            cfg.history_window
        };

        Self {
            global_cooldown_ms: global_cooldown.as_millis() as u64,
            history_window_ms: history_window.as_millis() as u64,
            wl,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate all configured rules for one tick. Invalid input and
    /// unknown symbols produce an empty result, never an error.
    pub fn update(&self, symbol: &str, price: f64, volume: f64, ts_ms: u64) -> Vec<Alert> {
        if symbol.is_empty() || price <= 0.0 {
            return Vec::new();
        }
        let Some(entry) = self.wl.find(symbol) else {
            return Vec::new();
        };
        if !entry.is_enabled() {
            return Vec::new();
        }
        let symbol = entry.ticker.as_str();

        let mut guard = self.state.lock();
        let st = guard.entry(symbol.to_string()).or_default();

        if st.base_price == 0.0 {
            st.base_price = price;
        }
        st.last_price = price;
        st.last_ts_ms = ts_ms;
        st.hist.push(ts_ms, price, volume, self.history_window_ms);

        let mut alerts = Vec::new();

        if let Some(bc) = &entry.base_change {
            if st.base_price > 0.0 {
                let pct = ((price - st.base_price) / st.base_price) * 100.0;

                if bc.up_pct > 0.0 {
                    let fired = gate(
                        st,
                        "base_up",
                        pct >= bc.up_pct,
                        resolve_cooldown_ms(bc.cooldown, entry, self.global_cooldown_ms),
                        ts_ms,
                    );
                    if fired {
                        alerts.push(Alert {
                            kind: AlertType::BaseUp,
                            symbol: symbol.to_string(),
                            price,
                            message: format!("{symbol} up {pct:.2}% vs baseline"),
                            speak_text: format!("Alert. {symbol} up {pct:.1} percent."),
                        });
                    }
                }
                if bc.down_pct > 0.0 {
                    let fired = gate(
                        st,
                        "base_down",
                        pct <= -bc.down_pct.abs(),
                        resolve_cooldown_ms(bc.cooldown, entry, self.global_cooldown_ms),
                        ts_ms,
                    );
                    if fired {
                        let drop = pct.abs();
                        alerts.push(Alert {
                            kind: AlertType::BaseDown,
                            symbol: symbol.to_string(),
                            price,
                            message: format!("{symbol} down {drop:.2}% vs baseline"),
                            speak_text: format!("Alert. {symbol} down {drop:.1} percent."),
                        });
                    }
                }
            }
        }

        if let Some(mom) = &entry.momentum {
            let win_ms = if mom.window.is_zero() {
                60_000
            } else {
                mom.window.as_millis() as u64
            };
            let win_secs = win_ms / 1_000;

            // warm-up: no point old enough means the rule is skipped
            let reference = ts_ms
                .checked_sub(win_ms)
                .and_then(|target| st.hist.at_or_before(target))
                .map(|p| p.price);

            if let Some(old_price) = reference {
                if old_price > 0.0 {
                    let pct = ((price - old_price) / old_price) * 100.0;
                    let win_label = fmt_window(win_secs);

                    if mom.up_pct > 0.0 {
                        let fired = gate(
                            st,
                            &format!("mom_up_{win_secs}s"),
                            pct >= mom.up_pct,
                            resolve_cooldown_ms(mom.cooldown, entry, self.global_cooldown_ms),
                            ts_ms,
                        );
                        if fired {
                            alerts.push(Alert {
                                kind: AlertType::MomentumUp,
                                symbol: symbol.to_string(),
                                price,
                                message: format!("{symbol} momentum up {pct:.2}% in {win_label}"),
                                speak_text: format!(
                                    "Momentum. {symbol} up {pct:.1} percent in the last {win_secs} seconds."
                                ),
                            });
                        }
                    }
                    if mom.down_pct > 0.0 {
                        let fired = gate(
                            st,
                            &format!("mom_down_{win_secs}s"),
                            pct <= -mom.down_pct.abs(),
                            resolve_cooldown_ms(mom.cooldown, entry, self.global_cooldown_ms),
                            ts_ms,
                        );
                        if fired {
                            let drop = pct.abs();
                            alerts.push(Alert {
                                kind: AlertType::MomentumDown,
                                symbol: symbol.to_string(),
                                price,
                                message: format!("{symbol} momentum down {drop:.2}% in {win_label}"),
                                speak_text: format!(
                                    "Momentum. {symbol} down {drop:.1} percent in the last {win_secs} seconds."
                                ),
                            });
                        }
                    }
                }
            }
        }

        if let Some(pc) = &entry.price_cross {
            if pc.above > 0.0 {
                let level = pc.above;
                let fired = gate(
                    st,
                    &format!("cross_above_{level:.4}"),
                    price >= level,
                    resolve_cooldown_ms(pc.cooldown, entry, self.global_cooldown_ms),
                    ts_ms,
                );
                if fired {
                    alerts.push(Alert {
                        kind: AlertType::CrossAbove,
                        symbol: symbol.to_string(),
                        price,
                        message: format!("{symbol} crossed above {level:.2}"),
                        speak_text: format!("Price level. {symbol} crossed above {level:.2}."),
                    });
                }
            }
            if pc.below > 0.0 {
                let level = pc.below;
                let fired = gate(
                    st,
                    &format!("cross_below_{level:.4}"),
                    price <= level,
                    resolve_cooldown_ms(pc.cooldown, entry, self.global_cooldown_ms),
                    ts_ms,
                );
                if fired {
                    alerts.push(Alert {
                        kind: AlertType::CrossBelow,
                        symbol: symbol.to_string(),
                        price,
                        message: format!("{symbol} crossed below {level:.2}"),
                        speak_text: format!("Price level. {symbol} crossed below {level:.2}."),
                    });
                }
            }
        }

        if !alerts.is_empty() {
            debug!(symbol, count = alerts.len(), "rules fired");
        }

        alerts
    }
}

/// Cooldown resolution: rule-specific, then symbol-level, then global.
fn resolve_cooldown_ms(rule: Duration, entry: &SymbolEntry, global_ms: u64) -> u64 {
    if !rule.is_zero() {
        rule.as_millis() as u64
    } else if !entry.cooldown.is_zero() {
        entry.cooldown.as_millis() as u64
    } else {
        global_ms
    }
}

/// Edge + cooldown gate. Fires only on the false→true transition of
/// `condition`, and only when the key's cooldown has elapsed.
fn gate(st: &mut SymbolState, key: &str, condition: bool, cooldown_ms: u64, now_ms: u64) -> bool {
    let prev = st.active.get(key).copied().unwrap_or(false);
    st.active.insert(key.to_string(), condition);

    if !condition || prev {
        return false;
    }
    if let Some(last) = st.last_fired.get(key) {
        if now_ms.saturating_sub(*last) < cooldown_ms {
            return false;
        }
    }
    st.last_fired.insert(key.to_string(), now_ms);
    true
}

fn fmt_window(secs: u64) -> String {
    if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}
