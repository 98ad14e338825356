use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use crate::duration;

/// The configured universe of symbols to evaluate.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Watchlist {
    #[serde(default)]
    pub symbols: Vec<SymbolEntry>,
}

/// One watchlist entry: a ticker plus optional per-symbol rule overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SymbolEntry {
    pub ticker: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,

    #[serde(default)]
    pub base_change: Option<BaseChangeRule>,
    #[serde(default)]
    pub momentum: Option<MomentumRule>,
    #[serde(default)]
    pub price_cross: Option<PriceCrossRule>,

    /// Fallback cooldown when a rule omits its own.
    #[serde(default, deserialize_with = "duration::deserialize")]
    pub cooldown: Duration,
}

impl SymbolEntry {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

/// Alert when price moves `up_pct`/`down_pct` percent from the first
/// observed price.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BaseChangeRule {
    #[serde(default)]
    pub up_pct: f64,
    #[serde(default)]
    pub down_pct: f64,
    #[serde(default, deserialize_with = "duration::deserialize")]
    pub cooldown: Duration,
}

/// Alert when price moves `up_pct`/`down_pct` percent against the price
/// observed at least `window` ago.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MomentumRule {
    #[serde(default, deserialize_with = "duration::deserialize")]
    pub window: Duration,
    #[serde(default)]
    pub up_pct: f64,
    #[serde(default)]
    pub down_pct: f64,
    #[serde(default, deserialize_with = "duration::deserialize")]
    pub cooldown: Duration,
}

/// Alert when price crosses an absolute level.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PriceCrossRule {
    #[serde(default)]
    pub above: f64,
    #[serde(default)]
    pub below: f64,
    #[serde(default, deserialize_with = "duration::deserialize")]
    pub cooldown: Duration,
}

/// Rules assigned to entries that configure none themselves.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleDefaults {
    #[serde(default = "RuleDefaults::default_base_change")]
    pub base_change: BaseChangeRule,
    #[serde(default = "RuleDefaults::default_momentum")]
    pub momentum: MomentumRule,
}

impl RuleDefaults {
    fn default_base_change() -> BaseChangeRule {
        BaseChangeRule {
            up_pct: 1.0,
            down_pct: 1.0,
            cooldown: Duration::from_secs(90),
        }
    }

    fn default_momentum() -> MomentumRule {
        MomentumRule {
            window: Duration::from_secs(60),
            up_pct: 0.4,
            down_pct: 0.4,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl Default for RuleDefaults {
    fn default() -> Self {
        Self {
            base_change: Self::default_base_change(),
            momentum: Self::default_momentum(),
        }
    }
}

impl Watchlist {
    pub fn from_toml_str(s: &str) -> Result<Watchlist, toml::de::Error> {
        toml::from_str(s)
    }

    /// Trim and uppercase tickers, drop empties and duplicates, inject
    /// default rules into bare entries, and sort for stable iteration.
    pub fn normalize(&mut self, defaults: &RuleDefaults) {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.symbols.len());

        for mut s in self.symbols.drain(..) {
            s.ticker = s.ticker.trim().to_uppercase();
            if s.ticker.is_empty() || !seen.insert(s.ticker.clone()) {
                continue;
            }

            if s.base_change.is_none() && s.momentum.is_none() && s.price_cross.is_none() {
                s.base_change = Some(defaults.base_change.clone());
                s.momentum = Some(defaults.momentum.clone());
            }
            out.push(s);
        }

        out.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        self.symbols = out;
    }

    /// Enabled tickers, sorted.
    pub fn tickers(&self) -> Vec<String> {
        let mut t: Vec<String> = self
            .symbols
            .iter()
            .filter(|s| s.is_enabled())
            .map(|s| s.ticker.clone())
            .collect();
        t.sort();
        t
    }

    pub fn find(&self, ticker: &str) -> Option<&SymbolEntry> {
        let ticker = ticker.trim().to_uppercase();
        self.symbols.iter().find(|s| s.ticker == ticker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalized(toml_src: &str) -> Watchlist {
        let mut wl = Watchlist::from_toml_str(toml_src).unwrap();
        wl.normalize(&RuleDefaults::default());
        wl
    }

    #[test]
    fn normalizes_and_dedups_tickers() {
        let wl = normalized(
            r#"
            [[symbols]]
            ticker = " agq "

            [[symbols]]
            ticker = "AGQ"

            [[symbols]]
            ticker = ""

            [[symbols]]
            ticker = "msft"
            "#,
        );
        let tickers: Vec<_> = wl.symbols.iter().map(|s| s.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["AGQ", "MSFT"]);
    }

    #[test]
    fn bare_entries_get_default_rules() {
        let wl = normalized("[[symbols]]\nticker = \"AGQ\"\n");
        let s = wl.find("AGQ").unwrap();
        let bc = s.base_change.as_ref().unwrap();
        assert_eq!(bc.up_pct, 1.0);
        assert_eq!(bc.cooldown, Duration::from_secs(90));
        let m = s.momentum.as_ref().unwrap();
        assert_eq!(m.window, Duration::from_secs(60));
        assert!(s.price_cross.is_none());
    }

    #[test]
    fn configured_entries_are_left_alone() {
        let wl = normalized(
            r#"
            [[symbols]]
            ticker = "AGQ"
            [symbols.price_cross]
            above = 120.0
            cooldown = "45s"
            "#,
        );
        let s = wl.find("AGQ").unwrap();
        assert!(s.base_change.is_none());
        assert!(s.momentum.is_none());
        let pc = s.price_cross.as_ref().unwrap();
        assert_eq!(pc.above, 120.0);
        assert_eq!(pc.cooldown, Duration::from_secs(45));
    }

    #[test]
    fn tickers_skip_disabled_entries() {
        let wl = normalized(
            r#"
            [[symbols]]
            ticker = "AGQ"

            [[symbols]]
            ticker = "MSFT"
            enabled = false
            "#,
        );
        assert_eq!(wl.tickers(), vec!["AGQ"]);
        // but find still resolves the disabled entry
        assert!(wl.find("MSFT").is_some());
        assert!(!wl.find("MSFT").unwrap().is_enabled());
    }

    #[test]
    fn find_is_case_insensitive() {
        let wl = normalized("[[symbols]]\nticker = \"AGQ\"\n");
        assert!(wl.find("agq").is_some());
        assert!(wl.find(" AGQ ").is_some());
        assert!(wl.find("SPY").is_none());
    }
}
