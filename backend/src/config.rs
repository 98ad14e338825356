use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use engine::duration;
use engine::watchlist::RuleDefaults;
use engine::{CloudConfig, RuleConfig};

/// Root application configuration, loaded from TOML.
///
/// Every field has a working default; `load` applies the defaults first and
/// then replaces invalid user values rather than failing on them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub massive: MassiveSection,
    pub tts: TtsSection,
    pub cache: CacheSection,
    pub radar: RadarSection,
    pub cloud: CloudSection,
    /// Rules assigned to watchlist entries that configure none.
    pub defaults: RuleDefaults,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    pub port: u16,
    #[serde(deserialize_with = "duration::deserialize")]
    pub read_header_timeout: Duration,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8091,
            read_header_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MassiveSection {
    /// Environment variable holding the feed API key.
    pub api_key_env: String,
    /// realtime | delayed
    pub feed: String,
    /// stocks | crypto | forex | options
    pub market: String,
}

impl Default for MassiveSection {
    fn default() -> Self {
        Self {
            api_key_env: "MASSIVE_API_KEY".into(),
            feed: "realtime".into(),
            market: "stocks".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtsSection {
    /// Environment variable holding the TTS API key.
    pub api_key_env: String,
    pub base_url: String,
    pub model: String,
    pub voice: String,
    /// mp3 | wav | aac | opus | flac | pcm
    pub response_format: String,
    pub speed: f64,
    #[serde(deserialize_with = "duration::deserialize")]
    pub timeout: Duration,
    pub max_text_chars: usize,
}

impl Default for TtsSection {
    fn default() -> Self {
        Self {
            api_key_env: "OPENAI_API_KEY".into(),
            base_url: "https://api.openai.com/v1".into(),
            model: "tts-1-hd".into(),
            voice: "nova".into(),
            response_format: "mp3".into(),
            speed: 1.0,
            timeout: Duration::from_secs(30),
            max_text_chars: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub audio_dir: String,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            audio_dir: "./cache/audio".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RadarSection {
    pub log_level: String,
    #[serde(deserialize_with = "duration::deserialize")]
    pub global_cooldown: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub history_window: Duration,
    pub alert_workers: usize,
}

impl Default for RadarSection {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            global_cooldown: Duration::from_secs(25),
            history_window: Duration::from_secs(300),
            alert_workers: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CloudSection {
    pub enabled: bool,
    #[serde(deserialize_with = "duration::deserialize")]
    pub emit_every: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub stale_after: Duration,
    pub deadband_pct: f64,
    pub cap_move_pct: f64,
    pub strength_pct: f64,
    pub smoothing: f64,
    pub min_rate_hz: f64,
    pub max_rate_hz: f64,
    pub breadth_weight: f64,
    /// Net "voice bucket" parameters handed to clients via /api/cues.
    pub net_bucket_step: i64,
    pub net_bucket_flat: i64,
}

impl Default for CloudSection {
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
            net_bucket_step: 20,
            net_bucket_flat: 20,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<AppConfig> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw)
            .with_context(|| format!("parse config {}", path.display()))?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Replace invalid values with defaults. User values in range are kept.
    fn sanitize(&mut self) {
        let d = AppConfig::default();

        if self.server.bind.trim().is_empty() {
            self.server.bind = d.server.bind;
        }
        if self.server.port == 0 {
            self.server.port = d.server.port;
        }
        if self.server.read_header_timeout.is_zero() {
            self.server.read_header_timeout = d.server.read_header_timeout;
        }

        if self.massive.api_key_env.trim().is_empty() {
            self.massive.api_key_env = d.massive.api_key_env;
        }

        if self.tts.api_key_env.trim().is_empty() {
            self.tts.api_key_env = d.tts.api_key_env;
        }
        if self.tts.base_url.trim().is_empty() {
            self.tts.base_url = d.tts.base_url;
        }
        if self.tts.model.trim().is_empty() {
            self.tts.model = d.tts.model;
        }
        if self.tts.voice.trim().is_empty() {
            self.tts.voice = d.tts.voice;
        }
        if self.tts.response_format.trim().is_empty() {
            self.tts.response_format = d.tts.response_format;
        }
        if self.tts.speed <= 0.0 {
            self.tts.speed = d.tts.speed;
        }
        if self.tts.timeout.is_zero() {
            self.tts.timeout = d.tts.timeout;
        }
        if self.tts.max_text_chars == 0 {
            self.tts.max_text_chars = d.tts.max_text_chars;
        }

        if self.cache.audio_dir.trim().is_empty() {
            self.cache.audio_dir = d.cache.audio_dir;
        }

        if self.radar.global_cooldown.is_zero() {
            self.radar.global_cooldown = d.radar.global_cooldown;
        }
        if self.radar.history_window.is_zero() {
            self.radar.history_window = d.radar.history_window;
        }
        if self.radar.alert_workers == 0 {
            self.radar.alert_workers = d.radar.alert_workers;
        }

        self.cloud.net_bucket_step = self.cloud.net_bucket_step.abs();
        self.cloud.net_bucket_flat = self.cloud.net_bucket_flat.abs();
        if self.cloud.net_bucket_step == 0 {
            self.cloud.net_bucket_step = d.cloud.net_bucket_step;
        }
        if self.cloud.net_bucket_flat == 0 {
            self.cloud.net_bucket_flat = d.cloud.net_bucket_flat;
        }
        // remaining cloud fields are range-checked by CloudConfig::sanitized
    }

    pub fn rule_config(&self) -> RuleConfig {
        RuleConfig {
            global_cooldown: self.radar.global_cooldown,
            history_window: self.radar.history_window,
        }
    }

    pub fn cloud_config(&self) -> CloudConfig {
        CloudConfig {
            enabled: self.cloud.enabled,
            emit_every: self.cloud.emit_every,
            stale_after: self.cloud.stale_after,
            deadband_pct: self.cloud.deadband_pct,
            cap_move_pct: self.cloud.cap_move_pct,
            strength_pct: self.cloud.strength_pct,
            smoothing: self.cloud.smoothing,
            min_rate_hz: self.cloud.min_rate_hz,
            max_rate_hz: self.cloud.max_rate_hz,
            breadth_weight: self.cloud.breadth_weight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server.port, 8091);
        assert_eq!(cfg.server.read_header_timeout, Duration::from_secs(5));
        assert_eq!(cfg.tts.model, "tts-1-hd");
        assert_eq!(cfg.tts.max_text_chars, 500);
        assert_eq!(cfg.radar.global_cooldown, Duration::from_secs(25));
        assert_eq!(cfg.radar.alert_workers, 2);
        assert_eq!(cfg.cloud.emit_every, Duration::from_millis(200));
        assert_eq!(cfg.cloud.net_bucket_step, 20);
    }

    #[test]
    fn partial_toml_keeps_section_defaults() {
        let mut cfg: AppConfig = toml::from_str(
            r#"
            [server]
            port = 9000

            [radar]
            global_cooldown = "40s"
            "#,
        )
        .unwrap();
        cfg.sanitize();

        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.bind, "0.0.0.0");
        assert_eq!(cfg.radar.global_cooldown, Duration::from_secs(40));
        assert_eq!(cfg.radar.history_window, Duration::from_secs(300));
        assert_eq!(cfg.tts.voice, "nova");
    }

    #[test]
    fn durations_accept_integers_and_literals() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [cloud]
            emit_every = "150ms"
            stale_after = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.cloud.emit_every, Duration::from_millis(150));
        assert_eq!(cfg.cloud.stale_after, Duration::from_secs(5));
    }

    #[test]
    fn sanitize_fixes_invalid_values() {
        let mut cfg: AppConfig = toml::from_str(
            r#"
            [server]
            bind = " "

            [tts]
            speed = -2.0
            max_text_chars = 0

            [cloud]
            net_bucket_step = -40
            "#,
        )
        .unwrap();
        cfg.sanitize();

        assert_eq!(cfg.server.bind, "0.0.0.0");
        assert_eq!(cfg.tts.speed, 1.0);
        assert_eq!(cfg.tts.max_text_chars, 500);
        assert_eq!(cfg.cloud.net_bucket_step, 40);
    }

    #[test]
    fn defaults_section_feeds_watchlist_rules() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [defaults.base_change]
            up_pct = 2.0
            down_pct = 2.0
            cooldown = "120s"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.defaults.base_change.up_pct, 2.0);
        assert_eq!(
            cfg.defaults.base_change.cooldown,
            Duration::from_secs(120)
        );
        // untouched sub-defaults stay at compiled-in values
        assert_eq!(cfg.defaults.momentum.up_pct, 0.4);
    }
}
