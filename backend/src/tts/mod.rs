//! Text-to-speech with a persistent, content-addressed audio cache.
//!
//! Artifacts live at `<cache_dir>/<sha256 fingerprint>.<ext>` where the
//! fingerprint covers every synthesis parameter. Files are written once via
//! temp-file + atomic rename and never modified, so concurrent readers
//! (the HTTP audio routes) need no coordination. A per-fingerprint
//! single-flight gate guarantees at most one concurrent synthesis per
//! phrase; followers observe the leader's artifact as a cache hit.

pub mod errors;
pub mod synth;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::debug;

pub use errors::TtsError;
pub use synth::{OpenAiSynthesizer, Synthesizer};

/// Runtime synthesis settings. Empty/invalid fields are replaced with
/// working defaults by `TtsClient::new`.
#[derive(Debug, Clone)]
pub struct TtsSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub voice: String,
    pub response_format: String,
    pub speed: f64,
    pub timeout: Duration,
    pub cache_dir: PathBuf,
    pub max_text_chars: usize,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".into(),
            model: "tts-1-hd".into(),
            voice: "nova".into(),
            response_format: "mp3".into(),
            speed: 1.0,
            timeout: Duration::from_secs(30),
            cache_dir: PathBuf::from("./cache/audio"),
            max_text_chars: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeakResult {
    pub path: PathBuf,
    pub cache_hit: bool,
}

pub struct TtsClient {
    settings: TtsSettings,
    synth: Arc<dyn Synthesizer>,
    /// Single-flight registry: one async gate per fingerprint in flight.
    inflight: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TtsClient {
    /// Normalize settings and create the cache directory. A missing or
    /// uncreatable cache directory is fatal for the process.
    pub fn new(mut settings: TtsSettings, synth: Arc<dyn Synthesizer>) -> Result<Self, TtsError> {
        let d = TtsSettings::default();
        if settings.base_url.trim().is_empty() {
            settings.base_url = d.base_url;
        }
        settings.base_url = settings.base_url.trim_end_matches('/').to_string();
        if settings.model.trim().is_empty() {
            settings.model = d.model;
        }
        if settings.voice.trim().is_empty() {
            settings.voice = d.voice;
        }
        if settings.response_format.trim().is_empty() {
            settings.response_format = d.response_format;
        }
        if settings.speed <= 0.0 {
            settings.speed = d.speed;
        }
        if settings.timeout.is_zero() {
            settings.timeout = d.timeout;
        }
        if settings.max_text_chars == 0 {
            settings.max_text_chars = d.max_text_chars;
        }

        std::fs::create_dir_all(&settings.cache_dir)?;

        Ok(Self {
            settings,
            synth,
            inflight: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.settings.timeout
    }

    pub fn cache_dir(&self) -> &Path {
        &self.settings.cache_dir
    }

    /// Resolve `text` to an audio artifact, synthesizing on cache miss.
    pub async fn speak(&self, text: &str) -> Result<SpeakResult, TtsError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TtsError::EmptyText);
        }
        let text = truncate_runes(text, self.settings.max_text_chars);

        let key = self.fingerprint(&text);
        let ext = extension_from_format(&self.settings.response_format);
        let final_path = self.settings.cache_dir.join(format!("{key}.{ext}"));

        // fast path
        if file_ok(&final_path) {
            return Ok(SpeakResult {
                path: final_path,
                cache_hit: true,
            });
        }

        let gate = {
            let mut inflight = self.inflight.lock();
            inflight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let guard = gate.lock().await;

        // re-check: another leader may have published while we waited
        if file_ok(&final_path) {
            drop(guard);
            self.inflight.lock().remove(&key);
            return Ok(SpeakResult {
                path: final_path,
                cache_hit: true,
            });
        }

        let result = self.synthesize_to(&final_path, &text).await;

        drop(guard);
        self.inflight.lock().remove(&key);

        result.map(|()| SpeakResult {
            path: final_path,
            cache_hit: false,
        })
    }

    async fn synthesize_to(&self, final_path: &Path, text: &str) -> Result<(), TtsError> {
        let audio = self.synth.synthesize(text).await?;

        let tmp = PathBuf::from(format!(
            "{}.tmp-{}-{}",
            final_path.display(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            rand::random::<u32>() % 1_000_000,
        ));

        tokio::fs::write(&tmp, &audio).await?;
        if let Err(e) = tokio::fs::rename(&tmp, final_path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(path = %final_path.display(), bytes = audio.len(), "audio artifact written");
        Ok(())
    }

    /// SHA-256 over the full parameter canonicalization, so any change to
    /// model, voice, format, speed or text yields a distinct artifact.
    fn fingerprint(&self, text: &str) -> String {
        let raw = format!(
            "{}|{}|{}|{:.3}|{}",
            self.settings.model,
            self.settings.voice,
            self.settings.response_format,
            self.settings.speed,
            text
        );
        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn truncate_runes(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn extension_from_format(format: &str) -> &'static str {
    match format.trim().to_lowercase().as_str() {
        "mp3" => "mp3",
        "wav" => "wav",
        "aac" => "aac",
        "opus" => "opus",
        "flac" => "flac",
        "pcm" => "pcm",
        _ => "mp3",
    }
}

fn file_ok(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
