use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::tts::errors::TtsError;
use crate::tts::TtsSettings;

/// Byte-producing speech backend. The cache talks to this seam so tests
/// can count invocations without a network.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, TtsError>;
}

/// OpenAI-compatible `/audio/speech` client.
pub struct OpenAiSynthesizer {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
    voice: String,
    response_format: String,
    speed: f64,
}

impl OpenAiSynthesizer {
    pub fn new(settings: &TtsSettings) -> Result<Self, TtsError> {
        let http = Client::builder().timeout(settings.timeout).build()?;

        Ok(Self {
            http,
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            voice: settings.voice.clone(),
            response_format: settings.response_format.clone(),
            speed: settings.speed,
        })
    }

    async fn post_audio(&self, payload: &Value) -> Result<Vec<u8>, TtsError> {
        let endpoint = format!("{}/audio/speech", self.base_url);

        let resp = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.bytes().await?;

        if status.is_success() {
            if body.is_empty() {
                return Err(TtsError::EmptyAudio);
            }
            return Ok(body.to_vec());
        }

        Err(TtsError::Api {
            status: status.as_u16(),
            message: extract_api_error(&body),
        })
    }
}

#[async_trait]
impl Synthesizer for OpenAiSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, TtsError> {
        let mut payload = json!({
            "model": self.model,
            "voice": self.voice,
            "input": text,
            "response_format": self.response_format,
            "speed": self.speed,
        });

        match self.post_audio(&payload).await {
            Ok(bytes) => Ok(bytes),
            // Some deployments name the field `format`; retry once when the
            // API rejects `response_format` specifically.
            Err(TtsError::Api { status: 400, message })
                if message.to_lowercase().contains("response_format") =>
            {
                warn!("tts rejected response_format; retrying with format key");
                if let Some(obj) = payload.as_object_mut() {
                    obj.remove("response_format");
                    obj.insert("format".into(), Value::String(self.response_format.clone()));
                }
                self.post_audio(&payload).await
            }
            Err(e) => {
                debug!(error = %e, "tts synthesis failed");
                Err(e)
            }
        }
    }
}

/// Pull the message out of an OpenAI-style `{"error":{"message":...}}`
/// body; fall back to the raw text.
fn extract_api_error(body: &[u8]) -> String {
    let raw = String::from_utf8_lossy(body).trim().to_string();
    if let Ok(parsed) = serde_json::from_slice::<Value>(body) {
        if let Some(msg) = parsed
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
        {
            if !msg.is_empty() {
                return msg.to_string();
            }
        }
    }
    raw
}
