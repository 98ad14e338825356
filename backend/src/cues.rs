//! Startup cue bootstrap.
//!
//! Short phrases the UI plays constantly (directional cues and the net
//! voice buckets) are synthesized once at startup so the browser never
//! waits on the TTS provider. Failures skip the cue; the UI degrades to
//! silence for that key.

use std::collections::HashMap;

use tokio::time::timeout;
use tracing::{info, warn};

use crate::tts::TtsClient;

/// `(key, spoken phrase)` pairs: the five directional cues plus net-bucket
/// labels from `net_bucket_flat` to ±100 in `net_bucket_step` steps.
pub fn cue_phrases(net_bucket_step: i64, net_bucket_flat: i64) -> Vec<(String, String)> {
    let mut phrases: Vec<(String, String)> = [
        ("up", "up"),
        ("upStrong", "UP!"),
        ("down", "down"),
        ("downStrong", "DOWN!"),
        ("flat", "flat"),
    ]
    .iter()
    .map(|(k, p)| (k.to_string(), p.to_string()))
    .collect();

    let step = net_bucket_step.max(1);
    let mut bucket = net_bucket_flat.max(1);
    while bucket <= 100 {
        phrases.push((format!("plus_{bucket}"), format!("plus {bucket}")));
        phrases.push((format!("minus_{bucket}"), format!("minus {bucket}")));
        bucket += step;
    }

    phrases
}

/// Synthesize every cue, each under the client's configured timeout, and
/// return the `key → public URL` map for the broadcaster.
pub async fn pregenerate(
    tts: &TtsClient,
    phrases: &[(String, String)],
) -> HashMap<String, String> {
    let per_phrase = tts.timeout();
    let mut cues = HashMap::with_capacity(phrases.len());

    for (key, phrase) in phrases {
        match timeout(per_phrase, tts.speak(phrase)).await {
            Err(_) => warn!(cue = %key, "cue pre-generation timed out"),
            Ok(Err(e)) => warn!(cue = %key, text = %phrase, error = %e, "failed to pre-generate cue"),
            Ok(Ok(res)) => {
                if let Some(name) = res.path.file_name() {
                    cues.insert(key.clone(), format!("/audio/{}", name.to_string_lossy()));
                }
            }
        }
    }

    info!(cues = cues.len(), total = phrases.len(), "cue audio ready");
    cues
}
