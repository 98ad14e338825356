use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("empty tts text")]
    EmptyText,

    #[error("tts request failed: status={status} msg={message}")]
    Api { status: u16, message: String },

    #[error("empty audio response")]
    EmptyAudio,

    #[error("tts timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
