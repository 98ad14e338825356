use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{Html, IntoResponse};
use axum::Json;
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::server::error::{ApiError, ApiResult};
use crate::server::state::{Event, ServerState, Subscription};
use crate::server::ui;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub async fn index() -> Html<&'static str> {
    Html(ui::INDEX_HTML)
}

pub async fn app_js() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        ui::APP_JS,
    )
}

pub async fn healthz() -> &'static str {
    "ok"
}

/// `GET /events`: SSE stream. History replay, then the latest snapshot,
/// then live events. A comment keep-alive defeats idle timeouts.
pub async fn sse(
    State(state): State<ServerState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let Subscription { replay, rx, guard } = state.broadcaster.subscribe();
    debug!(replay = replay.len(), "sse subscriber connected");

    let stream = futures::stream::iter(replay)
        .chain(ReceiverStream::new(rx))
        .map(move |ev| {
            // the guard lives as long as the stream; dropping it
            // deregisters the subscriber
            let _ = &guard;
            Ok(encode_sse(&ev))
        });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("ping"),
    )
}

fn encode_sse(ev: &Event) -> SseEvent {
    match serde_json::to_string(ev) {
        Ok(data) => SseEvent::default().data(data),
        Err(_) => SseEvent::default().comment("encode error"),
    }
}

#[derive(Serialize)]
pub struct EventsResponse {
    pub events: Vec<Event>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud: Option<Event>,
}

/// `GET /api/events`
pub async fn api_events(State(state): State<ServerState>) -> Json<EventsResponse> {
    let (events, cloud) = state.broadcaster.history_and_cloud();
    Json(EventsResponse { events, cloud })
}

/// `GET /api/cloud`: 404 until the first snapshot lands.
pub async fn api_cloud(State(state): State<ServerState>) -> ApiResult<Json<Event>> {
    state
        .broadcaster
        .latest_cloud()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("cloud not ready yet".into()))
}

#[derive(Serialize)]
pub struct CuesResponse {
    pub cues: HashMap<String, String>,
    pub net_bucket_step: i64,
    pub net_bucket_flat: i64,
}

/// `GET /api/cues`
pub async fn api_cues(State(state): State<ServerState>) -> Json<CuesResponse> {
    Json(CuesResponse {
        cues: state.broadcaster.cues(),
        net_bucket_step: state.net_bucket_step,
        net_bucket_flat: state.net_bucket_flat,
    })
}

#[derive(Deserialize)]
pub struct SpeakQuery {
    #[serde(default)]
    pub text: String,
}

#[derive(Serialize)]
pub struct SpeakResponse {
    pub audio_url: String,
    pub cache_hit: bool,
}

/// `GET /api/speak?text=...`: on-demand synthesis.
pub async fn api_speak(
    State(state): State<ServerState>,
    Query(q): Query<SpeakQuery>,
) -> ApiResult<Json<SpeakResponse>> {
    if q.text.trim().is_empty() {
        return Err(ApiError::BadRequest("missing text".into()));
    }

    let res = state
        .tts
        .speak(&q.text)
        .await
        .map_err(|e| ApiError::BadRequest(format!("tts error: {e}")))?;

    let name = res
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ApiError::BadRequest("tts produced no artifact".into()))?;

    Ok(Json(SpeakResponse {
        audio_url: format!("/audio/{name}"),
        cache_hit: res.cache_hit,
    }))
}

/// `GET /audio/{name}`: serve one cached artifact. Artifact names are
/// fingerprint-derived, so anything resembling a path is rejected.
pub async fn audio(
    State(state): State<ServerState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if !safe_audio_name(&name) {
        return Err(ApiError::BadRequest("bad path".into()));
    }

    let path = state.audio_dir.join(&name);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::NotFound("no such audio".into()))?;

    Ok(([(header::CONTENT_TYPE, content_type_for(&name))], bytes))
}

fn safe_audio_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
        && !name.starts_with('.')
}

fn content_type_for(name: &str) -> &'static str {
    match name.rsplit('.').next().unwrap_or_default() {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "aac" => "audio/aac",
        "opus" => "audio/ogg",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}
