use std::time::Duration;

use anyhow::{anyhow, Context};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc::Sender;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::massive::parser::parse_frame;
use crate::massive::types::{Feed, FeedMessage, Market, Topic};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct MassiveConfig {
    pub api_key: String,
    pub feed: Feed,
    pub market: Market,
    /// Override the dialed URL (tests, proxies). When set, `feed`/`market`
    /// only affect subscription topics.
    pub base_url: Option<String>,
}

impl MassiveConfig {
    fn url(&self) -> String {
        match &self.base_url {
            Some(u) => u.clone(),
            None => format!("{}/{}", self.feed.host(), self.market.path()),
        }
    }
}

/// Reconnecting WebSocket client for the Massive feed.
///
/// Lifecycle: `connect` dials and authenticates, `subscribe` registers
/// topics (replayed after every reconnect), `run` consumes the socket and
/// forwards messages until the output channel closes or auth fails.
pub struct MassiveWsClient {
    cfg: MassiveConfig,
    ws: Option<WsStream>,
    subs: Vec<(Topic, Vec<String>)>,
}

impl MassiveWsClient {
    pub fn new(cfg: MassiveConfig) -> Self {
        Self {
            cfg,
            ws: None,
            subs: Vec::new(),
        }
    }

    /// Dial the feed host and send the auth frame.
    pub async fn connect(&mut self) -> anyhow::Result<()> {
        let url = self.cfg.url();
        debug!(%url, "connecting to market data feed");

        let (ws, _) = connect_async(&url)
            .await
            .with_context(|| format!("connect to {url}"))?;
        self.ws = Some(ws);

        self.send_json(&json!({
            "action": "auth",
            "params": self.cfg.api_key,
        }))
        .await
        .context("send auth frame")?;

        info!(%url, "feed connected");
        Ok(())
    }

    /// Subscribe to a topic for the given symbols. The subscription is
    /// remembered and replayed after reconnects.
    pub async fn subscribe(&mut self, topic: Topic, symbols: &[String]) -> anyhow::Result<()> {
        if symbols.is_empty() {
            return Err(anyhow!("subscribe called with no symbols"));
        }

        self.send_json(&json!({
            "action": "subscribe",
            "params": topic.params(symbols),
        }))
        .await
        .context("send subscribe frame")?;

        info!(topic = topic.prefix(), symbols = symbols.len(), "subscribed");
        self.subs.push((topic, symbols.to_vec()));
        Ok(())
    }

    /// Consume the socket forever, forwarding parsed messages to `out`.
    ///
    /// Transport drops trigger a reconnect (with re-auth and
    /// re-subscription) after a fixed delay. Two conditions end the loop:
    /// a fatal `auth_failed` status, reported on `fatal`, and a closed
    /// output channel (the consumer went away).
    pub async fn run(mut self, out: Sender<FeedMessage>, fatal: Sender<anyhow::Error>) {
        loop {
            if self.ws.is_none() {
                warn!(delay = ?RECONNECT_DELAY, "feed disconnected; reconnecting");
                tokio::time::sleep(RECONNECT_DELAY).await;
                if let Err(e) = self.reconnect().await {
                    error!(error = ?e, "feed reconnect failed");
                    continue;
                }
            }

            let Some(ws) = self.ws.as_mut() else {
                continue;
            };

            let msg = match ws.next().await {
                Some(Ok(m)) => m,
                Some(Err(e)) => {
                    warn!(error = ?e, "feed stream error");
                    self.ws = None;
                    continue;
                }
                None => {
                    self.ws = None;
                    continue;
                }
            };

            if msg.is_ping() || msg.is_pong() {
                continue;
            }
            let Ok(raw) = msg.to_text() else {
                continue;
            };

            let messages = match parse_frame(raw) {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = ?e, "unparseable feed frame");
                    continue;
                }
            };

            for m in messages {
                match m {
                    FeedMessage::Status { status, message } => {
                        if status == "auth_failed" {
                            error!(%message, "feed authentication rejected");
                            let _ = fatal.send(anyhow!("feed auth failed: {message}")).await;
                            return;
                        }
                        debug!(%status, %message, "feed status");
                    }
                    other => {
                        if out.send(other).await.is_err() {
                            debug!("feed consumer closed; stopping read loop");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn reconnect(&mut self) -> anyhow::Result<()> {
        self.connect().await?;
        let subs = self.subs.clone();
        for (topic, symbols) in subs {
            self.send_json(&json!({
                "action": "subscribe",
                "params": topic.params(&symbols),
            }))
            .await
            .context("replay subscribe frame")?;
        }
        Ok(())
    }

    async fn send_json(&mut self, v: &serde_json::Value) -> anyhow::Result<()> {
        let ws = self.ws.as_mut().ok_or_else(|| anyhow!("not connected"))?;
        let text = serde_json::to_string(v)?;
        ws.send(Message::Text(text.into())).await?;
        Ok(())
    }
}
