use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

use adapters::massive::{Feed, Market, MassiveConfig, MassiveWsClient, Topic};
use backend::config::AppConfig;
use backend::cues;
use backend::ingest::{run_ingest_loop, snapshot_event};
use backend::logger::init_tracing;
use backend::metrics::counters::Counters;
use backend::server::{self, Broadcaster, ServerConfig, ServerState};
use backend::time::now_ms;
use backend::tts::{OpenAiSynthesizer, TtsClient, TtsSettings};
use backend::workers::run_alert_worker;
use engine::{Alert, CloudEngine, RuleEngine, Watchlist};

#[derive(Parser, Debug)]
#[command(name = "radar", about = "Real-time audible market radar")]
struct Args {
    /// Path to the config TOML.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Path to the watchlist TOML.
    #[arg(long, default_value = "watchlist.toml")]
    watchlist: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let cfg = AppConfig::load(&args.config)?;

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(&cfg.radar.log_level, is_production);
    info!("starting radar backend");

    // watchlist
    let raw = std::fs::read_to_string(&args.watchlist)
        .with_context(|| format!("read watchlist {}", args.watchlist.display()))?;
    let mut wl = Watchlist::from_toml_str(&raw)
        .with_context(|| format!("parse watchlist {}", args.watchlist.display()))?;
    wl.normalize(&cfg.defaults);
    let tickers = wl.tickers();
    if tickers.is_empty() {
        bail!(
            "watchlist has zero symbols; add symbols to {}",
            args.watchlist.display()
        );
    }
    let wl = Arc::new(wl);

    // secrets
    let massive_key = require_env(&cfg.massive.api_key_env)?;
    let tts_key = require_env(&cfg.tts.api_key_env)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // TTS client with persistent cache
    let tts_settings = TtsSettings {
        api_key: tts_key,
        base_url: cfg.tts.base_url.clone(),
        model: cfg.tts.model.clone(),
        voice: cfg.tts.voice.clone(),
        response_format: cfg.tts.response_format.clone(),
        speed: cfg.tts.speed,
        timeout: cfg.tts.timeout,
        cache_dir: PathBuf::from(&cfg.cache.audio_dir),
        max_text_chars: cfg.tts.max_text_chars,
    };
    let synth = Arc::new(OpenAiSynthesizer::new(&tts_settings).context("init tts client")?);
    let tts = Arc::new(TtsClient::new(tts_settings, synth).context("init audio cache")?);

    // broadcaster + cue bootstrap (only synthesizes what is missing)
    let broadcaster = Arc::new(Broadcaster::new());
    let phrases = cues::cue_phrases(cfg.cloud.net_bucket_step, cfg.cloud.net_bucket_flat);
    broadcaster.set_cues(cues::pregenerate(&tts, &phrases).await);

    // http server
    let server_cfg = ServerConfig {
        bind: cfg.server.bind.clone(),
        port: cfg.server.port,
        read_header_timeout: cfg.server.read_header_timeout,
    };
    let public_addr = format!("http://{}", server_cfg.addr());
    let server_task = start_http_server(
        server_cfg,
        ServerState {
            broadcaster: broadcaster.clone(),
            tts: tts.clone(),
            audio_dir: tts.cache_dir().to_path_buf(),
            net_bucket_step: cfg.cloud.net_bucket_step,
            net_bucket_flat: cfg.cloud.net_bucket_flat,
        },
        shutdown_tx.clone(),
    );

    // engines
    let rules = Arc::new(RuleEngine::new(cfg.rule_config(), wl.clone()));
    let cloud = Arc::new(CloudEngine::new(cfg.cloud_config(), wl.clone()));

    if cloud.enabled() {
        start_snapshot_emitter(cloud.clone(), broadcaster.clone(), shutdown_rx.clone());
    }

    // alert workers
    let counters = Counters::default();
    let (alert_tx, alert_rx) = mpsc::channel::<Alert>(1024);
    let alert_rx = Arc::new(Mutex::new(alert_rx));
    for worker_id in 0..cfg.radar.alert_workers {
        tokio::spawn(run_alert_worker(
            worker_id,
            alert_rx.clone(),
            tts.clone(),
            broadcaster.clone(),
            counters.clone(),
            shutdown_rx.clone(),
        ));
    }

    // market data feed
    let mut feed = MassiveWsClient::new(MassiveConfig {
        api_key: massive_key,
        feed: Feed::parse(&cfg.massive.feed),
        market: Market::parse(&cfg.massive.market),
        base_url: None,
    });
    feed.connect().await.context("connect to market data feed")?;
    feed.subscribe(Topic::SecondAggregates, &tickers)
        .await
        .context("subscribe to second aggregates")?;

    let (feed_tx, feed_rx) = mpsc::channel(1024);
    let (fatal_tx, fatal_rx) = mpsc::channel(1);
    tokio::spawn(feed.run(feed_tx, fatal_tx));

    tokio::spawn(run_ingest_loop(
        feed_rx,
        fatal_rx,
        rules,
        cloud,
        broadcaster.clone(),
        alert_tx,
        counters.clone(),
        shutdown_tx.clone(),
    ));

    info!(
        symbols = tickers.len(),
        addr = %public_addr,
        "running; open the UI in your browser and click Enable Audio"
    );

    // wait for ctrl-c or an internally triggered shutdown
    let mut shutdown_watch = shutdown_rx.clone();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
        _ = shutdown_watch.changed() => {}
    }

    // bounded drain of the transport
    let _ = tokio::time::timeout(Duration::from_secs(5), server_task).await;

    info!(
        ticks = counters.ticks.load(Ordering::Relaxed),
        alerts = counters.alerts_fired.load(Ordering::Relaxed),
        alerts_dropped = counters.alerts_dropped.load(Ordering::Relaxed),
        tts_failures = counters.tts_failures.load(Ordering::Relaxed),
        events_dropped = broadcaster.dropped(),
        "shutdown complete"
    );
    Ok(())
}

fn require_env(name: &str) -> anyhow::Result<String> {
    let value = std::env::var(name).unwrap_or_default().trim().to_string();
    if value.is_empty() {
        bail!("missing required environment variable {name}");
    }
    Ok(value)
}

fn start_http_server(
    cfg: ServerConfig,
    state: ServerState,
    shutdown: watch::Sender<bool>,
) -> JoinHandle<()> {
    let shutdown_rx = shutdown.subscribe();
    tokio::spawn(async move {
        if let Err(e) = server::serve(cfg, state, shutdown_rx).await {
            error!(error = ?e, "http server stopped with error");
            let _ = shutdown.send(true);
        }
    })
}

/// One periodic task owns the snapshot cadence, so EWMA updates are
/// totally ordered.
fn start_snapshot_emitter(
    cloud: Arc<CloudEngine>,
    broadcaster: Arc<Broadcaster>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cloud.emit_every());
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = ticker.tick() => {
                    let snap = cloud.snapshot(now_ms());
                    broadcaster.broadcast(snapshot_event(&snap));
                }
            }
        }
    })
}
