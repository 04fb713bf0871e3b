use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use mrelay_core::{
    assemble::Assembler,
    config::Config,
    dispatch::Dispatcher,
    fetch::ContentFetcher,
    pipeline::{Pipeline, PipelineSink},
    scratch,
    store::{IdempotencyStore, MemoryStore, QuotaTracker},
};
use mrelay_scrape::{default_registry, HttpPageSource};
use mrelay_whatsapp::{CloudApiClient, WebhookState};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env may carry RUST_LOG, so it must be read before logging starts.
    mrelay_core::config::load_dotenv();
    mrelay_core::logging::init("mrelay")?;

    let cfg = Config::load().context("loading configuration")?;

    let store = Arc::new(MemoryStore::new());
    let idempotency = IdempotencyStore::new(store.clone(), cfg.dedup_ttl);
    let quota = QuotaTracker::new(store.clone(), cfg.media_quota, cfg.quota_window);

    let source = Arc::new(
        HttpPageSource::new(&cfg.fetch_user_agent, cfg.fetch_timeout, cfg.document_size_limit)
            .context("building fetch client")?,
    );
    let platform = Arc::new(
        CloudApiClient::new(
            cfg.graph_api_base.clone(),
            cfg.phone_number_id.clone(),
            cfg.whatsapp_token.clone(),
            cfg.platform_timeout,
        )
        .context("building platform client")?,
    );

    let pipeline = Arc::new(Pipeline::new(
        idempotency,
        Dispatcher::new(platform, quota),
        ContentFetcher::new(source, cfg.fetch_throttle),
        default_registry()?,
        Assembler::new(cfg.document_size_limit, cfg.chunk_size),
        cfg.temp_dir.clone(),
    ));

    tokio::spawn(maintenance(
        store,
        cfg.temp_dir.clone(),
        cfg.sweep_interval,
        cfg.sweep_max_age,
    ));

    let sink = PipelineSink::new(pipeline);
    let app = mrelay_whatsapp::router(WebhookState {
        verify_token: cfg.verify_token.clone(),
        app_secret: cfg.app_secret.clone(),
        sink: Arc::new(sink.clone()),
    });
    if cfg.app_secret.is_none() {
        warn!("WHATSAPP_APP_SECRET not set; webhook signatures are not checked");
    }

    let listener = tokio::net::TcpListener::bind(cfg.listen_addr)
        .await
        .with_context(|| format!("binding {}", cfg.listen_addr))?;
    info!(addr = %cfg.listen_addr, quota = cfg.media_quota, "mrelay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    sink.drain(cfg.shutdown_grace).await;
    info!("mrelay stopped");
    Ok(())
}

/// Periodically drop expired store records and orphaned scratch directories.
async fn maintenance(store: Arc<MemoryStore>, temp_dir: PathBuf, every: Duration, max_age: Duration) {
    let mut tick = tokio::time::interval(every);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tick.tick().await;

        let purged = store.purge_expired().await;

        let dir = temp_dir.clone();
        match tokio::task::spawn_blocking(move || scratch::sweep_orphans(&dir, max_age)).await {
            Ok(Ok(swept)) if swept > 0 || purged > 0 => {
                info!(swept, purged, "maintenance pass");
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "scratch sweep failed"),
            Err(e) => warn!(error = %e, "scratch sweep task failed"),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
