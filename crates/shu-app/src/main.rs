use anyhow::Context;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use shu_app::App;
use shu_core::models::{Document, PluginFeed};
use shu_core::Config;
use shu_db::FeedRepository;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env().context("Failed to load configuration")?;

    shu_infra::init_telemetry(&config.telemetry)
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let app = App::build(config).await?;
    if !app.config.is_production() {
        seed_demo(&app).await?;
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal.cancel();
    });

    app.run(shutdown).await;
    shu_infra::shutdown_telemetry().await;
    Ok(())
}

/// One text document and one hourly notes feed, so a development run shows
/// every workload moving.
async fn seed_demo(app: &App) -> anyhow::Result<()> {
    let kb_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();

    let document = Document::new(kb_id, "welcome.txt", "mem://welcome.txt", "text/plain");
    app.stores
        .sources
        .put(
            document.source_uri.clone(),
            "Shu ingests documents in three queued stages. Text is extracted, \
             chunked and embedded, then profiled into a short synopsis.",
        )
        .await;
    app.ingestion.submit(document).await?;

    let mut feed = PluginFeed::new(
        "welcome-notes",
        "notes",
        "sync",
        json!({"notes": [{"id": "welcome", "title": "Welcome", "content": "Hello from the notes feed."}]}),
        user_id,
        3600,
    );
    feed.kb_grants = vec![kb_id];
    app.stores
        .feeds
        .insert(feed)
        .await
        .context("Failed to seed demo feed")?;

    tracing::info!(kb_id = %kb_id, "Seeded demo document and feed");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal");
        },
    }

    tracing::info!("Shutting down gracefully...");
}
