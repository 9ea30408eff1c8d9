//! feed-forwarder entry point.
//!
//! Thin on purpose: load configuration, open the store and the broker
//! connection (either failing is fatal), then run the reconciliation loop
//! until SIGINT/SIGTERM.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use feed_forwarder::config::Config;
use feed_forwarder::publisher::{AmqpBroker, ConnectionManager};
use feed_forwarder::reconcile::Reconciler;
use feed_forwarder::source::RssSource;
use feed_forwarder::store::PgStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if there is no .env; production injects variables directly.
    let _ = dotenvy::dotenv();

    init_tracing();
    info!("starting feed-forwarder");

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let config = Config::from_env().context("can't parse config")?;

    let store = PgStore::connect(&config.store)
        .await
        .context("can't connect to store")?;
    store.init().await.context("can't init store")?;

    let publisher = Arc::new(ConnectionManager::new(
        AmqpBroker::new(&config.broker),
        config.publisher(),
        &cancel,
    ));
    publisher.init().await.context("can't init publisher")?;

    let source = RssSource::new(&config.source.host, &config.source.path, config.source.tls);
    info!(feed = source.url(), "polling feed");

    let reconciler = Reconciler::new(
        Arc::new(source),
        publisher.clone(),
        Arc::new(store.clone()),
        config.reconciler(),
    );
    reconciler.run(cancel).await;

    publisher.shutdown().await;
    store.close().await;

    info!("feed-forwarder finished");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        cancel.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "can't listen for ctrl-c");
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
                warn!(error = %e, "can't listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
