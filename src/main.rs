use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use storefront_api::{
    app_router,
    config::{init_tracing, load_config},
    db,
    events::{process_events, EventSender},
    services::LogNotifier,
    stripe::StripeClient,
    AppServices, AppState,
};
use tokio::{net::TcpListener, signal, sync::mpsc};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(load_config().context("Failed to load configuration")?);
    init_tracing(config.log_level(), config.log_json);
    info!(
        environment = %config.environment,
        "Starting storefront API"
    );

    let db = Arc::new(
        db::establish_connection_from_app_config(&config)
            .await
            .context("Failed to connect to database")?,
    );
    if config.auto_migrate {
        db::run_migrations(&db)
            .await
            .context("Failed to run migrations")?;
    }

    let stripe = Arc::new(
        StripeClient::new(
            config.stripe_api_base.clone(),
            config.stripe_secret_key.clone(),
            config.external_timeout(),
        )
        .context("Failed to build payments client")?,
    );
    if config.stripe_webhook_secret.is_none() {
        anyhow::ensure!(
            !config.is_production(),
            "APP__STRIPE_WEBHOOK_SECRET must be set in production"
        );
        warn!("APP__STRIPE_WEBHOOK_SECRET is unset; webhook signatures will not be verified");
    }

    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = Arc::new(EventSender::new(event_tx));
    tokio::spawn(process_events(event_rx));

    let services = AppServices::build(
        db.clone(),
        config.clone(),
        event_sender.clone(),
        stripe.clone(),
        stripe,
        Arc::new(LogNotifier),
    );

    spawn_cart_sweeper(
        services.cart.clone(),
        config.cart_retention_days,
        config.cart_sweep_interval_secs,
    );

    let state = AppState {
        db,
        config: config.clone(),
        event_sender,
        services,
    };
    let app = app_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(addr = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}

/// Periodically deletes anonymous cart lines older than the retention window.
fn spawn_cart_sweeper(
    cart: Arc<storefront_api::services::CartService>,
    retention_days: i64,
    interval_secs: u64,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        // The immediate first tick would sweep at startup; skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let cutoff = Utc::now() - ChronoDuration::days(retention_days);
            match cart.sweep_expired(cutoff).await {
                Ok(0) => {}
                Ok(n) => info!(removed = n, "Swept expired cart lines"),
                Err(e) => error!("Cart sweep failed: {}", e),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
