use anyhow::Context;
use energy_billing::config;
use energy_billing::fulfillment::{
    FsContentStore, FulfillmentWorker, LogNotifier, Notifier, WebhookNotifier,
};
use energy_billing::store::PgStore;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    let pool = PgPoolOptions::new()
        .max_connections(*config::DATABASE_MAX_CONNECTIONS)
        .connect(config::DATABASE_URL.as_str())
        .await
        .context("failed to connect to Postgres")?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(error).context("failed to run database migrations");
        }
    }

    let notifier: Arc<dyn Notifier> = match config::NOTIFY_WEBHOOK_URL.as_deref() {
        Some(endpoint) => Arc::new(
            WebhookNotifier::new(endpoint).context("invalid NOTIFY_WEBHOOK_URL")?,
        ),
        None => {
            tracing::warn!("NOTIFY_WEBHOOK_URL not set; invoice notifications are only logged");
            Arc::new(LogNotifier)
        }
    };

    let storage_root = config::DOCUMENT_STORAGE_ROOT.clone();
    let _worker = FulfillmentWorker::builder(Arc::new(PgStore::new(pool)))
        .content_store(Arc::new(FsContentStore::new(storage_root.clone())))
        .notifier(notifier)
        .settings(config::FulfillmentSettings::from_env())
        .spawn();
    tracing::info!(
        storage_root = %storage_root.display(),
        "fulfillment worker started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received; in-flight jobs resume on next start");
    Ok(())
}
