use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;

use tenant_auth::clock::SystemClock;
use tenant_auth::configuration::get_configuration;
use tenant_auth::email_client::{EmailClient, SenderEmail};
use tenant_auth::rate_limit::TokenBucketLimiter;
use tenant_auth::startup::{run, Services};
use tenant_auth::store::{MemoryStore, PgStore, Store};
use tenant_auth::telemetry::init_telemetry;

fn startup_error(kind: std::io::ErrorKind, message: &'static str) -> std::io::Error {
    std::io::Error::new(kind, message)
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let configuration = get_configuration().map_err(|e| {
        eprintln!("Failed to read configuration: {}", e);
        startup_error(std::io::ErrorKind::InvalidInput, "Configuration error")
    })?;

    init_telemetry(&configuration.application.log_level);
    tracing::info!("Configuration loaded");

    let store: Arc<dyn Store> = if configuration.database.in_memory {
        tracing::warn!("Using the in-memory store; state is lost on exit");
        Arc::new(MemoryStore::new())
    } else {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&configuration.database.connection_string())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to create connection pool");
                startup_error(std::io::ErrorKind::ConnectionRefused, "Database connection error")
            })?;
        let store = PgStore::new(pool);
        store.migrate().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            startup_error(std::io::ErrorKind::Other, "Migration error")
        })?;
        Arc::new(store)
    };

    let limiter = Arc::new(TokenBucketLimiter::per_minute(
        configuration.rate_limit.refresh_attempts_per_minute,
    ));
    let services = Services::build(
        store,
        Arc::new(SystemClock),
        limiter,
        &configuration.secrets,
        configuration.tokens.clone(),
    );

    let sender = SenderEmail::parse(&configuration.email_client.sender_email).map_err(|e| {
        tracing::error!(error = %e, "Invalid sender email");
        startup_error(std::io::ErrorKind::InvalidInput, "Configuration error")
    })?;
    let email_client = EmailClient::new(
        configuration.email_client.base_url.clone(),
        sender,
        configuration.email_client.timeout(),
    );

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!(address = %address, "Server listening");

    run(
        listener,
        services,
        email_client,
        configuration.application.base_url.clone(),
    )?
    .await
}
