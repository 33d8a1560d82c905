use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use united_realtime::auth;
use united_realtime::config::{generate_config_template, Config};
use united_realtime::db;
use united_realtime::directory::SqliteDirectory;
use united_realtime::routes;
use united_realtime::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("united_realtime=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(env_filter).init();
    }

    tracing::info!("UNITED realtime gateway v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    // Token verification key shared with the account service
    let jwt_secret = auth::jwt::load_jwt_secret(config.jwt_secret.as_deref(), &config.data_dir)?;

    let limits = config.limits();
    tracing::info!(
        max_message_chars = limits.max_message_chars,
        messages_per_second = limits.messages_per_second,
        ping_interval_secs = limits.ping_interval_secs,
        "Limits configured"
    );

    let directory = Arc::new(SqliteDirectory::new(db, jwt_secret));
    let app_state = AppState::new(directory, limits);

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
