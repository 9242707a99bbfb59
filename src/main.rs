mod app;
mod auth;
mod config;
mod db;
mod state;

use anyhow::Context;

use crate::{config::AppConfig, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "hybrid_auth=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env().context("load configuration")?;
    let admin = config.admin.clone();
    let app_state = AppState::init(config).await?;

    if let Some(seed) = admin {
        app_state
            .auth
            .bootstrap_admin(&seed)
            .await
            .context("create administrator account")?;
    }

    app::serve(app::build_app(app_state)).await
}
