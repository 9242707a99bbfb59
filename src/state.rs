use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    auth::{
        jwt::JwtKeys, oauth::GoogleProvider, repo::PgUserRepository, services::AuthService,
    },
    config::AppConfig,
    db,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth: AuthService,
}

impl AppState {
    /// Connects to Postgres, applies migrations and wires the Google client.
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let pool = db::connect(&config.database_url).await?;
        db::migrate(&pool).await?;

        let auth = AuthService::new(
            Arc::new(PgUserRepository::new(pool)),
            Arc::new(GoogleProvider::new(&config.google)?),
            JwtKeys::new(&config.jwt),
        );
        Ok(Self { config, auth })
    }

    pub fn from_parts(config: Arc<AppConfig>, auth: AuthService) -> Self {
        Self { config, auth }
    }
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.auth.keys().clone()
    }
}
