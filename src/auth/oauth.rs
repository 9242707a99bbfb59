//! External identity provider: Google OAuth2 authorization-code flow.
//!
//! [`GoogleProvider`] is built once from [`GoogleConfig`] and shared through
//! `Arc<dyn IdentityProvider>`; there is no global client state.

use async_trait::async_trait;
use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{auth::error::ExchangeError, config::GoogleConfig};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

/// Identity asserted by the provider after a successful code exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub external_id: String,
    pub email: String,
    pub name: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Consent page URL carrying `state`.
    fn authorize_url(&self, state: &str) -> String;

    async fn exchange_code(&self, code: &str) -> Result<ExternalIdentity, ExchangeError>;
}

/// Google userinfo v2 response.
#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    id: String,
    email: Option<String>,
    #[serde(default)]
    verified_email: Option<bool>,
    name: Option<String>,
}

type ConfiguredClient = oauth2::Client<
    oauth2::basic::BasicErrorResponse,
    oauth2::basic::BasicTokenResponse,
    oauth2::basic::BasicTokenIntrospectionResponse,
    oauth2::StandardRevocableToken,
    oauth2::basic::BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

pub struct GoogleProvider {
    client: ConfiguredClient,
    http: reqwest::Client,
    userinfo_url: String,
}

impl GoogleProvider {
    pub fn new(cfg: &GoogleConfig) -> anyhow::Result<Self> {
        Self::with_endpoints(cfg, GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL, GOOGLE_USERINFO_URL)
    }

    pub fn with_endpoints(
        cfg: &GoogleConfig,
        auth_url: &str,
        token_url: &str,
        userinfo_url: &str,
    ) -> anyhow::Result<Self> {
        let client = BasicClient::new(ClientId::new(cfg.client_id.clone()))
            .set_client_secret(ClientSecret::new(cfg.client_secret.clone()))
            .set_auth_uri(AuthUrl::new(auth_url.to_string())?)
            .set_token_uri(TokenUrl::new(token_url.to_string())?)
            .set_redirect_uri(RedirectUrl::new(cfg.redirect_url.clone())?);

        // The token endpoint must not be allowed to redirect us elsewhere.
        let http = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            http,
            userinfo_url: userinfo_url.to_string(),
        })
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn authorize_url(&self, state: &str) -> String {
        let state = state.to_string();
        let (url, _) = self
            .client
            .authorize_url(move || CsrfToken::new(state))
            .add_scope(Scope::new("openid".to_string()))
            .add_scope(Scope::new("email".to_string()))
            .add_scope(Scope::new("profile".to_string()))
            .url();
        url.to_string()
    }

    async fn exchange_code(&self, code: &str) -> Result<ExternalIdentity, ExchangeError> {
        let token = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| {
                warn!(error = %e, "google token exchange failed");
                ExchangeError::Token(e.to_string())
            })?;

        let info: GoogleUserInfo = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(token.access_token().secret())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ExchangeError::UserInfo(e.to_string()))?
            .json()
            .await
            .map_err(|e| ExchangeError::UserInfo(e.to_string()))?;

        if info.verified_email == Some(false) {
            warn!(google_id = %info.id, "google email is not verified");
            return Err(ExchangeError::UnverifiedEmail);
        }
        let email = info
            .email
            .filter(|e| !e.is_empty())
            .ok_or(ExchangeError::MissingEmail)?;

        debug!(google_id = %info.id, "google identity resolved");
        Ok(ExternalIdentity {
            external_id: info.id,
            email,
            name: info.name.filter(|n| !n.trim().is_empty()),
        })
    }
}


#[cfg(test)]
mod tests {
    use std::{collections::HashMap, net::SocketAddr};

    use axum::{
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::{get, post},
        Form, Json, Router,
    };
    use serde_json::json;

    use super::*;

    fn config() -> GoogleConfig {
        GoogleConfig {
            client_id: "client-123".into(),
            client_secret: "shh".into(),
            redirect_url: "http://localhost:8080/api/v1/auth/google/callback".into(),
        }
    }

    async fn token(Form(form): Form<HashMap<String, String>>) -> impl IntoResponse {
        if form.get("code").map(String::as_str) == Some("good-code") {
            Json(json!({"access_token": "at-1", "token_type": "bearer", "expires_in": 3600}))
                .into_response()
        } else {
            (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_grant"}))).into_response()
        }
    }

    async fn userinfo(headers: HeaderMap) -> impl IntoResponse {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if auth != "Bearer at-1" {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        Json(json!({
            "id": "g-123",
            "email": "alice@example.com",
            "verified_email": true,
            "name": "Alice"
        }))
        .into_response()
    }

    async fn fake_google() -> SocketAddr {
        let app = Router::new()
            .route("/token", post(token))
            .route("/userinfo", get(userinfo));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn provider_for(addr: SocketAddr) -> GoogleProvider {
        GoogleProvider::with_endpoints(
            &config(),
            &format!("http://{addr}/auth"),
            &format!("http://{addr}/token"),
            &format!("http://{addr}/userinfo"),
        )
        .unwrap()
    }

    #[test]
    fn authorize_url_carries_client_scopes_and_state() {
        let provider = GoogleProvider::new(&config()).unwrap();
        let url = provider.authorize_url("state-xyz");
        assert!(url.starts_with(GOOGLE_AUTH_URL));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains("state=state-xyz"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("email"));
    }

    #[tokio::test]
    async fn exchange_code_resolves_identity() {
        let addr = fake_google().await;
        let identity = provider_for(addr).exchange_code("good-code").await.unwrap();
        assert_eq!(
            identity,
            ExternalIdentity {
                external_id: "g-123".into(),
                email: "alice@example.com".into(),
                name: Some("Alice".into()),
            }
        );
    }

    #[tokio::test]
    async fn exchange_code_surfaces_rejected_grant() {
        let addr = fake_google().await;
        let err = provider_for(addr).exchange_code("bad-code").await.unwrap_err();
        assert!(matches!(err, ExchangeError::Token(_)));
    }
}
