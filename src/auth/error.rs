use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Why a password check failed.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("account has no password set")]
    NoPasswordSet,
    #[error("password does not match")]
    Mismatch,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token signature is invalid")]
    SignatureInvalid,
    #[error("token has expired")]
    Expired,
    #[error("token is malformed")]
    Malformed,
}

/// Failure talking to the external identity provider.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("authorization code exchange failed: {0}")]
    Token(String),
    #[error("userinfo request failed: {0}")]
    UserInfo(String),
    #[error("identity provider returned no email")]
    MissingEmail,
    #[error("identity provider email is not verified")]
    UnverifiedEmail,
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("user already exists")]
    AlreadyExists,
    #[error("user not found")]
    NotFound,
    #[error("google account is bound to another user")]
    GoogleIdTaken,
    /// The password hash differs from the one the caller verified against.
    #[error("credentials changed concurrently")]
    CredentialsChanged,
    #[error("corrupt user record: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome kinds of every core operation.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("user already exists")]
    AlreadyExists,
    #[error("user not found")]
    NotFound,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account was registered with Google; sign in with Google or set a password")]
    OAuthOnly,
    #[error("an account with this email already exists; sign in with your password to link Google")]
    LinkRequired,
    #[error("this Google account is already linked to another user")]
    GoogleIdTaken,
    #[error("Google account email does not match the account email")]
    EmailMismatch,
    #[error("invalid role")]
    InvalidRole,
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<RepoError> for AuthError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::AlreadyExists => AuthError::AlreadyExists,
            RepoError::NotFound => AuthError::NotFound,
            RepoError::GoogleIdTaken => AuthError::GoogleIdTaken,
            RepoError::CredentialsChanged => AuthError::InvalidCredentials,
            other => AuthError::Internal(other.into()),
        }
    }
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_oauth: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_required: Option<&'static str>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            use_oauth: None,
            action_required: None,
        }
    }
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::AlreadyExists | AuthError::LinkRequired | AuthError::GoogleIdTaken => {
                StatusCode::CONFLICT
            }
            AuthError::NotFound => StatusCode::NOT_FOUND,
            AuthError::InvalidCredentials | AuthError::OAuthOnly | AuthError::Token(_) => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::EmailMismatch | AuthError::InvalidRole => StatusCode::BAD_REQUEST,
            AuthError::Exchange(_) => StatusCode::BAD_GATEWAY,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AuthError::OAuthOnly => ErrorResponse {
                use_oauth: Some(true),
                ..ErrorResponse::new(self.to_string())
            },
            AuthError::LinkRequired => ErrorResponse {
                action_required: Some("link_account"),
                ..ErrorResponse::new(self.to_string())
            },
            AuthError::Exchange(e) => {
                error!(error = %e, "identity provider failure");
                ErrorResponse::new("Failed to verify with Google")
            }
            AuthError::Internal(e) => {
                error!(error = %e, "internal error");
                ErrorResponse::new("Internal server error")
            }
            _ => ErrorResponse::new(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}
