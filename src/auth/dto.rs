use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::{
    jwt::Claims,
    repo_types::{Role, User},
};

/// Request body for native registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: String,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request body for linking a Google account to a native one.
#[derive(Debug, Deserialize)]
pub struct LinkGoogleRequest {
    pub email: String,
    pub password: String,
    pub google_auth_code: String,
}

#[derive(Debug, Deserialize)]
pub struct SetPasswordRequest {
    pub password: String,
}

/// Query string of the Google callback.
#[derive(Debug, Deserialize)]
pub struct GoogleCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub message: String,
    pub user: PublicUser,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub has_password: bool,
    pub google_linked: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            name: u.name.clone(),
            role: u.role,
            has_password: u.credentials.password_hash().is_some(),
            google_linked: u.credentials.google_id().is_some(),
            created_at: u.created_at,
        }
    }
}

/// User as seen by `/auth-status`.
#[derive(Debug, Serialize)]
pub struct StatusUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct AuthStatusResponse {
    pub user: StatusUser,
    #[serde(rename = "isAuthenticated")]
    pub is_authenticated: bool,
}

impl AuthStatusResponse {
    pub fn anonymous() -> Self {
        Self {
            user: StatusUser {
                id: String::new(),
                name: "Anonymous".into(),
                email: String::new(),
                role: "guest".into(),
            },
            is_authenticated: false,
        }
    }

    pub fn authenticated(claims: &Claims) -> Self {
        Self {
            user: StatusUser {
                id: claims.sub.to_string(),
                name: claims.name.clone(),
                email: claims.email.clone(),
                role: claims.role.to_string(),
            },
            is_authenticated: true,
        }
    }
}
