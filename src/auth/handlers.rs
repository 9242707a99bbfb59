use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{
        header::{AUTHORIZATION, CACHE_CONTROL, COOKIE, EXPIRES, PRAGMA, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use lazy_static::lazy_static;
use oauth2::CsrfToken;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthStatusResponse, GoogleCallbackQuery, LinkGoogleRequest, LoginRequest,
            MessageResponse, PublicUser, RegisterRequest, RegisterResponse, SetPasswordRequest,
            TokenResponse,
        },
        error::{AuthError, ErrorResponse},
        extractors::AuthUser,
        repo_types::Role,
    },
    state::AppState,
};

const STATE_COOKIE: &str = "oauth_state";
const CLEAR_STATE_COOKIE: &str = "oauth_state=; HttpOnly; Path=/; Max-Age=0; SameSite=Lax";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Handler error: request validation or a core outcome.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Auth(AuthError),
}

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError::Auth(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        warn!(error = %rejection.body_text(), "invalid request payload");
        ApiError::bad_request("Invalid request payload")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(msg))).into_response()
            }
            ApiError::Auth(e) => e.into_response(),
        }
    }
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/auth/google/login", get(google_login))
        .route("/auth/google/callback", get(google_callback))
        .route("/auth/google/link", post(link_google))
        .route("/auth-status", get(auth_status))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/profile", get(get_profile))
        .route("/password", post(set_password))
}

fn check_password_len(state: &AppState, password: &str) -> Result<(), ApiError> {
    if password.chars().count() < state.config.password_min_len {
        warn!("password too short");
        return Err(ApiError::bad_request(format!(
            "Password must be at least {} characters",
            state.config.password_min_len
        )));
    }
    Ok(())
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let Json(payload) = payload?;
    let email = payload.email.trim();
    if !is_valid_email(email) {
        warn!(email, "invalid email");
        return Err(ApiError::bad_request("Invalid email"));
    }
    check_password_len(&state, &payload.password)?;
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Name is required"));
    }
    let role = payload.role.parse::<Role>()?;

    let user = state
        .auth
        .register_native(email, name, &payload.password, role)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".into(),
            user: PublicUser::from(&user),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(HeaderMap, Json<TokenResponse>), ApiError> {
    let Json(payload) = payload?;
    let email = payload.email.trim();
    if !is_valid_email(email) {
        warn!(email, "invalid email");
        return Err(ApiError::bad_request("Invalid email"));
    }

    // Unknown email and wrong password look the same to the client.
    let session = state
        .auth
        .authenticate_native(email, &payload.password)
        .await
        .map_err(|e| match e {
            AuthError::NotFound => AuthError::InvalidCredentials,
            other => other,
        })?;

    let mut headers = HeaderMap::new();
    let bearer = HeaderValue::from_str(&format!("Bearer {}", session.token))
        .map_err(|e| AuthError::Internal(e.into()))?;
    headers.insert(AUTHORIZATION, bearer);

    Ok((
        headers,
        Json(TokenResponse {
            token: session.token,
        }),
    ))
}

/// Tokens are stateless; the client drops its copy.
pub async fn logout() -> Json<MessageResponse> {
    Json(MessageResponse::new("Logged out successfully"))
}

#[instrument(skip(state))]
pub async fn google_login(State(state): State<AppState>) -> impl IntoResponse {
    let csrf = CsrfToken::new_random();
    let url = state.auth.provider().authorize_url(csrf.secret());

    let secure = if state.config.google.redirect_url.starts_with("https://") {
        "; Secure"
    } else {
        ""
    };
    let cookie = format!(
        "{STATE_COOKIE}={}; HttpOnly; Path=/; Max-Age=600; SameSite=Lax{secure}",
        csrf.secret()
    );

    ([(SET_COOKIE, cookie)], Redirect::temporary(&url))
}

fn state_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| {
            pair.trim()
                .strip_prefix(STATE_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
        })
}

#[instrument(skip(state, query, headers))]
pub async fn google_callback(
    State(state): State<AppState>,
    Query(query): Query<GoogleCallbackQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if let Some(err) = query.error {
        warn!(error = %err, "google sign-in aborted");
        return Err(ApiError::bad_request(format!("Google sign-in failed: {err}")));
    }
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::bad_request("Authorization code missing"))?;

    match (state_cookie(&headers), query.state.as_deref()) {
        (Some(expected), Some(got)) if !expected.is_empty() && expected == got => {}
        _ => {
            warn!("oauth state mismatch");
            return Err(ApiError::bad_request("Invalid OAuth state"));
        }
    }

    let session = state.auth.google_login(&code).await?;

    let redirect = url::Url::parse_with_params(
        &format!("{}/auth/callback", state.config.frontend_url),
        &[("token", session.token.as_str())],
    )
    .map_err(|e| AuthError::Internal(e.into()))?;

    info!(user_id = %session.user.id, "google sign-in complete");
    Ok((
        [
            (CACHE_CONTROL, "no-store, no-cache, must-revalidate, max-age=0"),
            (PRAGMA, "no-cache"),
            (EXPIRES, "0"),
            (SET_COOKIE, CLEAR_STATE_COOKIE),
        ],
        Redirect::temporary(redirect.as_str()),
    )
        .into_response())
}

#[instrument(skip(state, payload))]
pub async fn link_google(
    State(state): State<AppState>,
    payload: Result<Json<LinkGoogleRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(payload) = payload?;
    if payload.google_auth_code.trim().is_empty() {
        return Err(ApiError::bad_request("google_auth_code is required"));
    }
    state
        .auth
        .link_google_account(
            payload.email.trim(),
            &payload.password,
            payload.google_auth_code.trim(),
        )
        .await?;
    Ok(Json(MessageResponse::new("Google account linked successfully")))
}

pub async fn auth_status(user: Option<AuthUser>) -> Json<AuthStatusResponse> {
    match user {
        Some(AuthUser(claims)) => Json(AuthStatusResponse::authenticated(&claims)),
        None => Json(AuthStatusResponse::anonymous()),
    }
}

#[instrument(skip(state, claims), fields(user_id = %claims.sub))]
pub async fn get_profile(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<PublicUser>, ApiError> {
    let user = state.auth.profile(&claims).await?;
    Ok(Json(PublicUser::from(&user)))
}

#[instrument(skip(state, claims, payload), fields(user_id = %claims.sub))]
pub async fn set_password(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    payload: Result<Json<SetPasswordRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(payload) = payload?;
    check_password_len(&state, &payload.password)?;
    state.auth.set_password(&claims, &payload.password).await?;
    Ok(Json(MessageResponse::new("Password updated successfully")))
}
