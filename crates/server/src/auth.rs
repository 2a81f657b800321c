use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use axum::extract::{Request, State};
use axum::http::{HeaderValue, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use mediatrend_core::error::ApiError;
use password_hash::rand_core::OsRng;
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::state::AppState;

/// Hash a password into an argon2 PHC string.
pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Whether `value` is already a PHC hash rather than a plaintext password.
pub fn is_password_hash(value: &str) -> bool {
    PasswordHash::new(value).is_ok()
}

/// Decode an `Authorization: Basic ...` header into username and password.
pub fn parse_basic(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Middleware enforcing HTTP Basic credentials when `auth.enabled` is set.
pub async fn require_basic_auth(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let auth = state.config.auth().await;
    if !auth.enabled {
        return next.run(req).await;
    }

    let credentials = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_basic);

    let Some((username, password)) = credentials else {
        return challenge("missing credentials");
    };

    let user_ok: bool = username
        .as_bytes()
        .ct_eq(auth.username.as_bytes())
        .into();
    let hash = auth.password;
    let pass_ok = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .unwrap_or(false);

    if user_ok && pass_ok {
        next.run(req).await
    } else {
        tracing::warn!(username = %username, "rejected basic auth credentials");
        challenge("invalid credentials")
    }
}

fn challenge(message: &str) -> Response {
    let mut resp = AppError(ApiError::Unauthorized(message.into())).into_response();
    resp.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"mediatrend\""),
    );
    resp
}
