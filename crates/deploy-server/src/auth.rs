//! HTTP Basic authentication for a single credential pair

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::AppState;

/// Identity of the caller that passed authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing credentials")]
    Missing,

    #[error("Malformed Authorization header")]
    Malformed,

    #[error("Invalid credentials")]
    Invalid,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    username: String,
    password: String,
    realm: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            realm: realm.into(),
        }
    }

    /// Check the `Authorization` header, returning the user name
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AuthenticatedUser, AuthError> {
        let value = headers
            .get(header::AUTHORIZATION)
            .ok_or(AuthError::Missing)?
            .to_str()
            .map_err(|_| AuthError::Malformed)?;

        let (user, password) = parse_basic(value)?;

        // Evaluate both comparisons so timing does not reveal which failed
        let user_ok = constant_time_eq(user.as_bytes(), self.username.as_bytes());
        let password_ok = constant_time_eq(password.as_bytes(), self.password.as_bytes());

        if user_ok & password_ok {
            Ok(AuthenticatedUser(user))
        } else {
            Err(AuthError::Invalid)
        }
    }
}

/// Decode `Basic <base64(user:password)>`
fn parse_basic(value: &str) -> Result<(String, String), AuthError> {
    let (scheme, encoded) = value.trim().split_once(' ').ok_or(AuthError::Malformed)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(AuthError::Malformed);
    }

    let decoded = BASE64
        .decode(encoded.trim())
        .map_err(|_| AuthError::Malformed)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthError::Malformed)?;
    let (user, password) = decoded.split_once(':').ok_or(AuthError::Malformed)?;

    Ok((user.to_string(), password.to_string()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Middleware rejecting requests without valid credentials
pub async fn require_basic_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    match state.credentials.authenticate(request.headers()) {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => {
            debug!("Rejected {} {}: {}", request.method(), request.uri().path(), e);
            unauthorized(&state.credentials, e)
        }
    }
}

fn unauthorized(credentials: &Credentials, err: AuthError) -> Response {
    let challenge = HeaderValue::from_str(&format!("Basic realm=\"{}\"", credentials.realm))
        .unwrap_or_else(|_| HeaderValue::from_static("Basic"));

    let body = serde_json::json!({ "error": err.to_string() });
    let mut response = (StatusCode::UNAUTHORIZED, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, challenge);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn basic(user: &str, password: &str) -> String {
        format!("Basic {}", BASE64.encode(format!("{}:{}", user, password)))
    }

    #[test]
    fn test_valid_credentials() {
        let creds = Credentials::new("admin", "s3cret:with:colons", "test");

        let user = creds
            .authenticate(&headers_with(&basic("admin", "s3cret:with:colons")))
            .unwrap();
        assert_eq!(user, AuthenticatedUser("admin".to_string()));
    }

    #[test]
    fn test_rejections() {
        let creds = Credentials::new("admin", "secret", "test");

        assert_eq!(creds.authenticate(&HeaderMap::new()), Err(AuthError::Missing));
        assert_eq!(
            creds.authenticate(&headers_with(&basic("admin", "wrong"))),
            Err(AuthError::Invalid)
        );
        assert_eq!(
            creds.authenticate(&headers_with(&basic("root", "secret"))),
            Err(AuthError::Invalid)
        );
        assert_eq!(
            creds.authenticate(&headers_with("Bearer abc")),
            Err(AuthError::Malformed)
        );
        assert_eq!(
            creds.authenticate(&headers_with("Basic !!!")),
            Err(AuthError::Malformed)
        );
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        let creds = Credentials::new("admin", "secret", "test");
        let header = basic("admin", "secret").replacen("Basic", "basic", 1);

        assert!(creds.authenticate(&headers_with(&header)).is_ok());
    }
}
