//! HTTP Basic authentication for the status endpoints

use super::Credentials;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::Arc;

const UNAUTHORIZED_BODY: &str = "401 Unauthorized";

/// Rejects requests whose Basic credentials don't exactly match the
/// configured pair. Stateless: every request is checked on its own.
#[derive(Debug, Clone)]
pub struct BasicAuthGate {
    credentials: Credentials,
    challenge: HeaderValue,
}

impl BasicAuthGate {
    pub fn new(realm: &str, credentials: Credentials) -> Self {
        let challenge = HeaderValue::from_str(&format!("Basic realm=\"{}\"", realm))
            .unwrap_or_else(|_| HeaderValue::from_static("Basic"));
        Self {
            credentials,
            challenge,
        }
    }

    /// Guard every route already added to `router`
    ///
    /// Routes added after wrapping are not guarded.
    pub fn wrap<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.route_layer(middleware::from_fn_with_state(
            Arc::new(self),
            require_basic_auth,
        ))
    }

    /// Whether `headers` carry exactly the configured credentials
    pub fn authorize(&self, headers: &HeaderMap) -> bool {
        match basic_credentials(headers) {
            Some((username, password)) => {
                username == self.credentials.username && password == self.credentials.password
            }
            None => false,
        }
    }

    /// The 401 response sent on failure
    pub fn challenge(&self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, self.challenge.clone())],
            UNAUTHORIZED_BODY,
        )
            .into_response()
    }
}

async fn require_basic_auth(
    State(gate): State<Arc<BasicAuthGate>>,
    request: Request,
    next: Next,
) -> Response {
    if gate.authorize(request.headers()) {
        next.run(request).await
    } else {
        gate.challenge()
    }
}

/// Decode `Authorization: Basic <base64(user:pass)>`
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
