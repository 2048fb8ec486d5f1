//! Anonymous user tracking for the consumer endpoint.
//!
//! Every request gets a stable user id: the one carried in the tracking
//! cookie, or a fresh UUID. The id is made available to handlers as a
//! [`UserId`] extension and echoed back in `Set-Cookie` on every response.

use axum::extract::{Request, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;
use uuid::Uuid;

use frontgrid_core::config::ConsumerConfig;

/// Stable per-user identifier, inserted into request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

#[derive(Debug, Clone)]
pub struct UserTracking {
    pub cookie_name: String,
    /// Appended verbatim after the cookie value.
    pub cookie_settings: Option<String>,
}

impl From<&ConsumerConfig> for UserTracking {
    fn from(config: &ConsumerConfig) -> Self {
        Self {
            cookie_name: config.cookie_name.clone(),
            cookie_settings: config.cookie_settings.clone(),
        }
    }
}

impl UserTracking {
    fn set_cookie(&self, user_id: &str) -> String {
        match &self.cookie_settings {
            Some(settings) => format!("{}={user_id}; {settings}", self.cookie_name),
            None => format!("{}={user_id}", self.cookie_name),
        }
    }
}

/// Middleware: resolve the user id before the handler, set the cookie after.
pub async fn track_user(
    State(tracking): State<UserTracking>,
    mut request: Request,
    next: Next,
) -> Response {
    let user_id = read_cookie(request.headers(), &tracking.cookie_name)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    request.extensions_mut().insert(UserId(user_id.clone()));

    let mut response = next.run(request).await;
    match HeaderValue::from_str(&tracking.set_cookie(&user_id)) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(e) => warn!(error = %e, "user id cannot be sent back as a cookie"),
    }
    response
}

/// Value of cookie `name` across all `Cookie` headers, if present and non-empty.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}
