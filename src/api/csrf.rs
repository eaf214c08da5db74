//! Anti-forgery tokens.
//!
//! `GET /api/auth/csrf-token` binds a random session id to the caller through
//! the `dd_csrf` cookie and hands out a token for that id. Mutating endpoints
//! then require the token twice, in `x-csrf-token` and `x-session-csrf`, and
//! both must match a live token of the cookie's session id.
//!
//! A few recent tokens are kept per session id, so a client that fetched twice
//! in quick succession can use either answer.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;

use super::auth::generate_token;
use super::error::ApiError;
use crate::db::CsrfTokenResponse;
use crate::AppState;

pub const CSRF_COOKIE: &str = "dd_csrf";
pub const CSRF_HEADER: &str = "x-csrf-token";
pub const SESSION_CSRF_HEADER: &str = "x-session-csrf";

/// Tokens remembered per session id
const TOKENS_PER_SESSION: usize = 4;

#[derive(Debug, Clone)]
struct IssuedToken {
    token: String,
    issued_at: Instant,
}

/// In-memory registry of issued anti-forgery tokens
#[derive(Debug)]
pub struct CsrfStore {
    entries: DashMap<String, VecDeque<IssuedToken>>,
    ttl: Duration,
}

impl CsrfStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Issue a fresh token for `session_id`, evicting the oldest beyond the limit
    pub fn issue(&self, session_id: &str) -> String {
        let token = generate_token();
        let mut tokens = self.entries.entry(session_id.to_string()).or_default();
        tokens.push_back(IssuedToken {
            token: token.clone(),
            issued_at: Instant::now(),
        });
        while tokens.len() > TOKENS_PER_SESSION {
            tokens.pop_front();
        }
        token
    }

    /// Whether `token` is a live token of `session_id`
    pub fn verify(&self, session_id: &str, token: &str) -> bool {
        let Some(tokens) = self.entries.get(session_id) else {
            return false;
        };
        let now = Instant::now();
        let provided = token.as_bytes();

        // Compare against every live token so timing does not reveal which matched
        tokens
            .iter()
            .filter(|issued| now.duration_since(issued.issued_at) < self.ttl)
            .fold(false, |found, issued| {
                let expected = issued.token.as_bytes();
                let matches =
                    expected.len() == provided.len() && bool::from(expected.ct_eq(provided));
                found | matches
            })
    }

    /// Drop expired tokens and empty sessions
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let ttl = self.ttl;
        self.entries.retain(|_, tokens| {
            tokens.retain(|issued| now.duration_since(issued.issued_at) < ttl);
            !tokens.is_empty()
        });
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// Issue an anti-forgery token, creating the session cookie on first use
pub async fn csrf_token(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> (CookieJar, Json<CsrfTokenResponse>) {
    let existing = jar.get(CSRF_COOKIE).map(|c| c.value().to_string());
    let (jar, session_id) = match existing {
        Some(session_id) if !session_id.is_empty() => (jar, session_id),
        _ => {
            let session_id = uuid::Uuid::new_v4().to_string();
            let cookie = Cookie::build((CSRF_COOKIE, session_id.clone()))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Strict)
                .secure(state.config.auth.secure_cookies)
                .build();
            (jar.add(cookie), session_id)
        }
    };

    let csrf_token = state.csrf.issue(&session_id);
    (jar, Json(CsrfTokenResponse { csrf_token }))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Reject mutating requests that do not carry a valid anti-forgery token
pub async fn require_csrf(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = request.headers();
    let token = header(headers, CSRF_HEADER);
    let session_token = header(headers, SESSION_CSRF_HEADER);
    let session_id = jar.get(CSRF_COOKIE).map(|c| c.value().to_string());

    let valid = match (token, session_token, session_id) {
        (Some(token), Some(session_token), Some(session_id)) => {
            token == session_token && state.csrf.verify(&session_id, token)
        }
        _ => false,
    };

    if !valid {
        tracing::debug!(path = %request.uri().path(), "Rejected request with invalid anti-forgery token");
        return Err(ApiError::csrf_invalid("Invalid or missing CSRF token"));
    }

    Ok(next.run(request).await)
}

/// Spawn a background task that periodically drops expired tokens
pub fn spawn_cleanup_task(store: Arc<CsrfStore>, cleanup_interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(cleanup_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            store.cleanup_expired();
            tracing::debug!(
                "Anti-forgery cleanup complete, {} sessions remaining",
                store.entry_count()
            );
        }
    });
}
