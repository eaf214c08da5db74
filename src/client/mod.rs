//! HTTP client core used by the CLI.
//!
//! [`SessionManager`] owns the credential state; [`BookingClient`] and
//! [`AdminClient`] route every call through it so bearer and anti-forgery
//! tokens are attached consistently. Every server answer is turned into a
//! `Result<T, Failure>`.

pub mod admin;
pub mod bookings;
pub mod session;
pub mod view;

pub use admin::AdminClient;
pub use bookings::BookingClient;
pub use session::{
    Credential, FileTokenStore, MemoryTokenStore, Session, SessionManager, TokenStore,
};
pub use view::{Ticket, ViewSequencer};

use anyhow::Context;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;

use crate::api::error::{ErrorBody, ErrorDetails};

/// Shown for every transport-level failure; the operation can be retried as is
pub const TRANSPORT_MESSAGE: &str = "Unable to reach the server. Please try again.";

/// Failure of a client operation, in terms a view can act on
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Failure {
    /// Network error, timeout or server fault
    #[error("{0}")]
    Transport(String),

    /// Missing, rejected or expired credentials
    #[error("{0}")]
    Authentication(String),

    /// Signed in but not allowed
    #[error("{0}")]
    Authorization(String),

    #[error("{message}")]
    Validation {
        message: String,
        fields: HashMap<String, Vec<String>>,
    },

    /// The requested slot already holds an active booking
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidTransition(String),

    #[error("{0}")]
    NotFound(String),

    /// No usable anti-forgery token could be obtained
    #[error("{0}")]
    AntiForgery(String),
}

impl Failure {
    pub fn transport() -> Self {
        Failure::Transport(TRANSPORT_MESSAGE.to_string())
    }

    pub fn not_logged_in() -> Self {
        Failure::Authentication("Please log in to continue".to_string())
    }

    /// Validation failure summarised the same way the server does
    pub fn validation(fields: HashMap<String, Vec<String>>) -> Self {
        let message = if fields.len() == 1 {
            fields
                .values()
                .next()
                .and_then(|v| v.first())
                .cloned()
                .unwrap_or_else(|| "Validation failed".to_string())
        } else {
            format!("Validation failed for {} fields", fields.len())
        };
        Failure::Validation { message, fields }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Failure::Conflict(_))
    }

    /// Whether repeating the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Failure::Transport(_) | Failure::AntiForgery(_))
    }
}

/// Thin wrapper over a reqwest client bound to one server
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    /// The client keeps cookies so the anti-forgery session id travels with
    /// every request.
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let http = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}{}", self.base_url, path))
    }

    /// Unauthenticated GET, used for the public catalog
    pub async fn get_public<T: DeserializeOwned>(&self, path: &str) -> Result<T, Failure> {
        decode(self.request(Method::GET, path).send().await).await
    }
}

/// Turn a send result into the decoded body or a [`Failure`]
pub(crate) async fn decode<T: DeserializeOwned>(
    sent: Result<reqwest::Response, reqwest::Error>,
) -> Result<T, Failure> {
    let response = sent.map_err(|err| {
        tracing::warn!(error = %err, "Request failed");
        Failure::transport()
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(failure_from(status, response.json::<ErrorBody>().await.ok()));
    }

    if status == StatusCode::NO_CONTENT {
        return serde_json::from_value(serde_json::Value::Null).map_err(|err| {
            tracing::warn!(error = %err, "Unexpected empty response");
            Failure::transport()
        });
    }

    response.json::<T>().await.map_err(|err| {
        tracing::warn!(error = %err, "Malformed response body");
        Failure::transport()
    })
}

/// Map an error status and body onto the failure taxonomy
pub(crate) fn failure_from(status: StatusCode, body: Option<ErrorBody>) -> Failure {
    let code = body.as_ref().map(|b| b.code.as_str()).unwrap_or_default();
    let message = body
        .as_ref()
        .map(|b| b.message.clone())
        .filter(|m| !m.is_empty());

    match status {
        StatusCode::CONFLICT if body.as_ref().and_then(|b| b.conflict) == Some(true) => {
            Failure::Conflict(message.unwrap_or_else(|| "This time slot is already booked".into()))
        }
        StatusCode::UNAUTHORIZED => {
            Failure::Authentication(message.unwrap_or_else(|| "Please log in to continue".into()))
        }
        StatusCode::FORBIDDEN if code == "csrf_invalid" => Failure::AntiForgery(
            message.unwrap_or_else(|| "Security token rejected. Please try again.".into()),
        ),
        StatusCode::FORBIDDEN => Failure::Authorization(
            message.unwrap_or_else(|| "You do not have permission to do that".into()),
        ),
        StatusCode::UNPROCESSABLE_ENTITY if code == "invalid_transition" => {
            Failure::InvalidTransition(message.unwrap_or_else(|| "Invalid status change".into()))
        }
        StatusCode::NOT_FOUND => Failure::NotFound(message.unwrap_or_else(|| "Not found".into())),
        StatusCode::TOO_MANY_REQUESTS => Failure::Transport(
            message.unwrap_or_else(|| TRANSPORT_MESSAGE.to_string()),
        ),
        s if s.is_client_error() => {
            let fields = match body.and_then(|b| b.details) {
                Some(ErrorDetails::ValidationErrors(fields)) => fields,
                _ => HashMap::new(),
            };
            Failure::Validation {
                message: message.unwrap_or_else(|| "The request was rejected".into()),
                fields,
            }
        }
        _ => Failure::transport(),
    }
}
