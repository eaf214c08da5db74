//! Credential and session management.
//!
//! The manager is the only writer of the [`Session`]. Readers take cheap
//! snapshots; every change publishes a new immutable value through
//! `ArcSwap::rcu`. Each credential change bumps the session generation, and a
//! response is applied only if the generation it started under is still
//! current, so a lookup that finishes after a logout cannot resurrect the
//! session.

use anyhow::Context;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{decode, ApiClient, Failure};
use crate::api::csrf::{CSRF_HEADER, SESSION_CSRF_HEADER};
use crate::db::{
    CsrfTokenResponse, LoginRequest, LoginResponse, RegisterRequest, UpdateProfileRequest,
    UserResponse,
};
use crate::policy::AccessContext;

/// Where the bearer credential stands
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Credential {
    #[default]
    Anonymous,
    /// A persisted token is being exchanged for the profile
    Resolving { bearer_token: String },
    Authenticated {
        bearer_token: String,
        identity: UserResponse,
    },
}

/// Immutable snapshot of the client session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub credential: Credential,
    /// Required on every mutating request; never persisted
    pub anti_forgery_token: Option<String>,
    pub generation: u64,
}

impl Session {
    pub fn bearer_token(&self) -> Option<&str> {
        match &self.credential {
            Credential::Anonymous => None,
            Credential::Resolving { bearer_token }
            | Credential::Authenticated { bearer_token, .. } => Some(bearer_token),
        }
    }

    pub fn identity(&self) -> Option<&UserResponse> {
        match &self.credential {
            Credential::Authenticated { identity, .. } => Some(identity),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.credential, Credential::Resolving { .. })
    }

    pub fn access_context(&self) -> AccessContext {
        match &self.credential {
            Credential::Anonymous => AccessContext::Anonymous,
            Credential::Resolving { .. } => AccessContext::Loading,
            Credential::Authenticated { identity, .. } => AccessContext::Authenticated(identity.role),
        }
    }
}

/// Persistence for the bearer token between runs
pub trait TokenStore: Send + Sync {
    fn load(&self) -> anyhow::Result<Option<String>>;
    fn save(&self, token: &str) -> anyhow::Result<()>;
    fn clear(&self) -> anyhow::Result<()>;
}

/// Bearer token kept in a file
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> anyhow::Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let token = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read token file: {}", self.path.display()))?;
        let token = token.trim();
        Ok((!token.is_empty()).then(|| token.to_string()))
    }

    fn save(&self, token: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            crate::utils::ensure_dir(parent)?;
        }
        std::fs::write(&self.path, token)
            .with_context(|| format!("Failed to write token file: {}", self.path.display()))
    }

    fn clear(&self) -> anyhow::Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove token file: {}", self.path.display()))?;
        }
        Ok(())
    }
}

/// Bearer token kept in memory only
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> anyhow::Result<Option<String>> {
        Ok(self.token.lock().clone())
    }

    fn save(&self, token: &str) -> anyhow::Result<()> {
        *self.token.lock() = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        *self.token.lock() = None;
        Ok(())
    }
}

/// Body type for calls that send none
pub(crate) const NO_BODY: Option<&()> = None;

pub struct SessionManager {
    api: ApiClient,
    store: Arc<dyn TokenStore>,
    session: ArcSwap<Session>,
}

impl SessionManager {
    pub fn new(api: ApiClient, store: Arc<dyn TokenStore>) -> Self {
        Self {
            api,
            store,
            session: ArcSwap::from_pointee(Session::default()),
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn snapshot(&self) -> Arc<Session> {
        self.session.load_full()
    }

    /// Publish `update(current)` only if no credential change happened since
    /// `generation`. Returns whether it was applied.
    fn publish_if(&self, generation: u64, update: impl Fn(&Session) -> Session) -> bool {
        let mut applied = false;
        self.session.rcu(|current| {
            applied = current.generation == generation;
            if applied {
                Arc::new(update(&**current))
            } else {
                Arc::clone(current)
            }
        });
        applied
    }

    /// Replace the credential, starting a new generation
    fn replace_credential(&self, credential: Credential, keep_anti_forgery: bool) {
        self.session.rcu(|current| Session {
            credential: credential.clone(),
            anti_forgery_token: if keep_anti_forgery {
                current.anti_forgery_token.clone()
            } else {
                None
            },
            generation: current.generation + 1,
        });
    }

    /// Start-up path: resolve a persisted bearer token, if any
    pub async fn restore(&self) -> Result<Option<UserResponse>, Failure> {
        let token = self.store.load().unwrap_or_else(|err| {
            warn!(error = %err, "Could not read persisted credential");
            None
        });
        let Some(bearer_token) = token else {
            return Ok(None);
        };

        self.replace_credential(Credential::Resolving { bearer_token }, true);
        self.current_identity().await.map(Some)
    }

    /// Fetch a fresh anti-forgery token. The last response to arrive wins.
    pub async fn fetch_anti_forgery_token(&self) -> Result<String, Failure> {
        let generation = self.snapshot().generation;
        let response: CsrfTokenResponse = decode(
            self.api
                .request(Method::GET, "/api/auth/csrf-token")
                .send()
                .await,
        )
        .await?;

        let token = response.csrf_token;
        if !self.publish_if(generation, |current| Session {
            anti_forgery_token: Some(token.clone()),
            ..current.clone()
        }) {
            debug!("Discarding anti-forgery token fetched before a session change");
        }
        Ok(token)
    }

    /// The current anti-forgery token, fetching one when missing
    pub async fn ensure_anti_forgery_token(&self) -> Result<String, Failure> {
        if let Some(token) = self.snapshot().anti_forgery_token.clone() {
            return Ok(token);
        }
        self.fetch_anti_forgery_token().await.map_err(|failure| {
            warn!(%failure, "Could not obtain anti-forgery token");
            match failure {
                Failure::Transport(_) => failure,
                _ => Failure::AntiForgery(
                    "Unable to obtain a security token. Please try again.".to_string(),
                ),
            }
        })
    }

    /// Forget `stale` unless a newer token already replaced it
    fn drop_anti_forgery_token(&self, stale: &str) {
        self.session.rcu(|current| {
            if current.anti_forgery_token.as_deref() == Some(stale) {
                Arc::new(Session {
                    anti_forgery_token: None,
                    ..Session::clone(current)
                })
            } else {
                Arc::clone(current)
            }
        });
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<UserResponse, Failure> {
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response: LoginResponse = self
            .mutate(Method::POST, "/api/auth/login", Some(&request), false)
            .await?;
        Ok(self.establish(response))
    }

    pub async fn register(&self, registration: &RegisterRequest) -> Result<UserResponse, Failure> {
        let response: LoginResponse = self
            .mutate(Method::POST, "/api/auth/register", Some(registration), false)
            .await?;
        Ok(self.establish(response))
    }

    fn establish(&self, response: LoginResponse) -> UserResponse {
        if let Err(err) = self.store.save(&response.token) {
            warn!(error = %err, "Could not persist credential");
        }
        let identity = response.user;
        info!(user_id = %identity.id, role = %identity.role, "Session established");
        self.replace_credential(
            Credential::Authenticated {
                bearer_token: response.token,
                identity: identity.clone(),
            },
            true,
        );
        identity
    }

    /// End the session locally. Safe to call any number of times.
    pub fn logout(&self) {
        self.replace_credential(Credential::Anonymous, false);
        if let Err(err) = self.store.clear() {
            warn!(error = %err, "Could not clear persisted credential");
        }
        debug!("Session cleared");
    }

    /// Drop the session because the server no longer accepts its token, but
    /// only if the session has not changed since `generation`
    fn invalidate_from(&self, generation: u64) {
        let cleared = self.publish_if(generation, |_| Session {
            credential: Credential::Anonymous,
            anti_forgery_token: None,
            generation: generation + 1,
        });
        if cleared {
            info!("Session rejected by server, signing out");
            if let Err(err) = self.store.clear() {
                warn!(error = %err, "Could not clear persisted credential");
            }
        }
    }

    /// Resolve the profile behind the bearer token. Any failure ends the session.
    pub async fn current_identity(&self) -> Result<UserResponse, Failure> {
        let snapshot = self.snapshot();
        let Some(bearer_token) = snapshot.bearer_token() else {
            return Err(Failure::not_logged_in());
        };
        let generation = snapshot.generation;

        let result: Result<UserResponse, Failure> = decode(
            self.api
                .request(Method::GET, "/api/auth/me")
                .bearer_auth(bearer_token)
                .send()
                .await,
        )
        .await;

        match result {
            Ok(identity) => {
                let applied = self.publish_if(generation, |current| Session {
                    credential: Credential::Authenticated {
                        bearer_token: bearer_token.to_string(),
                        identity: identity.clone(),
                    },
                    ..current.clone()
                });
                if applied {
                    Ok(identity)
                } else {
                    debug!("Discarding profile fetched before a session change");
                    Err(Failure::Authentication("The session has ended".to_string()))
                }
            }
            Err(failure) => {
                self.invalidate_from(generation);
                Err(failure)
            }
        }
    }

    pub async fn update_profile(&self, fields: &UpdateProfileRequest) -> Result<UserResponse, Failure> {
        let generation = self.snapshot().generation;
        let identity: UserResponse = self
            .mutate(Method::PUT, "/api/auth/profile", Some(fields), true)
            .await?;

        self.publish_if(generation, |current| match &current.credential {
            Credential::Authenticated { bearer_token, .. } => Session {
                credential: Credential::Authenticated {
                    bearer_token: bearer_token.clone(),
                    identity: identity.clone(),
                },
                ..current.clone()
            },
            _ => current.clone(),
        });
        Ok(identity)
    }

    /// Authorized GET; a 401 ends the session
    pub(crate) async fn get_authorized<T: DeserializeOwned>(&self, path: &str) -> Result<T, Failure> {
        let snapshot = self.snapshot();
        let bearer_token = snapshot.bearer_token().ok_or_else(Failure::not_logged_in)?;

        let result = decode(
            self.api
                .request(Method::GET, path)
                .bearer_auth(bearer_token)
                .send()
                .await,
        )
        .await;

        if let Err(Failure::Authentication(_)) = &result {
            self.invalidate_from(snapshot.generation);
        }
        result
    }

    /// State-changing request carrying the anti-forgery token.
    ///
    /// A token the server no longer accepts is dropped, re-fetched and the
    /// request retried once. With `authorized`, the bearer token is attached
    /// and a 401 ends the session.
    pub(crate) async fn mutate<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        authorized: bool,
    ) -> Result<T, Failure>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let snapshot = self.snapshot();
        let bearer_token = if authorized {
            Some(snapshot.bearer_token().ok_or_else(Failure::not_logged_in)?)
        } else {
            None
        };

        let mut retried = false;
        loop {
            let csrf = self.ensure_anti_forgery_token().await?;

            let mut request = self
                .api
                .request(method.clone(), path)
                .header(CSRF_HEADER, &csrf)
                .header(SESSION_CSRF_HEADER, &csrf);
            if let Some(token) = bearer_token {
                request = request.bearer_auth(token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            match decode(request.send().await).await {
                Err(Failure::AntiForgery(_)) if !retried => {
                    debug!(path, "Anti-forgery token rejected, refreshing");
                    retried = true;
                    self.drop_anti_forgery_token(&csrf);
                }
                Err(Failure::Authentication(message)) if authorized => {
                    self.invalidate_from(snapshot.generation);
                    return Err(Failure::Authentication(message));
                }
                other => return other,
            }
        }
    }
}
