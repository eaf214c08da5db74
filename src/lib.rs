pub mod api;
pub mod booking;
pub mod cli;
pub mod client;
pub mod config;
pub mod db;
pub mod policy;
pub mod utils;

pub use db::DbPool;

use config::Config;
use std::sync::Arc;
use std::time::Duration;

use crate::api::csrf::CsrfStore;
use crate::api::rate_limit::RateLimiter;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub rate_limiter: Arc<RateLimiter>,
    pub csrf: Arc<CsrfStore>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let csrf = Arc::new(CsrfStore::new(Duration::from_secs(
            config.auth.csrf_ttl_seconds,
        )));
        Self {
            config,
            db,
            rate_limiter,
            csrf,
        }
    }
}
