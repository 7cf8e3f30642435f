//! API module
//!
//! Command/query ingress endpoints, session auth and CSRF middleware.

pub mod middleware;
pub mod routes;

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::images::ImageStorage;

pub use routes::create_router;

/// Shared state for request handlers and background workers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub images: Arc<dyn ImageStorage>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Arc<Config>, images: Arc<dyn ImageStorage>) -> Self {
        Self {
            pool,
            config,
            images,
        }
    }
}
