// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod budget;
pub mod campaign;
pub mod config;
pub mod engine;
pub mod error;
pub mod factcheck;
pub mod feed;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod oracle;
pub mod reconcile;
pub mod retry;
pub mod scoring;
pub mod selector;
pub mod store;

use std::sync::Arc;

use axum::Router;

pub use crate::api::create_router;
pub use crate::engine::CurationEngine;
pub use crate::error::{CurationError, Result};

/// Build the full HTTP app from config files and the environment.
/// `/metrics` is mounted when a Prometheus handle is supplied.
pub fn app(metrics: Option<&metrics::Metrics>) -> anyhow::Result<Router> {
    let engine = Arc::new(CurationEngine::from_env()?);
    let router = create_router(api::AppState::from_env(engine));
    Ok(match metrics {
        Some(m) => router.merge(m.router()),
        None => router,
    })
}
