//! Model validation and default selection.
//!
//! The backend's model list is cached for a fixed TTL behind an `RwLock`.
//! The lock is never held across the network fetch: a miss fetches without
//! the lock and then stores the result, so concurrent refreshes resolve as
//! last-writer-wins.
//!
//! When the backend cannot be reached the validator degrades instead of
//! failing: the available list becomes `["default"]`, nothing is cached,
//! and every name validates.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use super::backend::CompletionBackend;
use super::errors::InferenceError;
use super::types::ModelEntry;

/// Sentinel meaning "whatever the caller's configured default is".
pub const DEFAULT_MODEL: &str = "default";

/// Default cache lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CacheEntry {
    models: Vec<ModelEntry>,
    fetched_at: Instant,
}

/// Result of asking the backend for its models.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelListing {
    Live(Vec<ModelEntry>),
    /// Backend unreachable; carries the reason.
    Degraded(String),
}

impl ModelListing {
    /// Model ids, or `["default"]` when degraded.
    pub fn ids(&self) -> Vec<String> {
        match self {
            ModelListing::Live(models) => models.iter().map(|m| m.id.clone()).collect(),
            ModelListing::Degraded(_) => vec![DEFAULT_MODEL.to_string()],
        }
    }
}

/// Validates model names against the backend, with a TTL cache.
pub struct ModelValidator {
    backend: Arc<dyn CompletionBackend>,
    ttl: Duration,
    cache: RwLock<Option<CacheEntry>>,
}

impl ModelValidator {
    pub fn new(backend: Arc<dyn CompletionBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            cache: RwLock::new(None),
        }
    }

    /// Drop the cached list; the next call refetches.
    pub fn clear_cache(&self) {
        *self.cache.write().unwrap_or_else(|p| p.into_inner()) = None;
    }

    /// Whether a fresh list is cached.
    pub fn is_cached(&self) -> bool {
        self.cached().is_some()
    }

    fn cached(&self) -> Option<Vec<ModelEntry>> {
        let guard = self.cache.read().unwrap_or_else(|p| p.into_inner());
        guard
            .as_ref()
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.models.clone())
    }

    /// The backend's models, from cache when fresh.
    pub async fn listing(&self) -> ModelListing {
        if let Some(models) = self.cached() {
            return ModelListing::Live(models);
        }

        match self.backend.list_models().await {
            Ok(models) => {
                tracing::debug!(count = models.len(), "refreshed model list");
                *self.cache.write().unwrap_or_else(|p| p.into_inner()) = Some(CacheEntry {
                    models: models.clone(),
                    fetched_at: Instant::now(),
                });
                ModelListing::Live(models)
            }
            Err(e) => {
                tracing::warn!(error = %e, "model list unavailable, validation degraded");
                ModelListing::Degraded(e.to_string())
            }
        }
    }

    /// Available model ids; `["default"]` when the backend is unreachable.
    pub async fn get_available_models(&self) -> Vec<String> {
        self.listing().await.ids()
    }

    /// Check that `model` is served by the backend.
    ///
    /// `None` and `"default"` always pass.
    pub async fn validate(&self, model: Option<&str>) -> Result<(), InferenceError> {
        let Some(name) = model.filter(|m| !is_default(m)) else {
            return Ok(());
        };

        match self.listing().await {
            ModelListing::Degraded(_) => Ok(()),
            ModelListing::Live(models) if models.iter().any(|m| m.id == name) => Ok(()),
            ModelListing::Live(models) => Err(InferenceError::ModelNotFound {
                model: name.to_string(),
                available: models.into_iter().map(|m| m.id).collect(),
            }),
        }
    }

    /// First model that is not embedding-only.
    pub async fn auto_select(&self) -> Option<String> {
        match self.listing().await {
            ModelListing::Live(models) => models
                .into_iter()
                .find(|m| !m.is_embedding())
                .map(|m| m.id),
            ModelListing::Degraded(_) => None,
        }
    }

    /// Resolve the model to send, once per orchestration call.
    ///
    /// An explicit name is validated. Otherwise the configured default is
    /// used, then auto-selection, then the `"default"` sentinel.
    pub async fn resolve(
        &self,
        requested: Option<&str>,
        configured_default: Option<&str>,
    ) -> Result<String, InferenceError> {
        if let Some(name) = requested.filter(|m| !is_default(m)) {
            self.validate(Some(name)).await?;
            return Ok(name.to_string());
        }

        if let Some(name) = configured_default.filter(|m| !is_default(m)) {
            return Ok(name.to_string());
        }

        match self.auto_select().await {
            Some(name) => {
                tracing::info!(model = %name, "auto-selected model");
                Ok(name)
            }
            None => Ok(DEFAULT_MODEL.to_string()),
        }
    }
}

fn is_default(name: &str) -> bool {
    name.trim().is_empty() || name.eq_ignore_ascii_case(DEFAULT_MODEL)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
