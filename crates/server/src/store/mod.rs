//! Request store: durable card state with an in-memory cache.
//!
//! # Consistency
//!
//! Every write goes to the durable backend first and only then to the cache,
//! all under one writer lock, so concurrent increments on the same key are
//! never lost and a failed durable write leaves the cache untouched. Cache
//! hits are lock-free; a miss rehydrates from the backend under the writer
//! lock so a stale durable read cannot overwrite a newer cached write.
//!
//! The cache is bounded. An evicted entry is simply reloaded on next access.

mod file;
mod postgres;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chatops_core::{CardState, ReleaseRequest, RequestId};
use moka::future::Cache;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, instrument, warn};

use crate::db::RepositoryError;

pub use file::FileCardStateBackend;
pub use postgres::PgCardStateBackend;

/// Errors that can occur while persisting card state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `PostgreSQL` backend failed.
    #[error("card state repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// File backend failed.
    #[error("card state file error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stored document could not be encoded or decoded.
    #[error("card state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The id cannot be used as a storage key by this backend.
    #[error("invalid request id: {0}")]
    InvalidId(String),
}

/// Result of [`RequestStore::try_disable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisableOutcome {
    /// This call disabled the button.
    Disabled,
    /// The button was already disabled.
    AlreadyDisabled,
    /// No state is stored under the id.
    NotFound,
}

/// Durable storage for card state.
#[async_trait]
pub trait CardStateBackend: Send + Sync {
    /// Load the state for `id`, `None` if absent.
    async fn load(&self, id: &RequestId) -> Result<Option<CardState>, StoreError>;

    /// Insert or overwrite the state for `id`.
    async fn save(&self, id: &RequestId, state: &CardState) -> Result<(), StoreError>;

    /// Remove the state for `id`. Removing an absent id succeeds.
    async fn delete(&self, id: &RequestId) -> Result<(), StoreError>;
}

/// Shared, cheaply cloneable handle to the card state store.
#[derive(Clone)]
pub struct RequestStore {
    inner: Arc<RequestStoreInner>,
}

struct RequestStoreInner {
    cache: Cache<RequestId, Arc<CardState>>,
    backend: Arc<dyn CardStateBackend>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for RequestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestStore")
            .field("cached_entries", &self.inner.cache.entry_count())
            .finish_non_exhaustive()
    }
}

impl RequestStore {
    /// Create a store over `backend` caching at most `cache_capacity` states.
    #[must_use]
    pub fn new(backend: Arc<dyn CardStateBackend>, cache_capacity: u64) -> Self {
        Self {
            inner: Arc::new(RequestStoreInner {
                cache: Cache::new(cache_capacity),
                backend,
                write_lock: Mutex::new(()),
            }),
        }
    }

    /// Create fresh state for `id`, replacing anything stored under it.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the durable write fails; the cache is then
    /// left unchanged.
    #[instrument(skip(self, request), fields(request_id = %id))]
    pub async fn save(&self, id: &RequestId, request: ReleaseRequest) -> Result<(), StoreError> {
        let state = CardState::new(request);

        let _guard = self.inner.write_lock.lock().await;
        self.inner.backend.save(id, &state).await?;
        self.inner.cache.insert(id.clone(), Arc::new(state)).await;

        debug!("Card state saved");
        Ok(())
    }

    /// Fetch the state for `id`, rehydrating from durable storage on a cache
    /// miss. Backend failures are logged and reported as not found.
    pub async fn get(&self, id: &RequestId) -> Option<CardState> {
        if let Some(state) = self.inner.cache.get(id).await {
            return Some(CardState::clone(&state));
        }

        let _guard = self.inner.write_lock.lock().await;
        match self.load_locked(id).await {
            Ok(state) => state.map(|s| CardState::clone(&s)),
            Err(e) => {
                error!(request_id = %id, error = %e, "Failed to load card state");
                None
            }
        }
    }

    /// Disable a button. Unknown ids are logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the durable write fails.
    #[instrument(skip(self), fields(request_id = %id))]
    pub async fn mark_action_disabled(
        &self,
        id: &RequestId,
        service: &str,
        action: &str,
    ) -> Result<(), StoreError> {
        let updated = self.update(id, |state| state.disable(service, action)).await?;
        if updated.is_none() {
            warn!("Cannot disable action: request not found");
        }
        Ok(())
    }

    /// Disable a button unless it already is, as one step under the writer
    /// lock. Concurrent callers for the same button see exactly one
    /// [`DisableOutcome::Disabled`].
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the durable write fails.
    #[instrument(skip(self), fields(request_id = %id))]
    pub async fn try_disable(
        &self,
        id: &RequestId,
        service: &str,
        action: &str,
    ) -> Result<DisableOutcome, StoreError> {
        let mut outcome = DisableOutcome::NotFound;
        self.update(id, |state| {
            outcome = if state.is_disabled(service, action) {
                DisableOutcome::AlreadyDisabled
            } else {
                state.disable(service, action);
                DisableOutcome::Disabled
            };
        })
        .await?;
        Ok(outcome)
    }

    /// Add one click to a button's counter. Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the durable write fails.
    #[instrument(skip(self), fields(request_id = %id))]
    pub async fn increment_action_count(
        &self,
        id: &RequestId,
        service: &str,
        action: &str,
    ) -> Result<(), StoreError> {
        let updated = self
            .update(id, |state| {
                state.increment(service, action);
            })
            .await?;
        if updated.is_none() {
            debug!("Cannot count action: request not found");
        }
        Ok(())
    }

    /// Click count of a button, 0 when the request or key is unknown.
    pub async fn get_action_count(&self, id: &RequestId, service: &str, action: &str) -> u32 {
        self.get(id)
            .await
            .map_or(0, |state| state.count(service, action))
    }

    /// Whether a button is disabled, false when the request is unknown.
    pub async fn is_action_disabled(&self, id: &RequestId, service: &str, action: &str) -> bool {
        self.get(id)
            .await
            .is_some_and(|state| state.is_disabled(service, action))
    }

    /// Remove the state for `id` from durable storage and the cache.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the durable delete fails.
    #[instrument(skip(self), fields(request_id = %id))]
    pub async fn delete(&self, id: &RequestId) -> Result<(), StoreError> {
        let _guard = self.inner.write_lock.lock().await;
        self.inner.backend.delete(id).await?;
        self.inner.cache.invalidate(id).await;
        Ok(())
    }

    /// Read-modify-write under the writer lock. Returns `None` for unknown ids.
    async fn update<F>(&self, id: &RequestId, mutate: F) -> Result<Option<CardState>, StoreError>
    where
        F: FnOnce(&mut CardState) + Send,
    {
        let _guard = self.inner.write_lock.lock().await;
        let Some(current) = self.load_locked(id).await? else {
            return Ok(None);
        };

        let mut next = CardState::clone(&current);
        mutate(&mut next);
        if next == *current {
            return Ok(Some(next));
        }

        self.inner.backend.save(id, &next).await?;
        self.inner
            .cache
            .insert(id.clone(), Arc::new(next.clone()))
            .await;
        Ok(Some(next))
    }

    /// Cache lookup falling back to the backend. Caller holds the writer lock.
    async fn load_locked(&self, id: &RequestId) -> Result<Option<Arc<CardState>>, StoreError> {
        if let Some(state) = self.inner.cache.get(id).await {
            return Ok(Some(state));
        }

        let Some(state) = self.inner.backend.load(id).await? else {
            return Ok(None);
        };

        debug!(request_id = %id, "Card state rehydrated from durable storage");
        let state = Arc::new(state);
        self.inner.cache.insert(id.clone(), Arc::clone(&state)).await;
        Ok(Some(state))
    }
}
