use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::warn;
use ulid::Ulid;
use uuid::Uuid;

use crate::collab::{Catalog, Directory};
use crate::engine::{Engine, EngineError};
use crate::limits::MAX_PROVIDERS;
use crate::notify::NotifyHub;
use crate::reaper;

/// Manages per-provider engines. Each provider gets its own engine, WAL
/// file, and maintenance task; calendars of different providers never share
/// any state.
pub struct ProviderManager {
    engines: DashMap<Ulid, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    catalog: Arc<dyn Catalog>,
    directory: Arc<dyn Directory>,
}

impl ProviderManager {
    pub fn new(
        data_dir: PathBuf,
        compact_threshold: u64,
        catalog: Arc<dyn Catalog>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            catalog,
            directory,
        }
    }

    /// Get or lazily create the engine for a provider. Unknown providers
    /// (per the directory collaborator) are refused.
    pub async fn get_or_create(&self, provider_id: Ulid) -> Result<Arc<Engine>, EngineError> {
        if let Some(engine) = self.engines.get(&provider_id) {
            return Ok(engine.value().clone());
        }
        if self.directory.settings(provider_id).await.is_none() {
            return Err(EngineError::NotFound("provider"));
        }
        if self.engines.len() >= MAX_PROVIDERS {
            return Err(EngineError::LimitExceeded("too many providers"));
        }

        // Entry API so two racing creations can't open the same WAL twice.
        let engine = match self.engines.entry(provider_id) {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{provider_id}.wal"));
                let notify = Arc::new(NotifyHub::new());
                let engine = Arc::new(
                    Engine::new(
                        provider_id,
                        wal_path,
                        notify,
                        self.catalog.clone(),
                        self.directory.clone(),
                    )
                    .map_err(|e| EngineError::Wal(e.to_string()))?,
                );

                tokio::spawn(reaper::run_maintenance(
                    engine.clone(),
                    self.compact_threshold,
                ));
                slot.insert(engine.clone());
                metrics::gauge!(crate::observability::PROVIDERS_ACTIVE)
                    .set(self.engines.len() as f64);
                engine
            }
        };
        Ok(engine)
    }

    /// Warm-start engines for every provider the directory knows, replaying
    /// their WALs. Failures are logged and skipped so one bad log cannot
    /// keep the rest of the fleet down.
    pub async fn open_all(&self) {
        for provider_id in self.directory.provider_ids().await {
            if let Err(e) = self.get_or_create(provider_id).await {
                warn!("skipping provider {provider_id}: {e}");
            }
        }
    }

    /// Find the loaded engine holding a booking.
    pub fn engine_for_booking(&self, booking_id: Ulid) -> Option<(Ulid, Arc<Engine>)> {
        self.engines
            .iter()
            .find(|e| e.value().has_booking(booking_id))
            .map(|e| (*e.key(), e.value().clone()))
    }

    /// Find the loaded engine holding a cancel token.
    pub fn engine_for_token(&self, token: Uuid) -> Option<(Ulid, Arc<Engine>)> {
        self.engines
            .iter()
            .find(|e| e.value().has_token(token))
            .map(|e| (*e.key(), e.value().clone()))
    }
}
