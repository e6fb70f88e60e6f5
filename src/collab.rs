//! Narrow interfaces to the catalog and provider-directory collaborators.
//!
//! The engine only ever asks these four questions: what a service takes,
//! how a provider is configured, and whether a location/member exists.
//! Everything else those subsystems do stays on their side of the seam.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// What the catalog knows about one bookable service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub id: Ulid,
    pub duration_minutes: u32,
    /// Overrides the provider default when set.
    pub buffer_minutes: Option<u32>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub default_buffer_minutes: u32,
    /// New bookings start `pending` instead of `confirmed` when set.
    pub requires_confirmation: bool,
    /// All schedule math runs in this timezone's wall clock.
    pub timezone: Tz,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn service(&self, provider_id: Ulid, service_id: Ulid) -> Option<ServiceSpec>;
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn settings(&self, provider_id: Ulid) -> Option<ProviderSettings>;
    async fn location_exists(&self, provider_id: Ulid, location_id: Ulid) -> bool;
    async fn member_exists(&self, provider_id: Ulid, member_id: Ulid) -> bool;
    /// Known provider ids, for warm-starting engines.
    async fn provider_ids(&self) -> Vec<Ulid>;
}

// ── In-memory implementation ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSeed {
    pub id: Ulid,
    pub settings: ProviderSettings,
    #[serde(default)]
    pub locations: HashSet<Ulid>,
    #[serde(default)]
    pub members: HashSet<Ulid>,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedFile {
    pub providers: Vec<ProviderSeed>,
}

/// Catalog + directory backed by a seed file. Stands in for the real
/// account/catalog subsystems; tests build it directly.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    providers: HashMap<Ulid, ProviderSeed>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: SeedFile) -> Self {
        Self {
            providers: seed.providers.into_iter().map(|p| (p.id, p)).collect(),
        }
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let seed: SeedFile = serde_json::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Self::from_seed(seed))
    }

    pub fn add_provider(&mut self, seed: ProviderSeed) -> &mut Self {
        self.providers.insert(seed.id, seed);
        self
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }
}

#[async_trait]
impl Catalog for InMemoryDirectory {
    async fn service(&self, provider_id: Ulid, service_id: Ulid) -> Option<ServiceSpec> {
        self.providers
            .get(&provider_id)?
            .services
            .iter()
            .find(|s| s.id == service_id)
            .cloned()
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn settings(&self, provider_id: Ulid) -> Option<ProviderSettings> {
        self.providers.get(&provider_id).map(|p| p.settings)
    }

    async fn location_exists(&self, provider_id: Ulid, location_id: Ulid) -> bool {
        self.providers
            .get(&provider_id)
            .is_some_and(|p| p.locations.contains(&location_id))
    }

    async fn member_exists(&self, provider_id: Ulid, member_id: Ulid) -> bool {
        self.providers
            .get(&provider_id)
            .is_some_and(|p| p.members.contains(&member_id))
    }

    async fn provider_ids(&self) -> Vec<Ulid> {
        self.providers.keys().copied().collect()
    }
}
