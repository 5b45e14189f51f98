//! Collaborator contracts for the scheduling engine plus in-memory and Postgres backends.

pub mod pg;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use slotbook_core::{Booking, BookingPatch, Clock, Service, TimeSlot};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

pub use pg::PgStore;

pub const CRATE_NAME: &str = "slotbook-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable booking storage.
///
/// Implementations must serialize placement per provider-day: `insert`, and
/// any `update` that moves an active booking, fail with
/// [`StoreError::Conflict`] when the result would overlap another active
/// booking of the same provider on the same date.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Active bookings (PENDING, CONFIRMED, IN_PROGRESS), ordered by start time.
    async fn find_active_by_provider_and_date(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
    ) -> StoreResult<Vec<Booking>>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Booking>>;

    async fn insert(&self, booking: Booking) -> StoreResult<Booking>;

    /// Applies the patch and returns the stored result.
    async fn update(&self, id: Uuid, patch: &BookingPatch) -> StoreResult<Booking>;
}

#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    /// `None` when the service is unknown or deactivated.
    async fn get_active_service(&self, service_id: Uuid) -> StoreResult<Option<Service>>;
}

#[async_trait]
pub trait ProviderDirectory: Send + Sync {
    async fn is_active_provider(&self, provider_id: Uuid) -> StoreResult<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub provider_id: Uuid,
    pub service_id: Uuid,
    pub date: NaiveDate,
}

impl CacheKey {
    pub fn new(provider_id: Uuid, service_id: Uuid, date: NaiveDate) -> Self {
        Self {
            provider_id,
            service_id,
            date,
        }
    }
}

/// Expiring store of computed slot grids.
#[async_trait]
pub trait AvailabilityCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<Vec<TimeSlot>>>;

    async fn set(&self, key: CacheKey, slots: Vec<TimeSlot>, ttl: Duration) -> StoreResult<()>;

    /// Drops every grid for the provider-day, whatever the service.
    async fn invalidate(&self, provider_id: Uuid, date: NaiveDate) -> StoreResult<()>;
}

/// Process-local booking store. A single lock covers check-and-write, which
/// gives the per-provider-day serialization the engine relies on.
#[derive(Debug, Default)]
pub struct InMemoryBookingStore {
    bookings: Mutex<HashMap<Uuid, Booking>>,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.bookings.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.bookings.lock().await.is_empty()
    }

    /// Every stored booking ordered by date then start time.
    pub async fn all(&self) -> Vec<Booking> {
        let map = self.bookings.lock().await;
        let mut out = map.values().cloned().collect::<Vec<_>>();
        out.sort_by_key(|b| (b.scheduled_date, b.scheduled_time, b.created_at));
        out
    }
}

fn placement_conflict(bookings: &HashMap<Uuid, Booking>, candidate: &Booking) -> StoreResult<()> {
    if !candidate.is_active() {
        return Ok(());
    }
    let range = candidate.time_range().ok_or_else(|| {
        StoreError::InvalidRecord(format!("booking {} runs past midnight", candidate.id))
    })?;

    let clash = bookings.values().find(|b| {
        b.id != candidate.id
            && b.provider_id == candidate.provider_id
            && b.scheduled_date == candidate.scheduled_date
            && b.is_active()
            && b.time_range().is_some_and(|r| r.overlaps(&range))
    });

    match clash {
        Some(existing) => Err(StoreError::Conflict(format!(
            "provider {} already booked {}..{} on {}",
            existing.provider_id,
            existing.scheduled_time,
            existing
                .end_time()
                .map(|t| t.to_string())
                .unwrap_or_else(|| "?".to_string()),
            existing.scheduled_date
        ))),
        None => Ok(()),
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingStore {
    async fn find_active_by_provider_and_date(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
    ) -> StoreResult<Vec<Booking>> {
        let map = self.bookings.lock().await;
        let mut out = map
            .values()
            .filter(|b| b.provider_id == provider_id && b.scheduled_date == date && b.is_active())
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by_key(|b| (b.scheduled_time, b.created_at));
        Ok(out)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        Ok(self.bookings.lock().await.get(&id).cloned())
    }

    async fn insert(&self, booking: Booking) -> StoreResult<Booking> {
        let mut map = self.bookings.lock().await;
        if map.contains_key(&booking.id) {
            return Err(StoreError::Conflict(format!("booking {} already exists", booking.id)));
        }
        placement_conflict(&map, &booking)?;
        map.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn update(&self, id: Uuid, patch: &BookingPatch) -> StoreResult<Booking> {
        let mut map = self.bookings.lock().await;
        let mut next = map
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("booking {id}")))?;
        if !patch.applies_to(&next) {
            return Err(StoreError::Conflict(format!(
                "booking {id} is already {}",
                next.status
            )));
        }
        next.apply(patch);
        if patch.moves_schedule() {
            placement_conflict(&map, &next)?;
        }
        map.insert(id, next.clone());
        Ok(next)
    }
}

/// In-memory service catalog and provider directory.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    services: RwLock<HashMap<Uuid, Service>>,
    providers: RwLock<HashMap<Uuid, bool>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_service(&self, service: Service) {
        self.services.write().await.insert(service.id, service);
    }

    pub async fn set_provider_active(&self, provider_id: Uuid, active: bool) {
        self.providers.write().await.insert(provider_id, active);
    }

    pub async fn services_for_provider(&self, provider_id: Uuid) -> Vec<Service> {
        let mut out = self
            .services
            .read()
            .await
            .values()
            .filter(|s| s.provider_id == provider_id)
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

#[async_trait]
impl ServiceCatalog for InMemoryCatalog {
    async fn get_active_service(&self, service_id: Uuid) -> StoreResult<Option<Service>> {
        Ok(self
            .services
            .read()
            .await
            .get(&service_id)
            .filter(|s| s.is_active)
            .cloned())
    }
}

#[async_trait]
impl ProviderDirectory for InMemoryCatalog {
    async fn is_active_provider(&self, provider_id: Uuid) -> StoreResult<bool> {
        Ok(self
            .providers
            .read()
            .await
            .get(&provider_id)
            .copied()
            .unwrap_or(false))
    }
}

#[derive(Debug, Clone)]
struct CachedGrid {
    slots: Vec<TimeSlot>,
    expires_at: DateTime<Utc>,
}

/// Expiring availability cache keyed by provider, service and date.
///
/// Expiry is measured against the injected [`Clock`].
pub struct TtlAvailabilityCache {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<CacheKey, CachedGrid>>,
}

impl TtlAvailabilityCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of entries, expired ones included until they are next touched.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl AvailabilityCache for TtlAvailabilityCache {
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<Vec<TimeSlot>>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.slots.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: CacheKey, slots: Vec<TimeSlot>, ttl: Duration) -> StoreResult<()> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::InvalidRecord(format!("cache ttl out of range: {e}")))?;
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            key,
            CachedGrid {
                slots,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn invalidate(&self, provider_id: Uuid, date: NaiveDate) -> StoreResult<()> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|k, _| !(k.provider_id == provider_id && k.date == date));
        debug!(%provider_id, %date, dropped = before - entries.len(), "availability cache invalidated");
        Ok(())
    }
}
