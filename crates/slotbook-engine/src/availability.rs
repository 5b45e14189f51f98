//! Read-through availability: slot grid reconciled with a provider's active bookings.
//!
//! The cache is derived state only. Conflict decisions for placement never read it.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use slotbook_core::{Service, TimeSlot};
use slotbook_storage::{AvailabilityCache, CacheKey, ProviderDirectory, ServiceCatalog};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::conflict::ConflictChecker;
use crate::error::{EngineError, EngineResult};
use crate::slots::SlotGrid;

pub struct AvailabilityCalculator {
    services: Arc<dyn ServiceCatalog>,
    providers: Arc<dyn ProviderDirectory>,
    checker: ConflictChecker,
    cache: Arc<dyn AvailabilityCache>,
    grid: SlotGrid,
    ttl: Duration,
}

impl AvailabilityCalculator {
    pub fn new(
        services: Arc<dyn ServiceCatalog>,
        providers: Arc<dyn ProviderDirectory>,
        checker: ConflictChecker,
        cache: Arc<dyn AvailabilityCache>,
        grid: SlotGrid,
        ttl: Duration,
    ) -> Self {
        Self {
            services,
            providers,
            checker,
            cache,
            grid,
            ttl,
        }
    }

    pub fn grid(&self) -> SlotGrid {
        self.grid
    }

    pub fn checker(&self) -> &ConflictChecker {
        &self.checker
    }

    /// Cached grid if fresh, otherwise computed from the booking store and cached.
    ///
    /// A failing cache is treated as a miss; the grid is then recomputed on every call.
    #[instrument(skip_all, fields(%provider_id, %service_id, %date))]
    pub async fn get_availability(
        &self,
        provider_id: Uuid,
        service_id: Uuid,
        date: NaiveDate,
    ) -> EngineResult<Vec<TimeSlot>> {
        let key = CacheKey::new(provider_id, service_id, date);
        match self.cache.get(&key).await {
            Ok(Some(slots)) => {
                debug!("availability cache hit");
                return Ok(slots);
            }
            Ok(None) => debug!("availability cache miss"),
            Err(err) => warn!(error = %err, "availability cache read failed; recomputing"),
        }

        let slots = self.compute(provider_id, service_id, date).await?;
        self.store(key, &slots).await;
        Ok(slots)
    }

    /// Recomputes and overwrites the cached grid without reading the cache first.
    pub async fn refresh(
        &self,
        provider_id: Uuid,
        service_id: Uuid,
        date: NaiveDate,
    ) -> EngineResult<Vec<TimeSlot>> {
        let slots = self.compute(provider_id, service_id, date).await?;
        self.store(CacheKey::new(provider_id, service_id, date), &slots)
            .await;
        Ok(slots)
    }

    /// The service must exist, be active and belong to an active provider.
    pub async fn require_bookable_service(
        &self,
        provider_id: Uuid,
        service_id: Uuid,
    ) -> EngineResult<Service> {
        let service = self
            .services
            .get_active_service(service_id)
            .await?
            .filter(|s| s.is_active)
            .ok_or_else(|| EngineError::not_found(format!("service {service_id} is not available")))?;
        if service.provider_id != provider_id {
            return Err(EngineError::not_found(format!(
                "service {service_id} is not offered by provider {provider_id}"
            )));
        }
        if !self.providers.is_active_provider(provider_id).await? {
            return Err(EngineError::not_found(format!(
                "provider {provider_id} is not active"
            )));
        }
        Ok(service)
    }

    async fn compute(
        &self,
        provider_id: Uuid,
        service_id: Uuid,
        date: NaiveDate,
    ) -> EngineResult<Vec<TimeSlot>> {
        self.require_bookable_service(provider_id, service_id).await?;
        let day = self.checker.load_day(provider_id, date).await?;
        let slots = self
            .grid
            .generate()
            .into_iter()
            .map(|mut slot| {
                slot.available = ConflictChecker::is_free_among(slot.range(), &day, None);
                slot
            })
            .collect::<Vec<_>>();
        debug!(
            bookings = day.len(),
            free = slots.iter().filter(|s| s.available).count(),
            "availability computed"
        );
        Ok(slots)
    }

    async fn store(&self, key: CacheKey, slots: &[TimeSlot]) {
        if let Err(err) = self.cache.set(key, slots.to_vec(), self.ttl).await {
            warn!(error = %err, "availability cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use slotbook_core::{Booking, BookingPatch, BookingStatus, FixedClock, PaymentStatus};
    use slotbook_storage::{
        BookingRepository, InMemoryBookingStore, InMemoryCatalog, StoreError, StoreResult,
        TtlAvailabilityCache,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRepo {
        inner: InMemoryBookingStore,
        day_reads: AtomicUsize,
    }

    #[async_trait]
    impl BookingRepository for CountingRepo {
        async fn find_active_by_provider_and_date(
            &self,
            provider_id: Uuid,
            date: NaiveDate,
        ) -> StoreResult<Vec<Booking>> {
            self.day_reads.fetch_add(1, Ordering::SeqCst);
            self.inner.find_active_by_provider_and_date(provider_id, date).await
        }

        async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Booking>> {
            self.inner.find_by_id(id).await
        }

        async fn insert(&self, booking: Booking) -> StoreResult<Booking> {
            self.inner.insert(booking).await
        }

        async fn update(&self, id: Uuid, patch: &BookingPatch) -> StoreResult<Booking> {
            self.inner.update(id, patch).await
        }
    }

    struct BrokenCache;

    #[async_trait]
    impl AvailabilityCache for BrokenCache {
        async fn get(&self, _: &CacheKey) -> StoreResult<Option<Vec<TimeSlot>>> {
            Err(StoreError::Unavailable("cache down".into()))
        }

        async fn set(&self, _: CacheKey, _: Vec<TimeSlot>, _: Duration) -> StoreResult<()> {
            Err(StoreError::Unavailable("cache down".into()))
        }

        async fn invalidate(&self, _: Uuid, _: NaiveDate) -> StoreResult<()> {
            Err(StoreError::Unavailable("cache down".into()))
        }
    }

    struct Fixture {
        repo: Arc<CountingRepo>,
        catalog: Arc<InMemoryCatalog>,
        provider_id: Uuid,
        service_id: Uuid,
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 10).unwrap()
    }

    async fn fixture() -> Fixture {
        let repo = Arc::new(CountingRepo {
            inner: InMemoryBookingStore::new(),
            day_reads: AtomicUsize::new(0),
        });
        let catalog = Arc::new(InMemoryCatalog::new());
        let provider_id = Uuid::new_v4();
        let service_id = Uuid::new_v4();
        catalog.set_provider_active(provider_id, true).await;
        catalog
            .upsert_service(Service {
                id: service_id,
                provider_id,
                name: "Haircut".into(),
                duration_minutes: 60,
                price: dec!(45),
                is_active: true,
            })
            .await;
        Fixture {
            repo,
            catalog,
            provider_id,
            service_id,
        }
    }

    fn calculator(f: &Fixture, cache: Arc<dyn AvailabilityCache>) -> AvailabilityCalculator {
        AvailabilityCalculator::new(
            f.catalog.clone(),
            f.catalog.clone(),
            ConflictChecker::new(f.repo.clone()),
            cache,
            SlotGrid {
                granularity_minutes: 30,
                open_hour: 9,
                close_hour: 18,
            },
            Duration::from_secs(60),
        )
    }

    fn ttl_cache() -> Arc<dyn AvailabilityCache> {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).single().unwrap(),
        ));
        Arc::new(TtlAvailabilityCache::new(clock))
    }

    fn booking_at(f: &Fixture, start: &str) -> Booking {
        let created = Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).single().unwrap();
        Booking {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            provider_id: f.provider_id,
            service_id: f.service_id,
            status: BookingStatus::Confirmed,
            scheduled_date: date(),
            scheduled_time: start.parse().unwrap(),
            duration_minutes: 60,
            total_price: dec!(45),
            platform_fee: dec!(6.75),
            provider_earnings: dec!(38.25),
            payment_status: PaymentStatus::Captured,
            notes: None,
            created_at: created,
            updated_at: created,
        }
    }

    fn availability_of(slots: &[TimeSlot], start: &str) -> bool {
        slots
            .iter()
            .find(|s| s.start_time.to_string() == start)
            .map(|s| s.available)
            .unwrap()
    }

    #[tokio::test]
    async fn booked_hour_blocks_two_half_hour_slots() {
        let f = fixture().await;
        f.repo.insert(booking_at(&f, "10:00")).await.unwrap();
        let calc = calculator(&f, ttl_cache());

        let slots = calc
            .get_availability(f.provider_id, f.service_id, date())
            .await
            .unwrap();
        assert_eq!(slots.len(), 18);
        assert!(availability_of(&slots, "09:30"));
        assert!(!availability_of(&slots, "10:00"));
        assert!(!availability_of(&slots, "10:30"));
        assert!(availability_of(&slots, "11:00"));
    }

    #[tokio::test]
    async fn second_read_within_ttl_is_served_from_cache() {
        let f = fixture().await;
        let calc = calculator(&f, ttl_cache());

        let first = calc
            .get_availability(f.provider_id, f.service_id, date())
            .await
            .unwrap();
        let second = calc
            .get_availability(f.provider_id, f.service_id, date())
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(f.repo.day_reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn broken_cache_degrades_to_recomputing() {
        let f = fixture().await;
        let calc = calculator(&f, Arc::new(BrokenCache));

        for _ in 0..3 {
            let slots = calc
                .get_availability(f.provider_id, f.service_id, date())
                .await
                .unwrap();
            assert_eq!(slots.len(), 18);
        }
        assert_eq!(f.repo.day_reads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn foreign_or_inactive_service_is_not_found() {
        let f = fixture().await;
        let calc = calculator(&f, ttl_cache());

        let other_provider = Uuid::new_v4();
        let err = calc
            .get_availability(other_provider, f.service_id, date())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        let err = calc
            .get_availability(f.provider_id, Uuid::new_v4(), date())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        f.catalog.set_provider_active(f.provider_id, false).await;
        let err = calc
            .get_availability(f.provider_id, f.service_id, date())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
        assert_eq!(f.repo.day_reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refresh_overwrites_stale_entry() {
        let f = fixture().await;
        let calc = calculator(&f, ttl_cache());
        let before = calc
            .get_availability(f.provider_id, f.service_id, date())
            .await
            .unwrap();
        assert!(availability_of(&before, "14:00"));

        f.repo.insert(booking_at(&f, "14:00")).await.unwrap();
        let stale = calc
            .get_availability(f.provider_id, f.service_id, date())
            .await
            .unwrap();
        assert!(availability_of(&stale, "14:00"));

        calc.refresh(f.provider_id, f.service_id, date()).await.unwrap();
        let fresh = calc
            .get_availability(f.provider_id, f.service_id, date())
            .await
            .unwrap();
        assert!(!availability_of(&fresh, "14:00"));
        assert!(!availability_of(&fresh, "14:30"));
    }
}
