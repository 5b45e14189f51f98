//! Scheduling engine: slot grids, conflict checks, cached availability and the
//! booking lifecycle, wired over the storage collaborator traits.

pub mod availability;
pub mod config;
pub mod conflict;
pub mod error;
pub mod invalidation;
pub mod lifecycle;
pub mod policy;
pub mod sinks;
pub mod slots;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use slotbook_core::{BookingSummary, Clock, Service, TimeSlot};
use slotbook_storage::{
    AvailabilityCache, BookingRepository, InMemoryBookingStore, InMemoryCatalog, ProviderDirectory,
    ServiceCatalog, TtlAvailabilityCache,
};
use uuid::Uuid;

pub use availability::AvailabilityCalculator;
pub use config::EngineConfig;
pub use conflict::{overlaps, ConflictChecker};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use invalidation::CacheInvalidator;
pub use lifecycle::{
    BookingLifecycle, CancellationOutcome, CreateBookingRequest, LifecyclePolicy, RescheduleRequest,
};
pub use policy::Commission;
pub use sinks::{
    AuditEntry, AuditSink, Notification, NoopNotificationSink, NotificationSink, RecordingSink,
    TracingAuditSink,
};
pub use slots::{generate_slots, SlotGrid};

pub const CRATE_NAME: &str = "slotbook-engine";

/// Everything the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub bookings: Arc<dyn BookingRepository>,
    pub services: Arc<dyn ServiceCatalog>,
    pub providers: Arc<dyn ProviderDirectory>,
    pub cache: Arc<dyn AvailabilityCache>,
    pub notifications: Arc<dyn NotificationSink>,
    pub audit: Arc<dyn AuditSink>,
    pub clock: Arc<dyn Clock>,
}

pub struct SchedulingEngine {
    config: EngineConfig,
    calculator: Arc<AvailabilityCalculator>,
    lifecycle: BookingLifecycle,
}

impl SchedulingEngine {
    pub fn new(config: EngineConfig, deps: Collaborators) -> Result<Self> {
        config.validate().context("invalid engine configuration")?;
        let grid = config.grid();
        let calculator = Arc::new(AvailabilityCalculator::new(
            deps.services.clone(),
            deps.providers.clone(),
            ConflictChecker::new(deps.bookings.clone()),
            deps.cache.clone(),
            grid,
            config.availability_ttl(),
        ));
        let invalidator = CacheInvalidator::new(
            deps.cache.clone(),
            calculator.clone(),
            deps.notifications.clone(),
        );
        let lifecycle = BookingLifecycle::new(
            deps.bookings,
            calculator.clone(),
            invalidator,
            deps.notifications,
            deps.audit,
            deps.clock,
            LifecyclePolicy {
                grid,
                commission_rate: config.commission_rate,
                cancellation_lead_hours: config.cancellation_lead_hours,
                max_advance_days: config.max_advance_days,
            },
        );
        Ok(Self {
            config,
            calculator,
            lifecycle,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn slots(&self) -> Vec<TimeSlot> {
        self.config.grid().generate()
    }

    pub async fn get_availability(
        &self,
        provider_id: Uuid,
        service_id: Uuid,
        date: NaiveDate,
    ) -> EngineResult<Vec<TimeSlot>> {
        self.calculator
            .get_availability(provider_id, service_id, date)
            .await
    }

    pub fn availability(&self) -> &AvailabilityCalculator {
        &self.calculator
    }

    pub fn bookings(&self) -> &BookingLifecycle {
        &self.lifecycle
    }

    pub async fn create_booking(&self, req: CreateBookingRequest) -> EngineResult<BookingSummary> {
        self.lifecycle.create(req).await
    }

    pub async fn cancel_booking(
        &self,
        booking_id: Uuid,
        customer_id: Uuid,
        reason: &str,
    ) -> EngineResult<CancellationOutcome> {
        self.lifecycle.cancel(booking_id, customer_id, reason).await
    }

    pub async fn reschedule_booking(&self, req: RescheduleRequest) -> EngineResult<BookingSummary> {
        self.lifecycle.reschedule(req).await
    }
}

/// Process-local marketplace: in-memory store, catalog and TTL cache sharing one clock.
pub struct InMemoryMarketplace {
    pub store: Arc<InMemoryBookingStore>,
    pub catalog: Arc<InMemoryCatalog>,
    pub cache: Arc<TtlAvailabilityCache>,
    pub events: Arc<RecordingSink>,
    pub clock: Arc<dyn Clock>,
}

impl InMemoryMarketplace {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Arc::new(InMemoryBookingStore::new()),
            catalog: Arc::new(InMemoryCatalog::new()),
            cache: Arc::new(TtlAvailabilityCache::new(clock.clone())),
            events: Arc::new(RecordingSink::new()),
            clock,
        }
    }

    /// Registers an active provider with one active service.
    pub async fn add_provider_service(&self, provider_id: Uuid, service: Service) {
        self.catalog.set_provider_active(provider_id, true).await;
        self.catalog
            .upsert_service(Service {
                provider_id,
                ..service
            })
            .await;
    }

    /// Collaborators with notifications and audit both recorded in `events`.
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            bookings: self.store.clone(),
            services: self.catalog.clone(),
            providers: self.catalog.clone(),
            cache: self.cache.clone(),
            notifications: self.events.clone(),
            audit: self.events.clone(),
            clock: self.clock.clone(),
        }
    }

    pub fn engine(&self, config: EngineConfig) -> Result<SchedulingEngine> {
        SchedulingEngine::new(config, self.collaborators())
    }
}
