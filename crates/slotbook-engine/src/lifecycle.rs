//! Booking state machine: placement, cancellation, rescheduling and the
//! payment/service-delivery transitions.
//!
//! Every mutation follows the same order: validate, check the store for
//! conflicts, write, then notify, audit and invalidate. Post-commit steps never
//! fail the call.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use slotbook_core::{
    Booking, BookingPatch, BookingStatus, BookingSummary, Clock, MinuteOfDay, PaymentStatus,
    TimeRange,
};
use slotbook_storage::BookingRepository;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::availability::AvailabilityCalculator;
use crate::error::{EngineError, EngineResult};
use crate::invalidation::CacheInvalidator;
use crate::policy::{hours_until, refund_amount, Commission};
use crate::sinks::{swallow, AuditEntry, AuditSink, NotificationSink};
use crate::slots::SlotGrid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBookingRequest {
    pub customer_id: Uuid,
    pub provider_id: Uuid,
    pub service_id: Uuid,
    pub date: NaiveDate,
    pub start_time: MinuteOfDay,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleRequest {
    pub booking_id: Uuid,
    pub customer_id: Uuid,
    pub new_date: NaiveDate,
    pub new_start_time: MinuteOfDay,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Result of a cancellation. `refund_amount` is a quote only, present when the
/// payment had been captured.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancellationOutcome {
    pub booking: BookingSummary,
    pub hours_until_booking: f64,
    pub refund_amount: Option<Decimal>,
}

/// Time and policy knobs the lifecycle enforces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LifecyclePolicy {
    pub grid: SlotGrid,
    pub commission_rate: Decimal,
    pub cancellation_lead_hours: u32,
    pub max_advance_days: u32,
}

pub struct BookingLifecycle {
    bookings: Arc<dyn BookingRepository>,
    calculator: Arc<AvailabilityCalculator>,
    invalidator: CacheInvalidator,
    notifications: Arc<dyn NotificationSink>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    policy: LifecyclePolicy,
}

/// Actor recorded for transitions driven by the platform rather than a person.
const SYSTEM_ACTOR: Uuid = Uuid::nil();

enum Scope {
    Customer(Uuid),
    Provider(Uuid),
    Any,
}

impl BookingLifecycle {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        calculator: Arc<AvailabilityCalculator>,
        invalidator: CacheInvalidator,
        notifications: Arc<dyn NotificationSink>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        policy: LifecyclePolicy,
    ) -> Self {
        Self {
            bookings,
            calculator,
            invalidator,
            notifications,
            audit,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    pub async fn get(&self, booking_id: Uuid) -> EngineResult<BookingSummary> {
        let booking = self.load(booking_id, Scope::Any).await?;
        Ok(BookingSummary::from(&booking))
    }

    /// Places a new PENDING booking with its commission split frozen.
    pub async fn create(&self, req: CreateBookingRequest) -> EngineResult<BookingSummary> {
        let span = info_span!(
            "booking_create",
            customer_id = %req.customer_id,
            provider_id = %req.provider_id,
            service_id = %req.service_id,
            date = %req.date,
            start = %req.start_time
        );
        self.create_inner(req).instrument(span).await
    }

    async fn create_inner(&self, req: CreateBookingRequest) -> EngineResult<BookingSummary> {
        let service = self
            .calculator
            .require_bookable_service(req.provider_id, req.service_id)
            .await?;
        if service.duration_minutes == 0 {
            return Err(EngineError::invalid(format!(
                "service {} has no duration",
                service.id
            )));
        }
        let range = self.placement(req.date, req.start_time, service.duration_minutes)?;

        let free = self
            .calculator
            .checker()
            .is_available(req.provider_id, req.date, range, None)
            .await?;
        if !free {
            return Err(EngineError::conflict(format!(
                "{} {}-{} is already booked",
                req.date, range.start, range.end
            )));
        }

        let now = self.clock.now();
        let commission = Commission::split(service.price, self.policy.commission_rate);
        let draft = Booking {
            id: Uuid::new_v4(),
            customer_id: req.customer_id,
            provider_id: req.provider_id,
            service_id: service.id,
            status: BookingStatus::Pending,
            scheduled_date: req.date,
            scheduled_time: req.start_time,
            duration_minutes: service.duration_minutes,
            total_price: service.price,
            platform_fee: commission.platform_fee,
            provider_earnings: commission.provider_earnings,
            payment_status: PaymentStatus::Pending,
            notes: req.notes.filter(|n| !n.trim().is_empty()),
            created_at: now,
            updated_at: now,
        };
        let booking = self.bookings.insert(draft).await?;
        info!(booking_id = %booking.id, "booking created");

        swallow(
            "notification",
            self.notifications.on_booking_created(&booking).await,
        );
        self.record(
            booking.customer_id,
            "booking.created",
            format!("booked {} for {} {}", service.name, booking.scheduled_date, booking.scheduled_time),
            json!({
                "booking_id": booking.id,
                "provider_id": booking.provider_id,
                "service_id": booking.service_id,
                "total_price": booking.total_price,
                "platform_fee": booking.platform_fee,
            }),
        )
        .await;
        self.invalidator
            .invalidate(booking.provider_id, booking.service_id, &[booking.scheduled_date])
            .await;

        Ok(BookingSummary::from(&booking))
    }

    /// Customer cancellation, refused inside the lead-time window.
    pub async fn cancel(
        &self,
        booking_id: Uuid,
        customer_id: Uuid,
        reason: &str,
    ) -> EngineResult<CancellationOutcome> {
        let span = info_span!("booking_cancel", %booking_id, %customer_id);
        self.cancel_inner(booking_id, customer_id, reason)
            .instrument(span)
            .await
    }

    async fn cancel_inner(
        &self,
        booking_id: Uuid,
        customer_id: Uuid,
        reason: &str,
    ) -> EngineResult<CancellationOutcome> {
        let booking = self.load(booking_id, Scope::Customer(customer_id)).await?;
        let hours = self.ensure_cancellable(&booking)?;
        if hours < f64::from(self.policy.cancellation_lead_hours) {
            return Err(EngineError::forbidden(format!(
                "cancellations need at least {} hours notice; booking starts in {:.1} hours",
                self.policy.cancellation_lead_hours, hours
            )));
        }
        let refund = (booking.payment_status == PaymentStatus::Captured)
            .then(|| refund_amount(hours, booking.total_price));
        let note = format!("Cancellation reason: {reason}");
        self.commit_cancellation(booking, customer_id, note, reason, hours, refund)
            .await
    }

    /// Provider cancellation: no lead-time rule and a full refund quote.
    pub async fn cancel_by_provider(
        &self,
        booking_id: Uuid,
        provider_id: Uuid,
        reason: &str,
    ) -> EngineResult<CancellationOutcome> {
        let span = info_span!("booking_cancel_by_provider", %booking_id, %provider_id);
        self.cancel_by_provider_inner(booking_id, provider_id, reason)
            .instrument(span)
            .await
    }

    async fn cancel_by_provider_inner(
        &self,
        booking_id: Uuid,
        provider_id: Uuid,
        reason: &str,
    ) -> EngineResult<CancellationOutcome> {
        let booking = self.load(booking_id, Scope::Provider(provider_id)).await?;
        let hours = self.ensure_cancellable(&booking)?;
        let refund = (booking.payment_status == PaymentStatus::Captured)
            .then_some(booking.total_price);
        let note = format!("Cancelled by provider: {reason}");
        self.commit_cancellation(booking, provider_id, note, reason, hours, refund)
            .await
    }

    /// Moves a PENDING or CONFIRMED booking, keeping its original duration.
    pub async fn reschedule(&self, req: RescheduleRequest) -> EngineResult<BookingSummary> {
        let span = info_span!(
            "booking_reschedule",
            booking_id = %req.booking_id,
            customer_id = %req.customer_id,
            new_date = %req.new_date,
            new_start = %req.new_start_time
        );
        self.reschedule_inner(req).instrument(span).await
    }

    async fn reschedule_inner(&self, req: RescheduleRequest) -> EngineResult<BookingSummary> {
        let booking = self
            .load(req.booking_id, Scope::Customer(req.customer_id))
            .await?;
        if !matches!(booking.status, BookingStatus::Pending | BookingStatus::Confirmed) {
            return Err(EngineError::invalid(format!(
                "booking is {} and cannot be rescheduled",
                booking.status
            )));
        }
        let range = self.placement(req.new_date, req.new_start_time, booking.duration_minutes)?;

        let free = self
            .calculator
            .checker()
            .is_available(booking.provider_id, req.new_date, range, Some(booking.id))
            .await?;
        if !free {
            return Err(EngineError::conflict(format!(
                "{} {}-{} is already booked",
                req.new_date, range.start, range.end
            )));
        }

        let mut patch = BookingPatch::at(self.clock.now()).expecting(booking.status);
        patch.scheduled_date = Some(req.new_date);
        patch.scheduled_time = Some(req.new_start_time);
        if let Some(note) = req.notes.as_deref().filter(|n| !n.trim().is_empty()) {
            let mut noted = booking.clone();
            noted.append_note(note);
            patch.notes = noted.notes;
        }
        let updated = self.bookings.update(booking.id, &patch).await?;
        info!(
            from_date = %booking.scheduled_date,
            from_start = %booking.scheduled_time,
            "booking rescheduled"
        );

        self.record(
            req.customer_id,
            "booking.rescheduled",
            format!(
                "moved from {} {} to {} {}",
                booking.scheduled_date, booking.scheduled_time, updated.scheduled_date, updated.scheduled_time
            ),
            json!({
                "booking_id": updated.id,
                "from_date": booking.scheduled_date,
                "from_time": booking.scheduled_time,
                "to_date": updated.scheduled_date,
                "to_time": updated.scheduled_time,
            }),
        )
        .await;
        self.invalidator
            .invalidate(
                updated.provider_id,
                updated.service_id,
                &[booking.scheduled_date, updated.scheduled_date],
            )
            .await;

        Ok(BookingSummary::from(&updated))
    }

    /// Payment captured externally: PENDING to CONFIRMED.
    pub async fn confirm_payment(&self, booking_id: Uuid) -> EngineResult<BookingSummary> {
        let booking = self.load(booking_id, Scope::Any).await?;
        self.transition(booking, BookingStatus::Confirmed, Some(PaymentStatus::Captured), SYSTEM_ACTOR)
            .instrument(info_span!("booking_confirm_payment", %booking_id))
            .await
    }

    pub async fn start_service(&self, booking_id: Uuid, provider_id: Uuid) -> EngineResult<BookingSummary> {
        let booking = self.load(booking_id, Scope::Provider(provider_id)).await?;
        self.transition(booking, BookingStatus::InProgress, None, provider_id)
            .instrument(info_span!("booking_start", %booking_id, %provider_id))
            .await
    }

    pub async fn complete(&self, booking_id: Uuid, provider_id: Uuid) -> EngineResult<BookingSummary> {
        let booking = self.load(booking_id, Scope::Provider(provider_id)).await?;
        self.transition(booking, BookingStatus::Completed, None, provider_id)
            .instrument(info_span!("booking_complete", %booking_id, %provider_id))
            .await
    }

    /// Refund settled externally.
    pub async fn mark_refunded(&self, booking_id: Uuid) -> EngineResult<BookingSummary> {
        let booking = self.load(booking_id, Scope::Any).await?;
        self.transition(booking, BookingStatus::Refunded, Some(PaymentStatus::Refunded), SYSTEM_ACTOR)
            .instrument(info_span!("booking_refund", %booking_id))
            .await
    }

    async fn load(&self, booking_id: Uuid, scope: Scope) -> EngineResult<Booking> {
        let booking = self
            .bookings
            .find_by_id(booking_id)
            .await?
            .filter(|b| match scope {
                Scope::Customer(id) => b.customer_id == id,
                Scope::Provider(id) => b.provider_id == id,
                Scope::Any => true,
            });
        booking.ok_or_else(|| EngineError::not_found(format!("booking {booking_id} not found")))
    }

    /// Validates a candidate placement and returns its range.
    fn placement(&self, date: NaiveDate, start: MinuteOfDay, duration_minutes: u32) -> EngineResult<TimeRange> {
        let end = start.checked_add_minutes(duration_minutes).ok_or_else(|| {
            EngineError::invalid(format!("{duration_minutes} minutes from {start} runs past midnight"))
        })?;

        let now = self.clock.now();
        let starts_at = start.on_date(date);
        if starts_at <= now {
            return Err(EngineError::invalid(format!("{date} {start} is in the past")));
        }
        if starts_at > now + Duration::days(i64::from(self.policy.max_advance_days)) {
            return Err(EngineError::invalid(format!(
                "bookings open at most {} days ahead",
                self.policy.max_advance_days
            )));
        }
        if !self.policy.grid.contains(start, end) {
            return Err(EngineError::invalid(format!(
                "{start}-{end} is outside working hours {}-{}",
                self.policy.grid.opens_at(),
                self.policy.grid.closes_at()
            )));
        }
        Ok(TimeRange::new(start, end))
    }

    fn ensure_cancellable(&self, booking: &Booking) -> EngineResult<f64> {
        if !booking.status.can_transition_to(BookingStatus::Cancelled) {
            return Err(EngineError::invalid(format!(
                "booking is {} and cannot be cancelled",
                booking.status
            )));
        }
        Ok(hours_until(self.clock.now(), booking.starts_at()))
    }

    async fn commit_cancellation(
        &self,
        booking: Booking,
        actor_id: Uuid,
        note: String,
        reason: &str,
        hours: f64,
        refund: Option<Decimal>,
    ) -> EngineResult<CancellationOutcome> {
        let mut noted = booking.clone();
        noted.append_note(&note);
        let mut patch = BookingPatch::at(self.clock.now()).expecting(booking.status);
        patch.status = Some(BookingStatus::Cancelled);
        patch.notes = noted.notes;

        let updated = self.bookings.update(booking.id, &patch).await?;
        info!(hours_until_booking = hours, refund = ?refund, "booking cancelled");

        swallow(
            "notification",
            self.notifications
                .on_booking_cancelled(updated.id, reason)
                .await,
        );
        self.record(
            actor_id,
            "booking.cancelled",
            note,
            json!({
                "booking_id": updated.id,
                "previous_status": booking.status,
                "hours_until_booking": hours,
                "refund_amount": refund,
            }),
        )
        .await;
        self.invalidator
            .invalidate(updated.provider_id, updated.service_id, &[updated.scheduled_date])
            .await;

        Ok(CancellationOutcome {
            booking: BookingSummary::from(&updated),
            hours_until_booking: hours,
            refund_amount: refund,
        })
    }

    async fn transition(
        &self,
        booking: Booking,
        next: BookingStatus,
        payment: Option<PaymentStatus>,
        actor_id: Uuid,
    ) -> EngineResult<BookingSummary> {
        if !booking.status.can_transition_to(next) {
            return Err(EngineError::invalid(format!(
                "booking cannot move from {} to {}",
                booking.status, next
            )));
        }
        let mut patch = BookingPatch::at(self.clock.now()).expecting(booking.status);
        patch.status = Some(next);
        patch.payment_status = payment;

        let updated = self.bookings.update(booking.id, &patch).await?;
        info!(from = %booking.status, to = %next, "booking status changed");

        swallow(
            "notification",
            self.notifications
                .on_booking_status_changed(updated.id, next)
                .await,
        );
        self.record(
            actor_id,
            "booking.status_changed",
            format!("{} -> {}", booking.status, next),
            json!({
                "booking_id": updated.id,
                "from": booking.status,
                "to": next,
                "payment_status": updated.payment_status,
            }),
        )
        .await;
        self.invalidator
            .invalidate(updated.provider_id, updated.service_id, &[updated.scheduled_date])
            .await;

        Ok(BookingSummary::from(&updated))
    }

    async fn record(&self, actor_id: Uuid, action: &str, description: String, metadata: serde_json::Value) {
        let entry = AuditEntry {
            actor_id,
            action: action.to_string(),
            description,
            metadata,
        };
        swallow("audit", self.audit.record(entry).await);
    }
}
