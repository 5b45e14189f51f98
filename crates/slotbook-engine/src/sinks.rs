//! Outbound collaborator hooks. Delivery failures are logged and dropped; they
//! never undo a booking mutation that already committed.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value as JsonValue;
use slotbook_core::{Booking, BookingStatus, TimeSlot};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn on_availability_changed(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
        slots: &[TimeSlot],
    ) -> Result<()>;

    async fn on_booking_created(&self, booking: &Booking) -> Result<()>;

    async fn on_booking_cancelled(&self, booking_id: Uuid, reason: &str) -> Result<()>;

    async fn on_booking_status_changed(&self, booking_id: Uuid, status: BookingStatus) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub actor_id: Uuid,
    pub action: String,
    pub description: String,
    pub metadata: JsonValue,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct NoopNotificationSink;

#[async_trait]
impl NotificationSink for NoopNotificationSink {
    async fn on_availability_changed(&self, _: Uuid, _: NaiveDate, _: &[TimeSlot]) -> Result<()> {
        Ok(())
    }

    async fn on_booking_created(&self, _: &Booking) -> Result<()> {
        Ok(())
    }

    async fn on_booking_cancelled(&self, _: Uuid, _: &str) -> Result<()> {
        Ok(())
    }

    async fn on_booking_status_changed(&self, _: Uuid, _: BookingStatus) -> Result<()> {
        Ok(())
    }
}

/// Writes audit entries to the `slotbook::audit` tracing target.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        info!(
            target: "slotbook::audit",
            actor_id = %entry.actor_id,
            action = %entry.action,
            metadata = %entry.metadata,
            "{}",
            entry.description
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    AvailabilityChanged {
        provider_id: Uuid,
        date: NaiveDate,
        slots: Vec<TimeSlot>,
    },
    BookingCreated {
        booking_id: Uuid,
    },
    BookingCancelled {
        booking_id: Uuid,
        reason: String,
    },
    BookingStatusChanged {
        booking_id: Uuid,
        status: BookingStatus,
    },
}

/// Keeps every event in memory; used by the CLI demo and tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    notifications: Mutex<Vec<Notification>>,
    audit: Mutex<Vec<AuditEntry>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().await.clone()
    }

    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit.lock().await.clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn on_availability_changed(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
        slots: &[TimeSlot],
    ) -> Result<()> {
        self.notifications.lock().await.push(Notification::AvailabilityChanged {
            provider_id,
            date,
            slots: slots.to_vec(),
        });
        Ok(())
    }

    async fn on_booking_created(&self, booking: &Booking) -> Result<()> {
        self.notifications
            .lock()
            .await
            .push(Notification::BookingCreated { booking_id: booking.id });
        Ok(())
    }

    async fn on_booking_cancelled(&self, booking_id: Uuid, reason: &str) -> Result<()> {
        self.notifications.lock().await.push(Notification::BookingCancelled {
            booking_id,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn on_booking_status_changed(&self, booking_id: Uuid, status: BookingStatus) -> Result<()> {
        self.notifications
            .lock()
            .await
            .push(Notification::BookingStatusChanged { booking_id, status });
        Ok(())
    }
}

#[async_trait]
impl AuditSink for RecordingSink {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        self.audit.lock().await.push(entry);
        Ok(())
    }
}

/// Logs and swallows a failed outbound delivery.
pub(crate) fn swallow(kind: &'static str, result: Result<()>) {
    if let Err(err) = result {
        warn!(sink = kind, error = %format!("{err:#}"), "outbound delivery failed; continuing");
    }
}
