//! Overlap decisions between a candidate range and a provider's active bookings.
//!
//! [`ConflictChecker`] is the only place the engine decides whether a range is
//! free. Grid marking and booking placement both go through it so what a
//! customer sees as free is exactly what the lifecycle accepts.

use std::sync::Arc;

use chrono::NaiveDate;
use slotbook_core::{Booking, MinuteOfDay, TimeRange};
use slotbook_storage::BookingRepository;
use tracing::debug;
use uuid::Uuid;

use crate::error::EngineResult;

/// Half-open overlap: `cs < ee && ce > es`. Touching ranges do not overlap.
pub fn overlaps(
    candidate_start: MinuteOfDay,
    candidate_end: MinuteOfDay,
    existing_start: MinuteOfDay,
    existing_end: MinuteOfDay,
) -> bool {
    TimeRange::new(candidate_start, candidate_end)
        .overlaps(&TimeRange::new(existing_start, existing_end))
}

#[derive(Clone)]
pub struct ConflictChecker {
    bookings: Arc<dyn BookingRepository>,
}

impl ConflictChecker {
    pub fn new(bookings: Arc<dyn BookingRepository>) -> Self {
        Self { bookings }
    }

    /// Loads the provider-day once; pair with [`ConflictChecker::is_free_among`]
    /// when many ranges are tested against the same day.
    pub async fn load_day(&self, provider_id: Uuid, date: NaiveDate) -> EngineResult<Vec<Booking>> {
        let active = self
            .bookings
            .find_active_by_provider_and_date(provider_id, date)
            .await?;
        Ok(active.into_iter().filter(Booking::is_active).collect())
    }

    /// Pure check of `range` against already-loaded bookings.
    pub fn is_free_among(range: TimeRange, bookings: &[Booking], exclude: Option<Uuid>) -> bool {
        !bookings
            .iter()
            .filter(|b| b.is_active() && Some(b.id) != exclude)
            .filter_map(|b| b.time_range())
            .any(|existing| overlaps(range.start, range.end, existing.start, existing.end))
    }

    /// `exclude` skips one booking, so a reschedule is never blocked by its own current slot.
    pub async fn is_available(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
        range: TimeRange,
        exclude: Option<Uuid>,
    ) -> EngineResult<bool> {
        let day = self.load_day(provider_id, date).await?;
        let free = Self::is_free_among(range, &day, exclude);
        debug!(%provider_id, %date, start = %range.start, end = %range.end, free, "conflict check");
        Ok(free)
    }
}
