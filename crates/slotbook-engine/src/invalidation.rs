//! Keeps cached grids coherent after a booking mutation has committed.
//!
//! Runs strictly after the store write. Nothing in here can fail the mutation
//! that triggered it: cache, refresh and notification failures are logged.

use std::sync::Arc;

use chrono::NaiveDate;
use slotbook_storage::AvailabilityCache;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::availability::AvailabilityCalculator;
use crate::sinks::{swallow, NotificationSink};

pub struct CacheInvalidator {
    cache: Arc<dyn AvailabilityCache>,
    calculator: Arc<AvailabilityCalculator>,
    notifications: Arc<dyn NotificationSink>,
}

impl CacheInvalidator {
    pub fn new(
        cache: Arc<dyn AvailabilityCache>,
        calculator: Arc<AvailabilityCalculator>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            cache,
            calculator,
            notifications,
        }
    }

    /// Drops every cached grid of the provider on each distinct date, recomputes
    /// the grid for `service_id`, and announces it. Returns how many grids were
    /// refreshed.
    pub async fn invalidate(&self, provider_id: Uuid, service_id: Uuid, dates: &[NaiveDate]) -> usize {
        let mut distinct: Vec<NaiveDate> = Vec::with_capacity(dates.len());
        for date in dates {
            if !distinct.contains(date) {
                distinct.push(*date);
            }
        }

        let mut refreshed = 0;
        for date in distinct {
            if let Err(err) = self.cache.invalidate(provider_id, date).await {
                warn!(%provider_id, %date, error = %err, "availability cache invalidation failed");
            }

            match self.calculator.refresh(provider_id, service_id, date).await {
                Ok(slots) => {
                    refreshed += 1;
                    debug!(%provider_id, %date, "availability refreshed");
                    swallow(
                        "notification",
                        self.notifications
                            .on_availability_changed(provider_id, date, &slots)
                            .await,
                    );
                }
                Err(err) => {
                    warn!(%provider_id, %service_id, %date, error = %err, "availability refresh skipped");
                }
            }
        }
        refreshed
    }
}
