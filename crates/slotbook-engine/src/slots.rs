//! Canonical working-day slot grid.

use slotbook_core::{MinuteOfDay, TimeSlot};

/// Grid shape shared by every provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotGrid {
    pub granularity_minutes: u32,
    pub open_hour: u32,
    pub close_hour: u32,
}

impl SlotGrid {
    pub fn generate(&self) -> Vec<TimeSlot> {
        generate_slots(self.granularity_minutes, self.open_hour, self.close_hour)
    }

    pub fn opens_at(&self) -> MinuteOfDay {
        MinuteOfDay::from_hm(self.open_hour, 0).unwrap_or(MinuteOfDay::MIDNIGHT)
    }

    pub fn closes_at(&self) -> MinuteOfDay {
        MinuteOfDay::from_hm(self.close_hour, 0).unwrap_or(MinuteOfDay::END_OF_DAY)
    }

    /// True when `[start, end)` lies inside working hours.
    pub fn contains(&self, start: MinuteOfDay, end: MinuteOfDay) -> bool {
        start >= self.opens_at() && end <= self.closes_at()
    }
}

/// Half-open slots of `granularity_minutes` from `open_hour:00`, never crossing
/// `close_hour:00`. A trailing partial slot is dropped. All slots start available.
pub fn generate_slots(granularity_minutes: u32, open_hour: u32, close_hour: u32) -> Vec<TimeSlot> {
    let (Some(open), Some(close)) = (
        MinuteOfDay::from_hm(open_hour, 0),
        MinuteOfDay::from_hm(close_hour, 0),
    ) else {
        return Vec::new();
    };
    if granularity_minutes == 0 {
        return Vec::new();
    }

    let mut slots = Vec::new();
    let mut start = open;
    while let Some(end) = start.checked_add_minutes(granularity_minutes) {
        if end > close {
            break;
        }
        slots.push(TimeSlot {
            start_time: start,
            end_time: end,
            available: true,
        });
        start = end;
    }
    slots
}
