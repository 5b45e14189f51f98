//! Core scheduling domain model for slotbook.
//!
//! Everything here is plain data: wall-clock times normalized to minutes since
//! midnight, the slot grid value type, the booking entity with its snapshot
//! pricing fields, and the status machine the lifecycle drives.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "slotbook-core";

/// Minutes in one calendar day. `24:00` is a valid end-of-day boundary.
pub const MINUTES_PER_DAY: u32 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeParseError {
    #[error("time '{0}' is not in HH:MM form")]
    Format(String),
    #[error("time '{0}' is outside 00:00..=24:00")]
    OutOfRange(String),
}

/// Wall-clock time of day, stored as minutes since midnight.
///
/// Valid range is `0..=1440`; `1440` only makes sense as an exclusive end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MinuteOfDay(u16);

impl MinuteOfDay {
    pub const MIDNIGHT: MinuteOfDay = MinuteOfDay(0);
    pub const END_OF_DAY: MinuteOfDay = MinuteOfDay(MINUTES_PER_DAY as u16);

    pub fn from_minutes(minutes: u32) -> Option<Self> {
        (minutes <= MINUTES_PER_DAY).then_some(Self(minutes as u16))
    }

    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        if minute >= 60 {
            return None;
        }
        Self::from_minutes(hour.checked_mul(60)?.checked_add(minute)?)
    }

    pub fn from_naive_time(time: NaiveTime) -> Self {
        Self((time.hour() * 60 + time.minute()) as u16)
    }

    pub fn minutes(self) -> u32 {
        u32::from(self.0)
    }

    pub fn hour(self) -> u32 {
        self.minutes() / 60
    }

    pub fn minute(self) -> u32 {
        self.minutes() % 60
    }

    /// Adds minutes without wrapping past the end of the day.
    pub fn checked_add_minutes(self, minutes: u32) -> Option<Self> {
        Self::from_minutes(self.minutes().checked_add(minutes)?)
    }

    /// `None` for `24:00`, which has no `NaiveTime` representation.
    pub fn to_naive_time(self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(self.hour(), self.minute(), 0)
    }

    /// Combines with a calendar date into a UTC instant; `24:00` rolls into the next day.
    pub fn on_date(self, date: NaiveDate) -> DateTime<Utc> {
        let midnight: NaiveDateTime = date.and_time(NaiveTime::MIN);
        (midnight + Duration::minutes(i64::from(self.minutes()))).and_utc()
    }
}

impl fmt::Display for MinuteOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for MinuteOfDay {
    type Err = TimeParseError;

    /// Accepts `HH:MM` and `HH:MM:SS` (seconds must be zero).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let mut parts = raw.split(':');
        let (Some(h), Some(m)) = (parts.next(), parts.next()) else {
            return Err(TimeParseError::Format(s.to_string()));
        };
        let seconds = parts.next();
        if parts.next().is_some() || h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(TimeParseError::Format(s.to_string()));
        }

        let parse = |part: &str| {
            part.parse::<u32>()
                .map_err(|_| TimeParseError::Format(s.to_string()))
        };
        let hour = parse(h)?;
        let minute = parse(m)?;
        if let Some(sec) = seconds {
            if sec.len() != 2 || parse(sec)? != 0 {
                return Err(TimeParseError::Format(s.to_string()));
            }
        }

        Self::from_hm(hour, minute).ok_or_else(|| TimeParseError::OutOfRange(s.to_string()))
    }
}

impl Serialize for MinuteOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MinuteOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Half-open `[start, end)` range within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: MinuteOfDay,
    pub end: MinuteOfDay,
}

impl TimeRange {
    pub fn new(start: MinuteOfDay, end: MinuteOfDay) -> Self {
        Self { start, end }
    }

    /// Touching endpoints do not overlap: `[09:00, 10:00)` and `[10:00, 11:00)` are disjoint.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// One cell of a provider-day slot grid, `[start_time, end_time)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start_time: MinuteOfDay,
    pub end_time: MinuteOfDay,
    pub available: bool,
}

impl TimeSlot {
    pub fn duration_minutes(&self) -> u32 {
        self.end_time.minutes().saturating_sub(self.start_time.minutes())
    }

    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    Refunded,
}

impl BookingStatus {
    /// Statuses that occupy the provider's calendar.
    pub const ACTIVE: [BookingStatus; 3] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::InProgress,
    ];

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::Refunded
        )
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Pending, Refunded)
                | (Confirmed, InProgress)
                | (Confirmed, Cancelled)
                | (Confirmed, Refunded)
                | (InProgress, Completed)
                | (InProgress, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::InProgress => "IN_PROGRESS",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(BookingStatus::Pending),
            "CONFIRMED" => Some(BookingStatus::Confirmed),
            "IN_PROGRESS" => Some(BookingStatus::InProgress),
            "COMPLETED" => Some(BookingStatus::Completed),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            "REFUNDED" => Some(BookingStatus::Refunded),
            _ => None,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Captured,
    Refunded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Captured => "CAPTURED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(PaymentStatus::Pending),
            "CAPTURED" => Some(PaymentStatus::Captured),
            "REFUNDED" => Some(PaymentStatus::Refunded),
            "FAILED" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

/// A bookable offering as exposed by the service catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub name: String,
    pub duration_minutes: u32,
    pub price: Decimal,
    pub is_active: bool,
}

/// The reservation entity.
///
/// `duration_minutes`, `platform_fee` and `provider_earnings` are copied from
/// the service and commission rate at creation and never recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub provider_id: Uuid,
    pub service_id: Uuid,
    pub status: BookingStatus,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: MinuteOfDay,
    pub duration_minutes: u32,
    pub total_price: Decimal,
    pub platform_fee: Decimal,
    pub provider_earnings: Decimal,
    pub payment_status: PaymentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// `None` only if the stored duration would run past midnight.
    pub fn end_time(&self) -> Option<MinuteOfDay> {
        self.scheduled_time.checked_add_minutes(self.duration_minutes)
    }

    pub fn time_range(&self) -> Option<TimeRange> {
        Some(TimeRange::new(self.scheduled_time, self.end_time()?))
    }

    pub fn starts_at(&self) -> DateTime<Utc> {
        self.scheduled_time.on_date(self.scheduled_date)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Appends a line to the free-text notes.
    pub fn append_note(&mut self, line: &str) {
        self.notes = Some(match self.notes.take() {
            Some(existing) if !existing.is_empty() => format!("{existing}\n{line}"),
            _ => line.to_string(),
        });
    }

    pub fn apply(&mut self, patch: &BookingPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(date) = patch.scheduled_date {
            self.scheduled_date = date;
        }
        if let Some(time) = patch.scheduled_time {
            self.scheduled_time = time;
        }
        if let Some(payment_status) = patch.payment_status {
            self.payment_status = payment_status;
        }
        if let Some(notes) = &patch.notes {
            self.notes = Some(notes.clone());
        }
        self.updated_at = patch.updated_at;
    }
}

/// Partial update handed to the booking repository.
///
/// `expected_status` is compared against the stored row under the store's
/// lock; a mismatch means another writer got there first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingPatch {
    pub expected_status: Option<BookingStatus>,
    pub status: Option<BookingStatus>,
    pub scheduled_date: Option<NaiveDate>,
    pub scheduled_time: Option<MinuteOfDay>,
    pub payment_status: Option<PaymentStatus>,
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl BookingPatch {
    pub fn at(updated_at: DateTime<Utc>) -> Self {
        Self {
            expected_status: None,
            status: None,
            scheduled_date: None,
            scheduled_time: None,
            payment_status: None,
            notes: None,
            updated_at,
        }
    }

    /// Guards the write on the status the caller validated against.
    pub fn expecting(mut self, status: BookingStatus) -> Self {
        self.expected_status = Some(status);
        self
    }

    pub fn moves_schedule(&self) -> bool {
        self.scheduled_date.is_some() || self.scheduled_time.is_some()
    }

    /// True when `current` is still in the status this patch was built from.
    pub fn applies_to(&self, current: &Booking) -> bool {
        self.expected_status.map_or(true, |s| s == current.status)
    }
}

/// Public result shape returned to callers of the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSummary {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub provider_id: Uuid,
    pub service_id: Uuid,
    pub status: BookingStatus,
    pub scheduled_date: NaiveDate,
    pub start_time: MinuteOfDay,
    pub end_time: Option<MinuteOfDay>,
    pub duration_minutes: u32,
    pub total_price: Decimal,
    pub platform_fee: Decimal,
    pub provider_earnings: Decimal,
    pub payment_status: PaymentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Booking> for BookingSummary {
    fn from(b: &Booking) -> Self {
        Self {
            id: b.id,
            customer_id: b.customer_id,
            provider_id: b.provider_id,
            service_id: b.service_id,
            status: b.status,
            scheduled_date: b.scheduled_date,
            start_time: b.scheduled_time,
            end_time: b.end_time(),
            duration_minutes: b.duration_minutes,
            total_price: b.total_price,
            platform_fee: b.platform_fee,
            provider_earnings: b.provider_earnings,
            payment_status: b.payment_status,
            notes: b.notes.clone(),
            created_at: b.created_at,
            updated_at: b.updated_at,
        }
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn mk_booking(time: &str, duration: u32) -> Booking {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).single().unwrap();
        Booking {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            service_id: Uuid::new_v4(),
            status: BookingStatus::Pending,
            scheduled_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            scheduled_time: time.parse().unwrap(),
            duration_minutes: duration,
            total_price: dec!(100.00),
            platform_fee: dec!(15.00),
            provider_earnings: dec!(85.00),
            payment_status: PaymentStatus::Pending,
            notes: None,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn minute_of_day_parses_and_formats() {
        let t: MinuteOfDay = "09:30".parse().unwrap();
        assert_eq!(t.minutes(), 570);
        assert_eq!(t.to_string(), "09:30");
        assert_eq!("7:05".parse::<MinuteOfDay>().unwrap().minutes(), 425);
        assert_eq!("10:00:00".parse::<MinuteOfDay>().unwrap().minutes(), 600);
        assert_eq!("24:00".parse::<MinuteOfDay>().unwrap(), MinuteOfDay::END_OF_DAY);
    }

    #[test]
    fn minute_of_day_rejects_malformed_input() {
        assert!(matches!("25:00".parse::<MinuteOfDay>(), Err(TimeParseError::OutOfRange(_))));
        assert!(matches!("24:30".parse::<MinuteOfDay>(), Err(TimeParseError::OutOfRange(_))));
        assert!(matches!("10:60".parse::<MinuteOfDay>(), Err(TimeParseError::OutOfRange(_))));
        assert!(matches!("10".parse::<MinuteOfDay>(), Err(TimeParseError::Format(_))));
        assert!(matches!("10:5".parse::<MinuteOfDay>(), Err(TimeParseError::Format(_))));
        assert!(matches!("10:00:30".parse::<MinuteOfDay>(), Err(TimeParseError::Format(_))));
        assert!(matches!("ab:cd".parse::<MinuteOfDay>(), Err(TimeParseError::Format(_))));
    }

    #[test]
    fn checked_add_stops_at_midnight() {
        let late: MinuteOfDay = "23:30".parse().unwrap();
        assert_eq!(late.checked_add_minutes(30), Some(MinuteOfDay::END_OF_DAY));
        assert_eq!(late.checked_add_minutes(31), None);
    }

    #[test]
    fn minute_of_day_serializes_as_clock_string() {
        let slot = TimeSlot {
            start_time: "09:00".parse().unwrap(),
            end_time: "09:30".parse().unwrap(),
            available: true,
        };
        let json = serde_json::to_string(&slot).unwrap();
        assert_eq!(json, r#"{"start_time":"09:00","end_time":"09:30","available":true}"#);
        let back: TimeSlot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, slot);
    }

    #[test]
    fn status_machine_never_leaves_terminal_states() {
        use BookingStatus::*;
        let all = [Pending, Confirmed, InProgress, Completed, Cancelled, Refunded];
        for from in [Completed, Cancelled, Refunded] {
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
        for from in all {
            assert!(!from.can_transition_to(Pending));
        }
        assert!(Pending.can_transition_to(Confirmed));
        assert!(InProgress.can_transition_to(Cancelled));
        assert!(!InProgress.can_transition_to(Refunded));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn status_strings_round_trip() {
        use BookingStatus::*;
        for s in [Pending, Confirmed, InProgress, Completed, Cancelled, Refunded] {
            assert_eq!(BookingStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(BookingStatus::parse("pending"), None);
    }

    #[test]
    fn booking_end_time_is_derived_from_duration() {
        let booking = mk_booking("10:00", 60);
        assert_eq!(booking.end_time().unwrap().to_string(), "11:00");
        assert_eq!(
            booking.starts_at(),
            Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).single().unwrap()
        );
        let summary = BookingSummary::from(&booking);
        assert_eq!(summary.end_time, booking.end_time());
    }

    #[test]
    fn notes_append_on_new_line() {
        let mut booking = mk_booking("10:00", 60);
        booking.append_note("first");
        booking.append_note("second");
        assert_eq!(booking.notes.as_deref(), Some("first\nsecond"));
    }

    #[test]
    fn patch_applies_only_present_fields() {
        let mut booking = mk_booking("10:00", 60);
        let later = booking.updated_at + Duration::hours(1);
        let mut patch = BookingPatch::at(later);
        patch.status = Some(BookingStatus::Confirmed);
        booking.apply(&patch);
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.scheduled_time.to_string(), "10:00");
        assert_eq!(booking.updated_at, later);
        assert!(!patch.moves_schedule());
    }

    #[test]
    fn patch_expecting_a_status_rejects_a_moved_row() {
        let mut booking = mk_booking("10:00", 60);
        let patch = BookingPatch::at(booking.updated_at).expecting(BookingStatus::Pending);
        assert!(patch.applies_to(&booking));
        booking.status = BookingStatus::Cancelled;
        assert!(!patch.applies_to(&booking));
        assert!(BookingPatch::at(booking.updated_at).applies_to(&booking));
    }

    #[test]
    fn fixed_clock_advances() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().unwrap();
        let clock = FixedClock::new(start);
        clock.advance(Duration::hours(2));
        assert_eq!(clock.now(), start + Duration::hours(2));
    }
}
