//! Postgres-backed booking repository, service catalog and provider directory.
//!
//! Placement is serialized per provider-day with a transaction-scoped advisory
//! lock; the partial unique index from `migrations/` backs it up. Overlap is
//! compared in minutes since midnight so a booking ending at 24:00 never wraps.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use slotbook_core::{
    Booking, BookingPatch, BookingStatus, MinuteOfDay, PaymentStatus, Service, TimeRange,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::{BookingRepository, ProviderDirectory, ServiceCatalog, StoreError, StoreResult};

const BOOKING_COLUMNS: &str = r#"
    id, customer_id, provider_id, service_id, status, scheduled_date, scheduled_time,
    duration_minutes, total_price, platform_fee, provider_earnings, payment_status,
    notes, created_at, updated_at
"#;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("connecting to postgres: {e}")))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("running migrations: {e}")))
    }

    async fn lock_provider_day(
        tx: &mut Transaction<'_, Postgres>,
        provider_id: Uuid,
        date: NaiveDate,
    ) -> StoreResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("{provider_id}:{date}"))
            .execute(&mut **tx)
            .await
            .map_err(map_db_error)?;
        Ok(())
    }

    async fn ensure_no_overlap(
        tx: &mut Transaction<'_, Postgres>,
        candidate: &Booking,
    ) -> StoreResult<()> {
        let range = candidate_range(candidate)?;
        let active = BookingStatus::ACTIVE.map(|s| s.as_str().to_string()).to_vec();
        let clash: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM bookings
                 WHERE provider_id = $1
                   AND scheduled_date = $2
                   AND id <> $3
                   AND status = ANY($4)
                   AND (EXTRACT(EPOCH FROM scheduled_time) / 60)::int < $6
                   AND (EXTRACT(EPOCH FROM scheduled_time) / 60)::int + duration_minutes > $5
            )
            "#,
        )
        .bind(candidate.provider_id)
        .bind(candidate.scheduled_date)
        .bind(candidate.id)
        .bind(active)
        .bind(range.start.minutes() as i32)
        .bind(range.end.minutes() as i32)
        .fetch_one(&mut **tx)
        .await
        .map_err(map_db_error)?;

        if clash {
            return Err(StoreError::Conflict(format!(
                "provider {} already booked around {} on {}",
                candidate.provider_id, candidate.scheduled_time, candidate.scheduled_date
            )));
        }
        Ok(())
    }
}

fn candidate_range(booking: &Booking) -> StoreResult<TimeRange> {
    booking
        .time_range()
        .ok_or_else(|| StoreError::InvalidRecord(format!("booking {} runs past midnight", booking.id)))
}

fn start_time_column(time: MinuteOfDay) -> StoreResult<NaiveTime> {
    time.to_naive_time()
        .ok_or_else(|| StoreError::InvalidRecord(format!("{time} is not a valid start time")))
}

fn map_db_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::Conflict(db.message().to_string());
        }
    }
    if matches!(
        err,
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
    ) {
        return StoreError::Unavailable(err.to_string());
    }
    StoreError::Database(err)
}

fn booking_from_row(row: &PgRow) -> StoreResult<Booking> {
    let status: String = row.try_get("status")?;
    let payment_status: String = row.try_get("payment_status")?;
    let scheduled_time: NaiveTime = row.try_get("scheduled_time")?;
    let duration: i32 = row.try_get("duration_minutes")?;

    Ok(Booking {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        provider_id: row.try_get("provider_id")?,
        service_id: row.try_get("service_id")?,
        status: BookingStatus::parse(&status)
            .ok_or_else(|| StoreError::InvalidRecord(format!("unknown booking status {status}")))?,
        scheduled_date: row.try_get("scheduled_date")?,
        scheduled_time: MinuteOfDay::from_naive_time(scheduled_time),
        duration_minutes: u32::try_from(duration)
            .map_err(|_| StoreError::InvalidRecord(format!("negative duration {duration}")))?,
        total_price: row.try_get::<Decimal, _>("total_price")?,
        platform_fee: row.try_get::<Decimal, _>("platform_fee")?,
        provider_earnings: row.try_get::<Decimal, _>("provider_earnings")?,
        payment_status: PaymentStatus::parse(&payment_status).ok_or_else(|| {
            StoreError::InvalidRecord(format!("unknown payment status {payment_status}"))
        })?,
        notes: row.try_get("notes")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

#[async_trait]
impl BookingRepository for PgStore {
    async fn find_active_by_provider_and_date(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
    ) -> StoreResult<Vec<Booking>> {
        let active = BookingStatus::ACTIVE.map(|s| s.as_str().to_string()).to_vec();
        let rows = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
              WHERE provider_id = $1 AND scheduled_date = $2 AND status = ANY($3)
              ORDER BY scheduled_time, created_at"
        ))
        .bind(provider_id)
        .bind(date)
        .bind(active)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        rows.iter().map(booking_from_row).collect()
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        let row = sqlx::query(&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        row.as_ref().map(booking_from_row).transpose()
    }

    async fn insert(&self, booking: Booking) -> StoreResult<Booking> {
        let span = info_span!("pg_insert_booking", booking_id = %booking.id, provider_id = %booking.provider_id);
        self.insert_serialized(booking).instrument(span).await
    }

    async fn update(&self, id: Uuid, patch: &BookingPatch) -> StoreResult<Booking> {
        let span = info_span!("pg_update_booking", booking_id = %id);
        self.update_serialized(id, patch).instrument(span).await
    }
}

impl PgStore {
    async fn insert_serialized(&self, booking: Booking) -> StoreResult<Booking> {
        let start = start_time_column(booking.scheduled_time)?;
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;
        Self::lock_provider_day(&mut tx, booking.provider_id, booking.scheduled_date).await?;
        Self::ensure_no_overlap(&mut tx, &booking).await?;

        sqlx::query(
            r#"
            INSERT INTO bookings (
                id, customer_id, provider_id, service_id, status, scheduled_date, scheduled_time,
                duration_minutes, total_price, platform_fee, provider_earnings, payment_status,
                notes, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(booking.id)
        .bind(booking.customer_id)
        .bind(booking.provider_id)
        .bind(booking.service_id)
        .bind(booking.status.as_str())
        .bind(booking.scheduled_date)
        .bind(start)
        .bind(booking.duration_minutes as i32)
        .bind(booking.total_price)
        .bind(booking.platform_fee)
        .bind(booking.provider_earnings)
        .bind(booking.payment_status.as_str())
        .bind(booking.notes.as_deref())
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_db_error)?;

        tx.commit().await.map_err(map_db_error)?;
        Ok(booking)
    }

    async fn update_serialized(&self, id: Uuid, patch: &BookingPatch) -> StoreResult<Booking> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;
        let row = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_error)?
        .ok_or_else(|| StoreError::NotFound(format!("booking {id}")))?;

        let mut next = booking_from_row(&row)?;
        if !patch.applies_to(&next) {
            return Err(StoreError::Conflict(format!(
                "booking {id} is already {}",
                next.status
            )));
        }
        next.apply(patch);

        if patch.moves_schedule() && next.is_active() {
            Self::lock_provider_day(&mut tx, next.provider_id, next.scheduled_date).await?;
            Self::ensure_no_overlap(&mut tx, &next).await?;
        }

        sqlx::query(
            r#"
            UPDATE bookings
               SET status = $2, scheduled_date = $3, scheduled_time = $4,
                   payment_status = $5, notes = $6, updated_at = $7
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(next.status.as_str())
        .bind(next.scheduled_date)
        .bind(start_time_column(next.scheduled_time)?)
        .bind(next.payment_status.as_str())
        .bind(next.notes.as_deref())
        .bind(next.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_db_error)?;

        tx.commit().await.map_err(map_db_error)?;
        Ok(next)
    }
}

#[async_trait]
impl ServiceCatalog for PgStore {
    async fn get_active_service(&self, service_id: Uuid) -> StoreResult<Option<Service>> {
        let row = sqlx::query(
            r#"
            SELECT id, provider_id, name, duration_minutes, price, is_active
              FROM services
             WHERE id = $1 AND is_active
            "#,
        )
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let duration: i32 = row.try_get("duration_minutes")?;
        Ok(Some(Service {
            id: row.try_get("id")?,
            provider_id: row.try_get("provider_id")?,
            name: row.try_get("name")?,
            duration_minutes: u32::try_from(duration)
                .map_err(|_| StoreError::InvalidRecord(format!("negative duration {duration}")))?,
            price: row.try_get("price")?,
            is_active: row.try_get("is_active")?,
        }))
    }
}

#[async_trait]
impl ProviderDirectory for PgStore {
    async fn is_active_provider(&self, provider_id: Uuid) -> StoreResult<bool> {
        let active: Option<bool> =
            sqlx::query_scalar("SELECT is_active FROM providers WHERE id = $1")
                .bind(provider_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_db_error)?;
        Ok(active.unwrap_or(false))
    }
}
