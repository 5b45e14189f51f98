use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use slotbook_core::{MinuteOfDay, Service, SystemClock, TimeSlot};
use slotbook_engine::{
    CreateBookingRequest, EngineConfig, InMemoryMarketplace, RescheduleRequest, SchedulingEngine,
};
use slotbook_storage::PgStore;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "slotbook")]
#[command(about = "Booking scheduling and availability engine")]
struct Cli {
    /// YAML config file; without it `SLOTBOOK_*` environment variables are used.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the canonical slot grid.
    Slots,
    /// Availability for a demo provider after placing the given bookings.
    Availability {
        /// Day to inspect (defaults to tomorrow).
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Start time of an existing booking, repeatable (HH:MM).
        #[arg(long = "booked")]
        booked: Vec<MinuteOfDay>,
        #[arg(long, default_value_t = 60)]
        duration: u32,
    },
    /// Walk one booking through create, reschedule and cancel in memory.
    Demo,
    /// Apply database migrations.
    Migrate,
    /// Validate a config file and print the resolved settings.
    CheckConfig { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slotbook_cli=info,slotbook_engine=info,slotbook_storage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Slots) {
        Commands::Slots => {
            let config = load_config(cli.config.as_deref())?;
            print_grid(&config.grid().generate());
        }
        Commands::Availability {
            date,
            booked,
            duration,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let date = date.unwrap_or_else(|| Utc::now().date_naive() + Duration::days(1));
            let (market, provider_id, service_id) = demo_market(duration, Decimal::new(4500, 2)).await;
            let engine = market.engine(config)?;
            for start in booked {
                let summary = engine
                    .create_booking(CreateBookingRequest {
                        customer_id: Uuid::new_v4(),
                        provider_id,
                        service_id,
                        date,
                        start_time: start,
                        notes: None,
                    })
                    .await
                    .with_context(|| format!("placing booking at {date} {start}"))?;
                info!(booking_id = %summary.id, %start, "booking placed");
            }
            let slots = engine
                .get_availability(provider_id, service_id, date)
                .await?;
            println!("availability for {date}:");
            print_grid(&slots);
        }
        Commands::Demo => {
            let config = load_config(cli.config.as_deref())?;
            run_demo(config).await?;
        }
        Commands::Migrate => {
            let config = load_config(cli.config.as_deref())?;
            let store = PgStore::connect(&config.database_url, config.database_max_connections)
                .await
                .context("connecting to database")?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::CheckConfig { path } => {
            let config = EngineConfig::from_yaml_file(&path)?;
            println!("{} is valid", path.display());
            println!("{config:#?}");
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::from_yaml_file(path)?,
        None => EngineConfig::from_env(),
    };
    config.validate()?;
    Ok(config)
}

fn print_grid(slots: &[TimeSlot]) {
    for slot in slots {
        let state = if slot.available { "free" } else { "taken" };
        println!("{}-{}  {state}", slot.start_time, slot.end_time);
    }
}

async fn demo_market(duration: u32, price: Decimal) -> (InMemoryMarketplace, Uuid, Uuid) {
    let market = InMemoryMarketplace::new(Arc::new(SystemClock));
    let provider_id = Uuid::new_v4();
    let service_id = Uuid::new_v4();
    market
        .add_provider_service(
            provider_id,
            Service {
                id: service_id,
                provider_id,
                name: "Demo service".to_string(),
                duration_minutes: duration,
                price,
                is_active: true,
            },
        )
        .await;
    (market, provider_id, service_id)
}

async fn run_demo(config: EngineConfig) -> Result<()> {
    let (market, provider_id, service_id) = demo_market(60, Decimal::new(10000, 2)).await;
    let engine: SchedulingEngine = market.engine(config)?;
    let customer_id = Uuid::new_v4();
    let day = Utc::now().date_naive() + Duration::days(3);
    let opens = engine.config().grid().opens_at();
    let start = opens
        .checked_add_minutes(60)
        .context("working day too short for the demo")?;

    let created = engine
        .create_booking(CreateBookingRequest {
            customer_id,
            provider_id,
            service_id,
            date: day,
            start_time: start,
            notes: Some("first visit".to_string()),
        })
        .await?;
    println!("created:\n{}", serde_json::to_string_pretty(&created)?);

    let rival = engine
        .create_booking(CreateBookingRequest {
            customer_id: Uuid::new_v4(),
            provider_id,
            service_id,
            date: day,
            start_time: start,
            notes: None,
        })
        .await;
    if let Err(err) = rival {
        println!("second booking at {start} rejected: {err}");
    }

    let moved = engine
        .reschedule_booking(RescheduleRequest {
            booking_id: created.id,
            customer_id,
            new_date: day + Duration::days(1),
            new_start_time: opens,
            notes: Some("moved to the morning".to_string()),
        })
        .await?;
    println!("rescheduled to {} {}", moved.scheduled_date, moved.start_time);

    let outcome = engine
        .cancel_booking(created.id, customer_id, "demo finished")
        .await?;
    println!(
        "cancelled {:.1}h ahead, refund quote: {}",
        outcome.hours_until_booking,
        outcome
            .refund_amount
            .map(|r| r.to_string())
            .unwrap_or_else(|| "none (payment not captured)".to_string())
    );

    println!("events:");
    for event in market.events.notifications().await {
        println!("  {event:?}");
    }
    for entry in market.events.audit_entries().await {
        println!("  audit {} {}", entry.action, entry.description);
    }
    Ok(())
}
