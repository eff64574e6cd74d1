//! Rental Check - offline lifecycle evaluation
//!
//! Reads a rental record (booking plus handover sessions) from a JSON file
//! and prints the derived lifecycle view for one viewer on one day.
//!
//! Usage:
//!   rental-check record.json --viewer <user-uuid>
//!   rental-check record.json --viewer <user-uuid> --today 2024-01-10 --owner-may-initiate

use anyhow::Context;
use carshare::domain::booking::RentalRecord;
use carshare::domain::lifecycle::{derive_view, HandoverPolicy};
use carshare::domain::types::UserId;
use chrono::{NaiveDate, Utc};
use clap::Parser;
use std::path::PathBuf;
use time::format_description::well_known::Rfc3339;
use tracing::debug;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Rental Check - derive the rental state of a booking
#[derive(Parser, Debug)]
#[command(name = "rental-check", version, about, long_about = None)]
struct Args {
    /// JSON file with `booking` and `sessions`
    record: PathBuf,

    /// User viewing the rental
    #[arg(short, long)]
    viewer: UserId,

    /// Evaluation date (YYYY-MM-DD), defaults to today in UTC
    #[arg(short, long)]
    today: Option<NaiveDate>,

    /// Let owners start pickup and return
    #[arg(long)]
    owner_may_initiate: bool,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::new(Rfc3339))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let content = std::fs::read_to_string(&args.record)
        .with_context(|| format!("Failed to read rental record {}", args.record.display()))?;
    let record: RentalRecord = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse rental record {}", args.record.display()))?;

    let today = args.today.unwrap_or_else(|| Utc::now().date_naive());
    let policy = HandoverPolicy { owner_may_initiate: args.owner_may_initiate };
    debug!(booking_id = %record.booking.id, today = %today, "rental_check");

    let view = derive_view(&record, args.viewer, today, policy);
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}
