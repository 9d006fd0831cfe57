//! Costflow stock ledger reposter.
//!
//! Recomputes every movement posted at or after a point in time and
//! reconciles the ledger entries of every voucher it touches.
//!
//! Usage:
//!   reposter <YYYY-MM-DD> [HH:MM:SS] [ITEM@LOCATION ...]
//!
//! Without pairs, every pair with a movement at or after the posting time is
//! reposted.

use std::collections::BTreeSet;

use anyhow::{Context, bail};
use chrono::{NaiveDate, NaiveTime};
use costflow_core::repost::RepostTrigger;
use costflow_core::stock::{PostingTime, StockPair};
use costflow_db::{LocationAccountRepository, StockLedgerRepository, connect_with};
use costflow_shared::AppConfig;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parsed command line.
#[derive(Debug, PartialEq, Eq)]
struct Args {
    from: PostingTime,
    pairs: BTreeSet<StockPair>,
}

fn parse_args<I>(args: I) -> anyhow::Result<Args>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().peekable();
    let date = args
        .next()
        .context("usage: reposter <YYYY-MM-DD> [HH:MM:SS] [ITEM@LOCATION ...]")?;
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .with_context(|| format!("invalid posting date {date}"))?;

    let time = match args.peek() {
        Some(arg) if !arg.contains('@') => {
            let time = NaiveTime::parse_from_str(arg, "%H:%M:%S")
                .with_context(|| format!("invalid posting time {arg}"))?;
            args.next();
            time
        }
        _ => NaiveTime::MIN,
    };

    let mut pairs = BTreeSet::new();
    for arg in args {
        let Some((item, location)) = arg.split_once('@') else {
            bail!("invalid stock pair {arg}, expected ITEM@LOCATION");
        };
        if item.trim().is_empty() || location.trim().is_empty() {
            bail!("invalid stock pair {arg}, expected ITEM@LOCATION");
        }
        pairs.insert(StockPair::new(item, location));
    }

    Ok(Args {
        from: PostingTime::new(date, time),
        pairs,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "costflow=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    let config = AppConfig::load().context("failed to load configuration")?;

    let db = connect_with(&config.database).await?;
    info!("Connected to database");

    let accounts = LocationAccountRepository::new(db.clone()).load().await?;
    if accounts.is_empty() {
        warn!("No location stock accounts configured, ledger entries cannot be derived");
    }
    let repository = StockLedgerRepository::from_config(db, &config, accounts);

    let pairs = if args.pairs.is_empty() {
        repository.pairs_since(&args.from).await?
    } else {
        args.pairs
    };
    if pairs.is_empty() {
        info!(from = %args.from, "Nothing to repost");
        return Ok(());
    }

    let trigger = RepostTrigger::after(args.from.date, args.from.time).for_pairs(pairs);
    let report = repository.repost(trigger).await?;

    for failure in report
        .repost
        .failures
        .iter()
        .chain(&report.reconciliation.failures)
    {
        warn!(
            voucher = %failure.voucher,
            code = failure.error.error_code(),
            error = %failure.error,
            "Voucher left unreconciled"
        );
    }
    info!(
        repost_id = %report.repost_id,
        recomputed = report.repost.recomputed,
        updated = report.repost.updates.len(),
        written = report.reconciliation.written().len(),
        "Repost complete"
    );

    if !report.is_clean() {
        bail!(
            "{} voucher(s) could not be reposted or reconciled",
            report.repost.failures.len() + report.reconciliation.failures.len()
        );
    }
    Ok(())
}
