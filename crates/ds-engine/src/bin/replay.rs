//! Replay a ticker's days around a reference date.
//!
//! Usage: `ds-replay [TICKER] [YYYY-MM-DD] [TIMEFRAME]`
//!
//! Bars come from `DAYSLIDE_CSV_DIR` (files named `{ticker}_{timeframe}.csv`)
//! when set, otherwise from the synthetic sample source.

use anyhow::Context;
use chrono::Utc;
use ds_data::{BarSource, CsvBarSource, DayWindowBuilder, PrefetchOrchestrator, PrefetchRequest, SampleBarSource, TradingCalendar};
use ds_engine::{ChartInspector, EngineConfig, NavAction};
use ds_types::Timeframe;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let ticker = args.next().unwrap_or_else(|| "AAPL".to_string());
    let date = args.next().unwrap_or_else(|| "2025-11-28".to_string());
    let timeframe: Timeframe = args
        .next()
        .unwrap_or_else(|| "1d".to_string())
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let config = EngineConfig::from_env().context("failed to load engine config")?;
    let calendar = Arc::new(config.build_calendar()?);
    let reference_day = TradingCalendar::parse_date(&date)?;

    let source: Arc<dyn BarSource> = match std::env::var("DAYSLIDE_CSV_DIR") {
        Ok(dir) => Arc::new(CsvBarSource::new(dir)),
        Err(_) => Arc::new(SampleBarSource::new(calendar.as_ref().clone())),
    };
    println!("Bar source: {}", source.name());

    let builder = DayWindowBuilder::new(source, Arc::clone(&calendar), config.window.clone());
    let orchestrator = PrefetchOrchestrator::new(builder, config.prefetch.clone(), Utc::now())?;
    let request = PrefetchRequest::new(&ticker, reference_day, timeframe, i64::from(config.max_days))?;

    let mut inspector = ChartInspector::open(orchestrator, request, config.min_backward_offset)?;
    let report = inspector
        .wait_prefetch()
        .await?
        .context("prefetch already consumed")?;

    println!(
        "{} {} around {}: {}/{} days loaded, failed offsets {:?}",
        inspector.ticker(),
        timeframe,
        inspector.state().reference_day(),
        report.completed,
        report.requested,
        report.failed_offsets
    );
    if let Some(requested) = inspector.state().adjusted_from() {
        println!("{requested} is not a trading day; using {}", inspector.state().reference_day());
    }

    // Walk from the earliest reachable day to the latest
    inspector.navigate(NavAction::GoToOffset(inspector.state().min_backward_offset()));
    loop {
        let state = inspector.state().clone();
        match inspector.load_current().await {
            Some(day) if day.complete => {
                let last = day.last_bar().map(|b| b.close.to_string()).unwrap_or_default();
                println!(
                    "  {:>+3}  {}  {:>4} bars  last close {}",
                    state.offset(),
                    state.current_day(),
                    day.bars.len(),
                    last
                );
            }
            Some(day) => println!(
                "  {:>+3}  {}  no data: {}",
                state.offset(),
                state.current_day(),
                day.error.as_deref().unwrap_or("unknown")
            ),
            None => println!("  {:>+3}  {}  unavailable", state.offset(), state.current_day()),
        }

        if !state.can_go_forward() {
            break;
        }
        inspector.navigate(NavAction::NextDay);
    }

    let stats = inspector.close().get_stats();
    println!(
        "Cache: {} stores, {} hits, {} misses",
        stats.stores, stats.hits, stats.misses
    );
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
