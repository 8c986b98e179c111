use anyhow::{bail, Context, Result};
use clap::Parser;
use edgebot_core::config_loader::ConfigLoader;
use edgebot_core::types::MarginMode;
use edgebot_engine::{run_cycle, CycleOptions, DirectionChoice, NewsMode, TrendFallback};
use edgebot_exchange_binance::BinanceClient;
use edgebot_execution::EntryStyle;
use std::sync::Arc;
use tracing::info;

/// One scan cycle against Binance USDⓈ-M futures. Scheduling cadence is
/// external; run this from cron or a loop wrapper.
#[derive(Parser)]
#[command(name = "edgebot")]
#[command(about = "Confluence-based derivatives scanner and executor", long_about = None)]
struct Cli {
    /// Place real orders; without this the cycle only prints plans
    #[arg(long)]
    execute: bool,

    /// Print plans without placing orders, even with --execute
    #[arg(long)]
    dry_run: bool,

    /// Attach missing SL/TP to open positions and exit
    #[arg(long)]
    protect: bool,

    /// Skip the reference trend gate entirely
    #[arg(long)]
    ignore_trend: bool,

    /// Force relaxed mode
    #[arg(long)]
    relaxed: bool,

    /// Scan direction override: long, short, or both
    #[arg(long, value_name = "DIR")]
    override_direction: Option<DirectionChoice>,

    /// Entry order style: stop or retest
    #[arg(long, default_value = "stop")]
    entry_style: String,

    /// Margin mode: ISOLATED or CROSSED
    #[arg(long, default_value = "CROSSED")]
    margin: String,

    /// When the trend is not aligned: none, relaxed, or ignore
    #[arg(long, default_value = "relaxed")]
    fallback_on_trend: TrendFallback,

    /// Override the mode's universe score floor
    #[arg(long)]
    min_score: Option<f64>,

    /// Pullback and breakout-retest triggers only
    #[arg(long)]
    only_core_triggers: bool,

    /// News awareness: off, auto, or force
    #[arg(long, default_value = "off")]
    news_mode: NewsMode,

    /// Config file path
    #[arg(long, default_value = "config/Config.toml")]
    config: String,
}

fn parse_entry_style(s: &str) -> Result<EntryStyle> {
    match s {
        "stop" => Ok(EntryStyle::StopLimit),
        "retest" => Ok(EntryStyle::RetestLimit),
        other => bail!("unknown entry style {other:?} (expected stop or retest)"),
    }
}

fn parse_margin(s: &str) -> Result<MarginMode> {
    match s.to_uppercase().as_str() {
        "ISOLATED" => Ok(MarginMode::Isolated),
        "CROSSED" => Ok(MarginMode::Crossed),
        other => bail!("unknown margin mode {other:?} (expected ISOLATED or CROSSED)"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = ConfigLoader::load_from(&cli.config)?;

    // Dry runs work without credentials; signed endpoints then fall back
    // to demo equity and empty account state.
    let (api_key, api_secret) = if cli.execute || cli.protect {
        (
            std::env::var("BINANCE_API_KEY").context("BINANCE_API_KEY not set")?,
            std::env::var("BINANCE_API_SECRET").context("BINANCE_API_SECRET not set")?,
        )
    } else {
        (
            std::env::var("BINANCE_API_KEY").unwrap_or_default(),
            std::env::var("BINANCE_API_SECRET").unwrap_or_default(),
        )
    };
    let client = Arc::new(BinanceClient::new(api_key, api_secret));

    let opts = CycleOptions {
        execute: cli.execute,
        dry_run: cli.dry_run,
        protect_only: cli.protect,
        ignore_trend: cli.ignore_trend,
        relaxed: cli.relaxed,
        override_direction: cli.override_direction,
        entry_style: parse_entry_style(&cli.entry_style)?,
        margin: parse_margin(&cli.margin)?,
        fallback_on_trend: cli.fallback_on_trend,
        min_score: cli.min_score,
        only_core_triggers: cli.only_core_triggers,
        news_mode: cli.news_mode,
    };

    let report = run_cycle(client, &cfg, &opts).await?;
    match report.halted {
        Some(reason) => info!(mode = report.mode.as_str(), reason, "cycle halted"),
        None => info!(
            mode = report.mode.as_str(),
            plans = report.plans.len(),
            executed = report.executed.len(),
            "cycle complete"
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_style_and_margin_parsing() {
        assert_eq!(parse_entry_style("stop").unwrap(), EntryStyle::StopLimit);
        assert_eq!(parse_entry_style("retest").unwrap(), EntryStyle::RetestLimit);
        assert!(parse_entry_style("market").is_err());

        assert_eq!(parse_margin("crossed").unwrap(), MarginMode::Crossed);
        assert_eq!(parse_margin("ISOLATED").unwrap(), MarginMode::Isolated);
        assert!(parse_margin("cash").is_err());
    }

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::parse_from([
            "edgebot",
            "--execute",
            "--entry-style",
            "retest",
            "--override-direction",
            "short",
            "--news-mode",
            "auto",
            "--min-score",
            "0.55",
        ]);
        assert!(cli.execute);
        assert_eq!(cli.entry_style, "retest");
        assert_eq!(cli.override_direction, Some(DirectionChoice::Short));
        assert_eq!(cli.news_mode, NewsMode::Auto);
        assert_eq!(cli.min_score, Some(0.55));
        assert_eq!(cli.fallback_on_trend, TrendFallback::Relaxed);
    }
}
