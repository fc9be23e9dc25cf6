use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use device_bid_tuner::config::{Config, ConfigOverrides};
use device_bid_tuner::output::csv::{decisions_to_csv, history_to_csv};
use device_bid_tuner::output::json::{render_json, render_json_lines};
use device_bid_tuner::output::table::{
    render_decisions_table, render_history_table, render_run_summary,
};
use device_bid_tuner::platform::build_platform;
use device_bid_tuner::runner::{BidTuner, RunReport};
use device_bid_tuner::snapshot::store::{DecisionRecord, DecisionStore};
use device_bid_tuner::types::CampaignId;
use device_bid_tuner::window::DateRange;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Jsonl,
    Csv,
}

#[derive(Debug, Parser)]
#[command(
    name = "device-bid-tuner",
    about = "Nudge device bid adjustments toward relative revenue per click"
)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run every configured window once.
    Run {
        #[arg(long)]
        step: Option<f64>,
        #[arg(long = "min-conversions")]
        min_conversions: Option<u32>,
        /// Repeatable; replaces the configured windows, in order.
        #[arg(long = "window")]
        windows: Vec<DateRange>,
        /// Serve collaborators from a JSON fixture instead of the HTTP API.
        #[arg(long)]
        fixture: Option<String>,
        #[arg(long = "sync-markers")]
        sync_markers: bool,
        #[arg(long = "dry-run")]
        dry_run: bool,
        #[arg(long = "no-persist")]
        no_persist: bool,
    },
    History {
        #[arg(long)]
        campaign: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    Config {
        #[arg(long)]
        init: bool,
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(Some(&config_path))?;

    match cli.command {
        Commands::Config { init, show } => handle_config_command(init, show, &config, &config_path),
        Commands::History { campaign, limit } => {
            let store = DecisionStore::open(&config.resolved_db_path())?;
            let campaign = campaign.map(CampaignId::from);
            let records = store.load_history(campaign.as_ref(), limit)?;
            print_history(&records, cli.output)
        }
        Commands::Run {
            step,
            min_conversions,
            windows,
            fixture,
            sync_markers,
            dry_run,
            no_persist,
        } => {
            config.apply_overrides(ConfigOverrides {
                step,
                min_conversions,
                windows: (!windows.is_empty()).then_some(windows),
                fixture_path: fixture,
                sync_markers: sync_markers.then_some(true),
            });
            let run_config = config.run_configuration(dry_run)?;
            let platform = build_platform(&config.platform, Local::now().date_naive())?;
            let report = BidTuner::new(platform, run_config).run().await?;

            if !no_persist && !report.decisions.is_empty() {
                let db_path = config.resolved_db_path();
                match persist_report(&db_path, &report) {
                    Ok(written) => info!(written, path = %db_path.display(), "decisions persisted"),
                    Err(err) => warn!("failed persisting decisions: {err:#}"),
                }
            }
            print_report(&report, cli.output)
        }
    }
}

fn handle_config_command(init: bool, show: bool, config: &Config, config_path: &Path) -> Result<()> {
    if init {
        Config::write_template(config_path)?;
        println!("Wrote config template to {}", config_path.display());
    }
    if show || !init {
        println!("{}", render_json(config)?);
    }
    Ok(())
}

fn persist_report(db_path: &Path, report: &RunReport) -> Result<usize> {
    let mut store = DecisionStore::open(db_path)
        .with_context(|| format!("failed opening decision store: {}", db_path.display()))?;
    store.record_run(report)
}

fn print_report(report: &RunReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", render_decisions_table(&report.decisions));
            println!("{}", render_run_summary(report));
        }
        OutputFormat::Json => println!("{}", render_json(report)?),
        OutputFormat::Jsonl => print!("{}", render_json_lines(&report.decisions)?),
        OutputFormat::Csv => print!("{}", decisions_to_csv(&report.decisions)?),
    }
    Ok(())
}

fn print_history(records: &[DecisionRecord], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", render_history_table(records)),
        OutputFormat::Json => println!("{}", render_json(records)?),
        OutputFormat::Jsonl => print!("{}", render_json_lines(records)?),
        OutputFormat::Csv => print!("{}", history_to_csv(records)?),
    }
    Ok(())
}
