use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Result};
use chrono_tz::Tz;
use clap::{ArgAction, Args, Parser, Subcommand};
use serde_json::{self, json};
use tokio_util::sync::CancellationToken;

use crate::aggregator::DayAggregator;
use crate::config::{self, ViewerConfig, DEFAULT_BIND, DEFAULT_CONCURRENCY, DEFAULT_ROOT};
use crate::models::{DayDate, DaySummary, Event};
use crate::runtime::{self, LogFormat};
use crate::server;
use crate::storage::{self, FsStore};
use crate::util;

#[derive(Parser)]
#[command(author, version, about = "Browse surveillance camera snapshots and clips by day")]
pub struct Cli {
    #[arg(short, long, global = true, action = ArgAction::Count, help = "Increase verbosity (-v, -vv)")]
    verbose: u8,
    #[arg(
        long,
        global = true,
        env = "PERSON_FOLDER",
        default_value = DEFAULT_ROOT,
        help = "Root of the YYYY/MM/DD snapshot tree"
    )]
    root: PathBuf,
    #[arg(
        long,
        global = true,
        env = "SNAPVIEW_TIMEZONE",
        default_value = "Europe/Berlin",
        help = "Timezone the cameras stamp filenames in"
    )]
    timezone: String,
    #[arg(
        long,
        global = true,
        env = "SNAPVIEW_CONCURRENCY",
        default_value_t = DEFAULT_CONCURRENCY,
        help = "Day directories processed in parallel"
    )]
    concurrency: usize,
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the JSON API and media files over HTTP
    Serve(ServeArgs),
    /// List every day with events, newest first
    Days(DaysArgs),
    /// Show the events of one day
    Day(DayArgs),
    /// Delete one day directory
    Delete(DeleteArgs),
    /// Decode camera filenames
    Parse(ParseArgs),
    /// Report how the storage root is laid out
    Inspect(InspectArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    #[arg(long, env = "SNAPVIEW_BIND", default_value = DEFAULT_BIND)]
    pub bind: SocketAddr,
}

#[derive(Args)]
pub struct DaysArgs {
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct DayArgs {
    #[arg(value_name = "YYYY-MM-DD")]
    pub date: String,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct DeleteArgs {
    #[arg(value_name = "YYYY-MM-DD")]
    pub date: String,
}

#[derive(Args)]
pub struct ParseArgs {
    #[arg(required = true)]
    pub filenames: Vec<String>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct InspectArgs {
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    fn viewer_config(&self) -> Result<ViewerConfig> {
        let root = util::resolve_root(&self.root)?;
        let timezone = config::parse_timezone(&self.timezone)?;
        Ok(ViewerConfig::new(root)
            .with_timezone(timezone)
            .with_concurrency(self.concurrency))
    }
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    runtime::init_tracing(cli.verbose, cli.log_format)?;
    let config = cli.viewer_config()?;
    tracing::debug!(root = %config.root.display(), timezone = %config.timezone, "configuration resolved");
    match cli.command {
        Commands::Serve(args) => server::serve(config, args.bind).await,
        Commands::Days(args) => handle_days(config, args).await,
        Commands::Day(args) => handle_day(config, args).await,
        Commands::Delete(args) => handle_delete(config, args).await,
        Commands::Parse(args) => handle_parse(config, args),
        Commands::Inspect(args) => handle_inspect(config, args),
    }
}

async fn handle_days(config: ViewerConfig, args: DaysArgs) -> Result<()> {
    let days = open_aggregator(config);
    let cancel = cancel_on_signal();
    let summaries = days.list_days(&cancel).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else if summaries.is_empty() {
        println!("No event days under {}", days.config().root.display());
    } else {
        print_days(&summaries);
    }
    Ok(())
}

async fn handle_day(config: ViewerConfig, args: DayArgs) -> Result<()> {
    let date: DayDate = args.date.parse()?;
    let timezone = config.timezone;
    let days = open_aggregator(config);
    let cancel = cancel_on_signal();
    let events = days.get_day(&date, &cancel).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&events)?);
    } else if events.is_empty() {
        println!("No events on {date}");
    } else {
        print_events(&date, &events, timezone);
    }
    Ok(())
}

async fn handle_delete(config: ViewerConfig, args: DeleteArgs) -> Result<()> {
    let date: DayDate = args.date.parse()?;
    let days = open_aggregator(config);
    if !days.delete_day(&date).await {
        bail!("failed to delete {date}");
    }
    println!("Deleted {date}");
    Ok(())
}

fn handle_parse(config: ViewerConfig, args: ParseArgs) -> Result<()> {
    let codec = config.codec();
    let results: Vec<_> = args
        .filenames
        .iter()
        .map(|name| (name, codec.parse(name)))
        .collect();
    let failures = results.iter().filter(|(_, res)| res.is_err()).count();

    if args.json {
        let payload: Vec<_> = results
            .iter()
            .map(|(name, res)| match res {
                Ok(record) => json!({ "filename": name, "record": record }),
                Err(err) => json!({ "filename": name, "error": err.to_string() }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for (name, res) in &results {
            match res {
                Ok(record) => println!(
                    "{name}: camera={} seq={} time={} kind={:?}",
                    record.camera_id,
                    record.sequence_id,
                    record.capture_time.with_timezone(&config.timezone).to_rfc3339(),
                    record.kind
                ),
                Err(err) => println!("{name}: {err}"),
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} names did not parse", results.len());
    }
    Ok(())
}

fn handle_inspect(config: ViewerConfig, args: InspectArgs) -> Result<()> {
    let probe = storage::probe_layout(&config.root);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&probe)?);
        return Ok(());
    }
    println!("Root: {}", probe.root);
    println!("Exists: {}  Readable: {}", probe.exists, probe.readable);
    println!("Years: {}", probe.year_directories.join(", "));
    println!(
        "Months: {}  Days: {}  Files: {}  Ignored: {}",
        probe.month_directories, probe.day_directories, probe.files, probe.ignored_entries
    );
    if !probe.sample.is_empty() {
        println!("Sample:");
        for path in &probe.sample {
            println!("  - {path}");
        }
    }
    for err in &probe.errors {
        println!("Error: {err}");
    }
    Ok(())
}

fn open_aggregator(config: ViewerConfig) -> DayAggregator<FsStore> {
    DayAggregator::new(FsStore::new(&config.root), config)
}

fn cancel_on_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let listener = token.clone();
    tokio::spawn(async move {
        if let Err(err) = runtime::cancel_on_signal(listener).await {
            tracing::warn!(error = %err, "signal handling unavailable");
        }
    });
    token
}

fn print_days(days: &[DaySummary]) {
    println!("{:<12} {:>6} {:>10}  {}", "Date", "Events", "Size", "First event");
    for day in days {
        println!(
            "{:<12} {:>6} {:>10}  {}",
            day.date.to_string(),
            day.event_count,
            util::format_megabytes(day.total_bytes),
            day.first_event.as_deref().unwrap_or("-")
        );
    }
}

fn print_events(date: &DayDate, events: &[Event], timezone: Tz) {
    let total: u64 = events.iter().map(Event::total_bytes).sum();
    println!(
        "{date}: {} event{} ({})",
        events.len(),
        if events.len() == 1 { "" } else { "s" },
        util::format_megabytes(total)
    );
    for event in events {
        println!(
            "  {}  {}  {}",
            event.capture_time().with_timezone(&timezone).format("%H:%M:%S"),
            event.filename(),
            util::format_megabytes(event.image.byte_size)
        );
        for clip in &event.clips {
            println!(
                "    {}  {}  {}",
                clip.capture_time.with_timezone(&timezone).format("%H:%M:%S"),
                clip.filename,
                util::format_megabytes(clip.byte_size)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_build_the_config() {
        let cli = Cli::try_parse_from([
            "snapview",
            "days",
            "--root",
            "/srv/cams",
            "--timezone",
            "UTC",
            "--concurrency",
            "3",
        ])
        .unwrap();
        let config = cli.viewer_config().unwrap();
        assert_eq!(config.root, PathBuf::from("/srv/cams"));
        assert_eq!(config.timezone, chrono_tz::UTC);
        assert_eq!(config.concurrency, 3);
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let cli = Cli::try_parse_from(["snapview", "days", "--timezone", "Nowhere/Land"]).unwrap();
        assert!(cli.viewer_config().is_err());
    }
}
