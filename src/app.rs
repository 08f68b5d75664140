//! Binary-side application logic.
//!
//! Turns parsed CLI arguments into a configured [`ScanRepository`], builds the
//! candidate list, drives a background scan and renders the outcome.

use anyhow::{anyhow, Context, Result};
use bytesize::ByteSize;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use walkdir::WalkDir;
use yansi::Paint;

use crate::cache::CacheDb;
use crate::cli::{Cli, Commands, ScanArgs, ShowArgs};
use crate::config::ScanConfig;
use crate::duplicates::ScanResultGroup;
use crate::error::ExitCode;
use crate::logging::init_logging;
use crate::media::{FsMediaSource, MediaItem, MediaKind};
use crate::progress::{Progress, ProgressCallback};
use crate::repository::{ScanReport, ScanRepository, ScanStats};
use crate::session::ScanSession;
use crate::signal::install_handler;

/// Run the command selected on the command line.
///
/// # Errors
///
/// Returns an error for configuration, cache or discovery failures and for
/// failed scans.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    init_logging(cli.verbose, cli.quiet);
    if cli.no_color {
        yansi::disable();
    }

    let config = ScanConfig::load(cli.config.as_deref())?;
    log::debug!("Effective configuration: {:?}", config);

    match cli.command {
        Commands::Scan(args) => run_scan(args, config, cli.quiet),
        Commands::Show(args) => run_show(args, config),
        Commands::ClearCache(args) => {
            let repository = open_repository(config, args.cache)?;
            repository.clear_all().context("Failed to clear cache")?;
            if !cli.quiet {
                println!("{}", "Cache cleared".green());
            }
            Ok(ExitCode::Success)
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(ExitCode::Success)
        }
    }
}

fn open_repository(mut config: ScanConfig, cache: Option<PathBuf>) -> Result<ScanRepository> {
    if cache.is_some() {
        config.cache_path = cache;
    }
    let path = config
        .resolved_cache_path()
        .ok_or_else(|| anyhow!("No cache location available, pass --cache"))?;
    let db = CacheDb::open(&path)
        .with_context(|| format!("Failed to open cache database {}", path.display()))?;
    Ok(ScanRepository::new(
        Arc::new(db),
        Arc::new(FsMediaSource),
        config,
    ))
}

fn run_scan(args: ScanArgs, mut config: ScanConfig, quiet: bool) -> Result<ExitCode> {
    if let Some(threshold) = args.threshold {
        config.similarity_threshold = threshold;
    }
    let repository = Arc::new(open_repository(config, args.cache)?);

    let items = discover(&args.paths)?;
    log::info!("Found {} media files", items.len());

    let token = install_handler().context("Failed to install Ctrl+C handler")?;
    let session = Arc::new(ScanSession::with_token(token));
    let progress: Option<Arc<dyn ProgressCallback>> = if quiet || args.no_progress || args.json {
        None
    } else {
        Some(Arc::new(Progress::new(false)))
    };

    let handle = Arc::clone(&session).spawn(repository, items, args.mode.into(), progress)?;
    let report = handle
        .join()
        .map_err(|_| anyhow!("Scan worker thread panicked"))?;
    session.acknowledge();

    let (status, timestamp, stats) = match &report {
        ScanReport::Complete { results, stats } => ("complete", Some(results.timestamp), Some(stats)),
        ScanReport::Cancelled { stats, .. } => ("cancelled", None, Some(stats)),
        ScanReport::Failed { fallback, .. } => ("failed", fallback.as_ref().map(|r| r.timestamp), None),
    };

    if args.json {
        print_json(status, timestamp, report.groups(), report.unscannable())?;
    } else if !quiet {
        print_groups(report.groups(), report.unscannable());
        if let Some(stats) = stats {
            print_summary(report.groups(), stats);
        }
    }

    match report {
        ScanReport::Complete { results, .. } => Ok(if results.groups.is_empty() {
            ExitCode::NoDuplicates
        } else if !results.unscannable.is_empty() {
            ExitCode::PartialSuccess
        } else {
            ExitCode::Success
        }),
        ScanReport::Cancelled { .. } => {
            if !quiet && !args.json {
                eprintln!("{}", "Scan cancelled, results were not saved".yellow());
            }
            Ok(ExitCode::Interrupted)
        }
        ScanReport::Failed { message, fallback } => {
            if fallback.is_some() && !args.json {
                eprintln!("{}", "Showing the last saved results".yellow());
            }
            Err(anyhow!("Scan failed: {}", message))
        }
    }
}

fn run_show(args: ShowArgs, config: ScanConfig) -> Result<ExitCode> {
    let repository = open_repository(config, args.cache)?;
    let Some(results) = repository
        .load_validated()
        .context("Failed to read saved results")?
    else {
        if args.json {
            print_json("empty", None, &[], &[])?;
        } else {
            println!("No saved results");
        }
        return Ok(ExitCode::NoDuplicates);
    };

    if args.json {
        print_json(
            "saved",
            Some(results.timestamp),
            &results.groups,
            &results.unscannable,
        )?;
    } else {
        println!(
            "Results from {}",
            results.timestamp.format("%Y-%m-%d %H:%M:%S UTC").bold()
        );
        print_groups(&results.groups, &results.unscannable);
        println!(
            "{} groups, {} reclaimable",
            results.groups.len(),
            ByteSize::b(results.wasted_space())
        );
    }
    Ok(ExitCode::Success)
}

/// Walk `roots` and collect every image or video file.
///
/// Unreadable entries are logged and skipped. The result is sorted by path
/// and free of duplicates when roots overlap.
fn discover(roots: &[PathBuf]) -> Result<Vec<MediaItem>> {
    let mut items = Vec::new();
    for root in roots {
        if !root.exists() {
            anyhow::bail!("Path does not exist: {}", root.display());
        }
        for entry in WalkDir::new(root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || MediaKind::from_path(entry.path()).is_none() {
                continue;
            }
            match MediaItem::from_path(entry.path()) {
                Ok(item) => items.push(item),
                Err(e) => log::warn!("Skipping {}: {}", entry.path().display(), e),
            }
        }
    }
    items.sort_by(|a, b| a.path.cmp(&b.path));
    items.dedup_by(|a, b| a.path == b.path);
    Ok(items)
}

#[derive(Serialize)]
struct JsonReport<'a> {
    status: &'a str,
    timestamp: Option<DateTime<Utc>>,
    groups: &'a [ScanResultGroup],
    unscannable: &'a [PathBuf],
}

fn print_json(
    status: &str,
    timestamp: Option<DateTime<Utc>>,
    groups: &[ScanResultGroup],
    unscannable: &[PathBuf],
) -> Result<()> {
    let report = JsonReport {
        status,
        timestamp,
        groups,
        unscannable,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize results")?
    );
    Ok(())
}

fn print_groups(groups: &[ScanResultGroup], unscannable: &[PathBuf]) {
    for (index, group) in groups.iter().enumerate() {
        let label = if group.is_similar() {
            "similar".cyan()
        } else {
            "exact".green()
        };
        println!(
            "{} {} [{}] {} files, {} reclaimable",
            "Group".bold(),
            index + 1,
            label,
            group.len(),
            ByteSize::b(group.wasted_space())
        );
        for (position, file) in group.files().iter().enumerate() {
            // The oldest member is listed first and is the one to keep.
            let marker = if position == 0 { "*" } else { " " };
            println!(
                "  {} {} ({})",
                marker,
                file.path.display(),
                ByteSize::b(file.size).dim()
            );
        }
    }
    if !unscannable.is_empty() {
        println!("{} ({})", "Unscannable".red().bold(), unscannable.len());
        for path in unscannable {
            println!("    {}", path.display());
        }
    }
}

fn print_summary(groups: &[ScanResultGroup], stats: &ScanStats) {
    let wasted: u64 = groups.iter().map(ScanResultGroup::wasted_space).sum();
    println!(
        "{} groups, {} reclaimable, {} cache hits, {} hashed, {:.1?}",
        groups.len(),
        ByteSize::b(wasted),
        stats.cache_hits(),
        stats.cache_misses(),
        stats.duration
    );
}
