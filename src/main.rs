//! usntrace CLI
//!
//! Command-line front end for journal reading and path reconstruction.

use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::HumanDuration;
use regex::Regex;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use usntrace::ntfs::{platform_volumes, PlatformVolumes};
use usntrace::path_resolver::UNKNOWN_PARENT;
use usntrace::{
    format_filetime, format_size, ChangeRecord, ScanConfig, UsnTraceError, VolumeId, VolumeScanner,
};

/// usntrace - NTFS change journal and path reconstruction
///
/// Reads the USN journal of a volume and rebuilds the full path of every
/// file it mentions from the volume's MFT catalog.
#[derive(Parser)]
#[command(name = "usntrace")]
#[command(version)]
#[command(about = "NTFS change journal reader with MFT path reconstruction", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Also write the log to usntrace.log next to the executable
    #[arg(long, global = true)]
    log_file: bool,

    /// JSON file overriding scan limits and buffer sizes
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List volumes with an active change journal
    Volumes,

    /// Print change journal records
    Journal {
        /// Drive to read (e.g., C or C:)
        #[arg(short, long)]
        drive: VolumeId,

        /// Maximum records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only records whose file name matches this regex
        #[arg(short, long)]
        filter: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Print change journal records with their reconstructed paths
    Paths {
        /// Drive to read (e.g., C or C:)
        #[arg(short, long)]
        drive: VolumeId,

        /// Maximum records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Enumerate the catalog and show entry counts
    Catalog {
        /// Drive to scan (e.g., C or C:)
        #[arg(short, long)]
        drive: VolumeId,
    },
}

fn main() {
    let cli = Cli::parse();

    usntrace::logging::init(cli.verbose, cli.log_file);
    info!("usntrace {} starting up", usntrace::VERSION);

    let result = load_config(cli.config.as_ref()).and_then(|config| {
        let scanner = build_scanner(config, &cli.command);
        match cli.command {
            Commands::Volumes => cmd_volumes(&scanner),
            Commands::Journal {
                drive,
                limit,
                filter,
                output,
            } => cmd_journal(&scanner, drive, limit, filter.as_deref(), output),
            Commands::Paths {
                drive,
                limit,
                output,
            } => cmd_paths(&scanner, drive, limit, output),
            Commands::Catalog { drive } => cmd_catalog(&scanner, drive),
        }
    });

    if let Err(e) = result {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&PathBuf>) -> usntrace::Result<ScanConfig> {
    match path {
        Some(path) => ScanConfig::from_json_file(path),
        None => Ok(ScanConfig::default()),
    }
}

fn build_scanner(mut config: ScanConfig, command: &Commands) -> VolumeScanner<PlatformVolumes> {
    // No spinners around machine-readable output
    config.show_progress = !matches!(
        command,
        Commands::Journal { output: OutputFormat::Json, .. }
            | Commands::Paths { output: OutputFormat::Json, .. }
    );
    VolumeScanner::new(platform_volumes()).with_config(config)
}

fn warn_if_unsupported() {
    if cfg!(not(windows)) {
        println!(
            "  {} raw volume access is only available on Windows",
            style("!").yellow().bold()
        );
    }
}

/// Volumes command implementation
fn cmd_volumes(scanner: &VolumeScanner<PlatformVolumes>) -> usntrace::Result<()> {
    println!("{} Detecting journal-capable volumes...", style("→").cyan().bold());
    println!();
    warn_if_unsupported();

    let volumes = scanner.journal_descriptors();
    if volumes.is_empty() {
        println!("  No volumes with an active USN journal found.");
        return Ok(());
    }

    for (volume, journal) in &volumes {
        println!(
            "  {} {} journal 0x{:016X}, {} max, USN {}..{}",
            style("•").green(),
            style(volume).yellow(),
            journal.journal_id,
            style(format_size(journal.max_size)).cyan(),
            journal.first_valid_usn(),
            journal.next_usn
        );
    }
    Ok(())
}

fn print_record(record: &ChangeRecord, path: &str) {
    println!(
        "{} {:>14} {} {}",
        style(format_filetime(record.timestamp)).dim(),
        record.usn,
        style(format!("{:<28}", record.reason_names().join("|"))).yellow(),
        style(path).cyan()
    );
}

/// Journal command implementation
fn cmd_journal(
    scanner: &VolumeScanner<PlatformVolumes>,
    drive: VolumeId,
    limit: Option<usize>,
    filter: Option<&str>,
    output: OutputFormat,
) -> usntrace::Result<()> {
    let pattern = filter
        .map(Regex::new)
        .transpose()
        .map_err(|e| UsnTraceError::InvalidArgument(format!("--filter: {}", e)))?;

    let start = Instant::now();
    let records = scanner.read_journal_entries(drive)?;
    let selected: Vec<&ChangeRecord> = records
        .iter()
        .filter(|r| pattern.as_ref().map_or(true, |re| re.is_match(&r.file_name)))
        .take(limit.unwrap_or(usize::MAX))
        .collect();

    if output == OutputFormat::Json {
        let json = serde_json::to_string_pretty(&selected)?;
        println!("{}", json);
        return Ok(());
    }

    println!(
        "{} Journal of {}",
        style("→").cyan().bold(),
        style(drive).yellow()
    );
    warn_if_unsupported();
    for record in &selected {
        print_record(record, &record.file_name);
    }
    println!();
    println!(
        "{} {} of {} records in {}",
        style("✓").green().bold(),
        selected.len(),
        records.len(),
        style(HumanDuration(start.elapsed())).cyan()
    );
    Ok(())
}

/// Paths command implementation
fn cmd_paths(
    scanner: &VolumeScanner<PlatformVolumes>,
    drive: VolumeId,
    limit: Option<usize>,
    output: OutputFormat,
) -> usntrace::Result<()> {
    let start = Instant::now();
    let trace = scanner.trace_volume(drive)?;
    let limit = limit.unwrap_or(usize::MAX);

    let rows: Vec<(&ChangeRecord, String)> = trace
        .records
        .iter()
        .take(limit)
        .map(|record| {
            let path = trace
                .paths
                .display_path(record)
                .unwrap_or_else(|| format!("{}\\{}", UNKNOWN_PARENT, record.file_name));
            (record, path)
        })
        .collect();

    if output == OutputFormat::Json {
        let entries: Vec<serde_json::Value> = rows
            .iter()
            .map(|(record, path)| serde_json::json!({ "record": record, "path": path }))
            .collect();
        let json = serde_json::to_string_pretty(&serde_json::json!({
            "volume": drive.to_string(),
            "entries": entries,
            "stats": trace.paths.stats,
        }))?;
        println!("{}", json);
        return Ok(());
    }

    println!(
        "{} Paths for {}",
        style("→").cyan().bold(),
        style(drive).yellow()
    );
    warn_if_unsupported();
    for (record, path) in &rows {
        print_record(record, path);
    }

    let stats = &trace.paths.stats;
    println!();
    println!(
        "{} Resolution finished in {}",
        style("✓").green().bold(),
        style(HumanDuration(start.elapsed())).cyan()
    );
    println!("  {} {}", style("Requested:").bold(), stats.total_requested);
    println!(
        "  {} {} ({:.1}%)",
        style("Resolved:").bold(),
        style(stats.fully_resolved).green(),
        stats.resolved_ratio() * 100.0
    );
    println!("  {} {}", style("Fallback:").bold(), stats.fallback_matches);
    if stats.true_orphans > 0 {
        println!("  {} {}", style("Orphans:").bold(), style(stats.true_orphans).red());
    }
    println!("  {} {}", style("Deleted:").bold(), stats.deleted_files);
    Ok(())
}

/// Catalog command implementation
fn cmd_catalog(scanner: &VolumeScanner<PlatformVolumes>, drive: VolumeId) -> usntrace::Result<()> {
    println!(
        "{} Scanning catalog of {}",
        style("→").cyan().bold(),
        style(drive).yellow()
    );
    warn_if_unsupported();

    let start = Instant::now();
    let catalog = scanner.scan_catalog(drive)?;
    let elapsed = start.elapsed();
    let directories = catalog.directory_count();

    println!();
    println!(
        "{} Scan complete in {}",
        style("✓").green().bold(),
        style(HumanDuration(elapsed)).cyan()
    );
    println!("  {} {}", style("Entries:").bold(), catalog.len());
    println!("  {} {}", style("Directories:").bold(), directories);
    println!(
        "  {} {}",
        style("Files:").bold(),
        catalog.len().saturating_sub(directories)
    );
    println!(
        "  {} {:.0} entries/sec",
        style("Speed:").bold(),
        catalog.len() as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    Ok(())
}
