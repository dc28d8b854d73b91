//! # savesync CLI - Inspect the device side of save reconciliation
//!
//! Offline tooling around the savesync library: see which ROMs and saves the
//! scanner finds, inspect or edit the identity cache, check how two titles
//! compare under fuzzy matching, and list a platform's emulator folders.
//!
//! ## Usage
//! ```bash
//! # Scan the device using a config and a platform folder table
//! savesync --config savesync.json --platforms platforms.json scan
//!
//! # Show cached identities
//! savesync --config savesync.json cache show
//!
//! # Forget one identity so the next pass resolves it again
//! savesync --config savesync.json cache forget gba "Zelda (USA).gba"
//!
//! # Check whether two names would fuzzy-match
//! savesync similarity "Super Mario Bros 3 (USA).nes" "Super Mario Bros. 3"
//! ```

use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use savesync::naming;
use savesync::{
    scanner, DirectoryScanner, IdentityCache, Result, StaticDirectoryMap, SyncConfig, SyncError,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// savesync CLI - inspect ROMs, saves and the identity cache
#[derive(Parser)]
#[command(name = "savesync")]
#[command(version)]
#[command(about = "Inspect emulator saves and the identity cache used for save reconciliation")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file (JSON); defaults apply when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Platform folder table (JSON)
    #[arg(short, long, global = true)]
    platforms: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan ROM and save folders
    Scan {
        /// List every ROM
        #[arg(short, long)]
        detailed: bool,
    },

    /// Inspect or edit the identity cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Compare two names the way fuzzy matching does
    Similarity {
        /// Local file name
        local: String,

        /// Remote title
        remote: String,
    },

    /// List save folders for a platform
    Emulators {
        /// Platform key, e.g. "gba"
        platform: String,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show cached identities
    Show,

    /// Remove every entry
    Clear,

    /// Remove one identity
    Forget {
        /// Platform key
        platform: String,

        /// ROM file name
        file_name: String,
    },
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("savesync=debug")),
            )
            .init();
    }

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_ref())?;
    let platforms = cli.platforms;

    match cli.command {
        Commands::Scan { detailed } => cmd_scan(&config, platforms, detailed),
        Commands::Cache { action } => cmd_cache(&config, action),
        Commands::Similarity { local, remote } => cmd_similarity(&config, &local, &remote),
        Commands::Emulators { platform } => cmd_emulators(&config, platforms, &platform),
        Commands::Config => cmd_config(&config),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<SyncConfig> {
    match path {
        Some(path) => SyncConfig::from_json_file(path),
        None => Ok(SyncConfig::default()),
    }
}

fn load_platforms(path: Option<PathBuf>) -> Result<StaticDirectoryMap> {
    match path {
        Some(path) => StaticDirectoryMap::from_json_file(&path),
        None => Err(SyncError::InvalidConfiguration(
            "a platform folder table is required (--platforms <file>)".to_string(),
        )),
    }
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Scan the device and summarize ROMs and saves per platform
fn cmd_scan(config: &SyncConfig, platforms: Option<PathBuf>, detailed: bool) -> Result<()> {
    let map = load_platforms(platforms)?;
    let start = Instant::now();

    let pb = spinner("Scanning ROM folders...");
    let outcome = DirectoryScanner::new(config, &map).scan()?;
    pb.finish_and_clear();

    if outcome.roms.is_empty() && outcome.errors.is_empty() {
        println!("{}", "No ROMs found.".yellow());
        return Ok(());
    }

    println!("{} ({})", "Platforms:".blue().bold(), config.firmware);
    println!();

    for (platform, roms) in &outcome.roms {
        let saves = roms.iter().filter(|r| r.local_save.is_some()).count();
        println!(
            "  {} {} ROMs, {} saves",
            format!("{:<10}", platform).yellow().bold(),
            roms.len().to_string().cyan(),
            saves.to_string().cyan()
        );

        if detailed {
            for rom in roms {
                match &rom.local_save {
                    Some(save) => println!(
                        "      {} {}",
                        rom.file_name,
                        save.last_modified.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
                    ),
                    None => println!("      {}", rom.file_name.dimmed()),
                }
            }
        }
    }

    for failure in &outcome.errors {
        println!(
            "  {} {}: {}",
            "✗".red().bold(),
            failure.platform.yellow(),
            failure.message
        );
    }

    println!();
    println!(
        "  Total: {} ROMs, {} saves in {}",
        outcome.rom_count().to_string().cyan(),
        outcome.save_count().to_string().cyan(),
        format_duration(Duration::from_millis(start.elapsed().as_millis() as u64))
            .to_string()
            .cyan()
    );

    Ok(())
}

/// Show, clear or edit the identity cache
fn cmd_cache(config: &SyncConfig, action: CacheAction) -> Result<()> {
    let path = config.cache_path.clone().ok_or_else(|| {
        SyncError::InvalidConfiguration("no cache_path configured".to_string())
    })?;
    let cache = IdentityCache::load(&path);

    match action {
        CacheAction::Show => {
            let records = cache.identities();
            if records.is_empty() {
                println!("{}", "Identity cache is empty.".yellow());
            } else {
                println!("{}", "Cached identities:".blue().bold());
                println!();
                for record in &records {
                    println!(
                        "  {} {} {} {}",
                        format!("{:<8}", record.platform_key).yellow(),
                        record.file_name,
                        "→".dimmed(),
                        format!("{} (#{})", record.identity.remote_name, record.identity.remote_id).cyan()
                    );
                }
            }
            println!();
            println!(
                "  {} identities, {} failed lookups",
                records.len().to_string().cyan(),
                cache.failed_lookup_count().to_string().cyan()
            );
        }
        CacheAction::Clear => {
            let count = cache.len();
            cache.clear();
            cache.save(&path)?;
            println!("{} Cleared {} identities", "✓".green().bold(), count);
        }
        CacheAction::Forget {
            platform,
            file_name,
        } => {
            if cache.forget(&platform, &file_name) {
                cache.save(&path)?;
                println!("{} Forgot {}/{}", "✓".green().bold(), platform, file_name);
            } else {
                println!("{}", format!("No entry for {}/{}", platform, file_name).yellow());
            }
        }
    }

    Ok(())
}

/// Show normalized forms and the similarity score of two names
fn cmd_similarity(config: &SyncConfig, local: &str, remote: &str) -> Result<()> {
    let left = naming::normalize_for_comparison(local);
    let right = naming::normalize_for_comparison(remote);
    let score = naming::similarity(&left, &right);

    println!("  Local:  {}", left.cyan());
    println!("  Remote: {}", right.cyan());
    println!("  Score:  {:.3}", score);

    if score >= config.fuzzy_threshold {
        println!(
            "{} Would be offered as a match (threshold {:.2})",
            "✓".green().bold(),
            config.fuzzy_threshold
        );
    } else {
        println!(
            "{} Below threshold {:.2}",
            "✗".red().bold(),
            config.fuzzy_threshold
        );
    }

    Ok(())
}

/// List a platform's save folders and how many saves each holds
fn cmd_emulators(config: &SyncConfig, platforms: Option<PathBuf>, platform: &str) -> Result<()> {
    let map = load_platforms(platforms)?;
    let dirs = scanner::emulator_directories(config, &map, platform);

    if dirs.is_empty() {
        println!("{}", format!("No save folders known for '{}'.", platform).yellow());
        return Ok(());
    }

    println!("{}", format!("Save folders for {}:", platform).blue().bold());
    for dir in dirs {
        let marker = if dir.has_saves { "●".green() } else { "○".dimmed() };
        println!(
            "  {} {} {}",
            marker,
            dir.directory_name,
            format!("({} saves)", dir.save_count).dimmed()
        );
    }

    Ok(())
}

/// Print the effective configuration as JSON
fn cmd_config(config: &SyncConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
