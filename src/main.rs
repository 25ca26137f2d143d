//! netmap patch manager CLI
//!
//! Entry point for the `np` command-line tool.

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use netmap_patches::config::{host_config_path, EffectiveConfig, REPO_CONFIG_FILE};
use netmap_patches::pipeline::Extraction;
use netmap_patches::telemetry::{self, LogFormat};
use netmap_patches::{
    Collaborators, Collection, DriverFilter, DriverSummary, Pipeline, PipelineError, PipelineResult, VerifyOutcome,
    VerifyReport, VersionId,
};
use serde::Serialize;
use tracing::Level;

#[derive(Parser)]
#[command(name = "np")]
#[command(about = "Minimal, build-verified netmap driver patches across kernel releases", version)]
struct Cli {
    /// Path to repo config file (default: ./np.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Work directory holding patch collections and the cache
    #[arg(long, global = true)]
    workdir: Option<PathBuf>,

    /// Compiler parallelism
    #[arg(long, short = 'j', global = true)]
    jobs: Option<usize>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides
    #[arg(long, global = true, default_value = "info", value_parser = telemetry::parse_level)]
    log_level: Level,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract single-version patches for [FROM, TO) into pending
    Extract {
        driver: String,
        #[arg(value_parser = parse_version)]
        from: VersionId,
        #[arg(value_parser = parse_version)]
        to: VersionId,
        #[arg(long)]
        json: bool,
    },

    /// Build-verify a driver's patches; failures move to rejected
    Verify {
        driver: String,

        /// Verify final patches instead of pending ones
        #[arg(long = "final")]
        final_patches: bool,

        #[arg(long)]
        json: bool,
    },

    /// Merge pending patches into the fewest final ranges
    Minimize { driver: String },

    /// Open the final patch ending at VERSION up to all future releases
    Infty {
        driver: String,
        #[arg(value_parser = parse_version)]
        version: VersionId,
    },

    /// Extract, verify, minimize and extend one driver
    Run {
        driver: String,
        #[arg(value_parser = parse_version)]
        from: VersionId,
        #[arg(value_parser = parse_version)]
        to: VersionId,
        #[arg(long)]
        json: bool,
    },

    /// Run the workflow for every configured driver
    All {
        #[arg(value_parser = parse_version)]
        from: VersionId,
        #[arg(value_parser = parse_version)]
        to: VersionId,

        /// Only drivers whose name matches this glob
        #[arg(long)]
        only: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Show patch collections and cache statistics
    List {
        #[arg(long)]
        only: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Copy final patches into a directory
    Save {
        dest: PathBuf,
        #[arg(long)]
        only: Option<String>,
    },

    /// Drop cached build verdicts
    CacheClean {
        /// Only entries for this driver
        driver: Option<String>,
    },

    /// Show where a driver lives in a kernel tree
    Locate {
        driver: String,
        #[arg(value_parser = parse_version)]
        version: VersionId,
    },

    /// Print the effective configuration with its sources
    Config,
}

fn parse_version(s: &str) -> Result<VersionId, String> {
    VersionId::parse(s).map_err(|e| e.to_string())
}

fn main() {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.log_format, cli.log_level);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}

fn load_config(cli: &Cli) -> PipelineResult<EffectiveConfig> {
    let repo_config = cli.config.clone().unwrap_or_else(|| PathBuf::from(REPO_CONFIG_FILE));
    let overrides = serde_json::json!({
        "workdir": cli.workdir,
        "build": { "jobs": cli.jobs },
    });
    Ok(EffectiveConfig::build(
        host_config_path().as_deref(),
        Some(&repo_config),
        Some(overrides),
    )?)
}

fn run(cli: Cli) -> PipelineResult<()> {
    let config = load_config(&cli)?;
    if let Commands::Config = cli.command {
        println!("{}", config.to_json()?);
        return Ok(());
    }

    let settings = config.settings()?;
    let parts = Collaborators::production(&settings);
    let pipeline = Pipeline::new(settings, parts);

    match cli.command {
        Commands::Extract { driver, from, to, json } => {
            let key = pipeline.driver_key(&driver)?;
            let extraction = pipeline.extract(&key, from, to)?;
            if json {
                print_json(&extraction)?;
            } else {
                print_extraction(&extraction);
            }
            Ok(())
        }
        Commands::Verify {
            driver,
            final_patches,
            json,
        } => {
            let key = pipeline.driver_key(&driver)?;
            let collection = if final_patches {
                Collection::Final
            } else {
                Collection::Pending
            };
            let reports = pipeline.verify(&key, collection)?;
            if json {
                print_json(&reports)?;
            } else {
                reports.iter().for_each(print_report);
            }
            check_failures(reports.iter().filter(|r| r.outcome.is_failure()).count())
        }
        Commands::Minimize { driver } => {
            let key = pipeline.driver_key(&driver)?;
            for patch in pipeline.minimize(&key)? {
                println!("{}", patch.id());
            }
            Ok(())
        }
        Commands::Infty { driver, version } => {
            let key = pipeline.driver_key(&driver)?;
            match pipeline.extend_to_infinity(&key, version)? {
                Some(id) => println!("{}", id),
                None => println!("No final patch of {} ends at {}.", key, version),
            }
            Ok(())
        }
        Commands::Run { driver, from, to, json } => {
            let key = pipeline.driver_key(&driver)?;
            let summary = pipeline.run_driver(&key, from, to)?;
            report_summaries(&[summary], json)
        }
        Commands::All { from, to, only, json } => {
            let filter = DriverFilter::new(only.as_deref())?;
            let summaries = pipeline.run_all(from, to, &filter)?;
            report_summaries(&summaries, json)
        }
        Commands::List { only, json } => {
            let filter = DriverFilter::new(only.as_deref())?;
            let listing = pipeline.list(&filter)?;
            if json {
                return print_json(&listing);
            }
            for (collection, ids) in &listing.collections {
                println!("{} ({}):", collection, ids.len());
                for id in ids {
                    println!("  {}", id);
                }
            }
            let stats = &listing.cache;
            println!(
                "cache: {} entries ({} failed, {} warned)",
                stats.entries, stats.failed, stats.warned
            );
            Ok(())
        }
        Commands::Save { dest, only } => {
            let filter = DriverFilter::new(only.as_deref())?;
            let written = pipeline.save(&dest, &filter)?;
            println!("Saved {} patch(es) to {}", written, display(&dest));
            Ok(())
        }
        Commands::CacheClean { driver } => {
            let removed = pipeline.clean_cache(driver.as_deref())?;
            println!("Removed {} cache entr{}", removed, if removed == 1 { "y" } else { "ies" });
            Ok(())
        }
        Commands::Locate { driver, version } => {
            let key = pipeline.driver_key(&driver)?;
            match pipeline.locate(&key, version)? {
                Some(location) => {
                    println!("tree:   {}", display(&location.tree));
                    println!("base:   {}", display(&location.base));
                    println!("target: {}", display(&location.target));
                }
                None => println!("{} not found in {}", key, version),
            }
            Ok(())
        }
        Commands::Config => Ok(()),
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn print_json<T: Serialize>(value: &T) -> PipelineResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_extraction(extraction: &Extraction) {
    for id in &extraction.extracted {
        println!("{}", id);
    }
    if !extraction.no_patch.is_empty() {
        let versions: Vec<String> = extraction.no_patch.iter().map(ToString::to_string).collect();
        println!("No patch needed for: {}", versions.join(", "));
    }
}

fn print_report(report: &VerifyReport) {
    match &report.outcome {
        VerifyOutcome::Passed => println!("PASS  {}", report.patch_id),
        VerifyOutcome::Warned => println!("WARN  {}", report.patch_id),
        VerifyOutcome::Failed { version, reason } => {
            println!("FAIL  {} ({} at {})", report.patch_id, reason, version)
        }
    }
}

fn report_summaries(summaries: &[DriverSummary], json: bool) -> PipelineResult<()> {
    if json {
        print_json(&summaries)?;
    } else {
        for summary in summaries {
            println!("{}:", summary.driver);
            if let Some(error) = &summary.error {
                println!("  error:     {}", error);
                continue;
            }
            println!("  extracted: {} ({} without changes)", summary.extracted, summary.no_patch);
            for id in &summary.final_patches {
                println!("  final:     {}", id);
            }
            for id in &summary.warned {
                println!("  warned:    {}", id);
            }
            for id in &summary.rejected {
                println!("  rejected:  {}", id);
            }
        }
    }
    let errored = summaries.iter().filter(|s| s.error.is_some()).count();
    if errored > 0 {
        return Err(PipelineError::DriversFailed(errored));
    }
    check_failures(summaries.iter().map(|s| s.rejected.len()).sum())
}

fn check_failures(failed: usize) -> PipelineResult<()> {
    if failed > 0 {
        return Err(PipelineError::VerificationFailed(failed));
    }
    Ok(())
}
