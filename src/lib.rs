//! dcmscrub: batch de-identification of DICOM images.
//!
//! dcmscrub removes text burned into pixel data and overwrites identifying
//! attributes, writing a redacted copy of every input file. Per file:
//!
//! ```text
//! read -> normalize to 8-bit RGB -> detect text -> mask -> inpaint
//!      -> back to native depth -> redact attributes -> write
//! ```
//!
//! # Modules
//!
//! - [`dicom`]: Part 10 reading/writing, data sets and pixel buffers
//! - [`rules`]: tag redaction rules loaded from CSV
//! - [`mask`]: detected regions and reconstruction masks
//! - [`inpaint`]: mask-driven image reconstruction
//! - [`normalize`]: native pixel buffers to and from the working image
//! - [`detect`]: the text detection capability
//! - [`redact`]: rule-driven attribute overwrite
//! - [`pipeline`]: the per-file stage sequence
//! - [`batch`]: directory-level orchestration and reports
//! - [`config`]: run configuration
//! - [`inspect`]: per-file pixel attribute checks
//! - [`error`]: error types

pub mod batch;
pub mod config;
pub mod detect;
pub mod dicom;
pub mod error;
pub mod inpaint;
pub mod inspect;
pub mod mask;
pub mod normalize;
pub mod pipeline;
pub mod redact;
pub mod rules;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use log::LevelFilter;

use config::RedactConfig;
use detect::DetectorKind;
use inpaint::InpaintMethod;
use pipeline::Pipeline;

pub use error::ScrubError;

/// The dcmscrub CLI application.
#[derive(Parser)]
#[command(name = "dcmscrub")]
#[command(version, author, about)]
#[command(propagate_version = true)]
struct Cli {
    /// Log every stage of every file.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Redact every DICOM file in a directory.
    Redact(RedactArgs),
    /// Load a rule file and print the active rules.
    Rules(RulesArgs),
    /// Show the pixel attributes of a file and check them.
    Inspect(InspectArgs),
}

/// Arguments for the redact subcommand.
#[derive(clap::Args)]
struct RedactArgs {
    /// Directory containing .dcm/.dicom files.
    input_dir: Option<PathBuf>,

    /// Directory for redacted copies (created if missing).
    output_dir: Option<PathBuf>,

    /// Rule file (CSV: tag,delete).
    #[arg(long)]
    rules: Option<PathBuf>,

    /// YAML configuration file; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Text detector ('none', 'sidecar', or 'dbnet').
    #[arg(long)]
    detector: Option<String>,

    /// Detection model file (dbnet only).
    #[arg(long, env = "DCMSCRUB_MODEL")]
    model: Option<PathBuf>,

    /// Number of worker threads.
    #[arg(long, short = 'j')]
    jobs: Option<usize>,

    /// Descend into subdirectories.
    #[arg(long)]
    recursive: bool,

    /// Map reconstructed pixels back onto the original value range.
    #[arg(long)]
    preserve_range: bool,

    /// Inpainting neighbourhood radius in pixels.
    #[arg(long)]
    radius: Option<u32>,

    /// Inpainting method ('ns' or 'telea').
    #[arg(long)]
    method: Option<String>,

    /// Output format for the report ('text' or 'json').
    #[arg(long, default_value = "text")]
    report: String,

    /// Exit non-zero if any file failed.
    #[arg(long)]
    strict: bool,
}

/// Arguments for the rules subcommand.
#[derive(clap::Args)]
struct RulesArgs {
    /// Rule file to load.
    input: PathBuf,

    /// Output format ('text' or 'json').
    #[arg(long, default_value = "text")]
    output: String,
}

/// Arguments for the inspect subcommand.
#[derive(clap::Args)]
struct InspectArgs {
    /// DICOM file to inspect.
    input: PathBuf,

    /// Output format ('text' or 'json').
    #[arg(long, default_value = "text")]
    output: String,
}

/// Run the dcmscrub CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), ScrubError> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Some(Commands::Redact(args)) => run_redact(args),
        Some(Commands::Rules(args)) => run_rules(args),
        Some(Commands::Inspect(args)) => run_inspect(args),
        None => {
            println!("dcmscrub {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Batch de-identification of DICOM images.");
            println!();
            println!("Run 'dcmscrub --help' for usage information.");
            Ok(())
        }
    }
}

/// Installs the logger: `[LEVEL] message` on stderr, `info` by default,
/// `debug` with `--verbose`, and `RUST_LOG` on top of either.
fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    builder.parse_default_env();
    builder.format(|buf, record| {
        use std::io::Write;
        writeln!(buf, "[{}] {}", record.level(), record.args())
    });
    let _ = builder.try_init();
}

/// Execute the redact subcommand.
fn run_redact(args: RedactArgs) -> Result<(), ScrubError> {
    let json = match args.report.as_str() {
        "json" => true,
        "text" => false,
        other => {
            return Err(ScrubError::InvalidConfig(format!(
                "unknown report format '{}' (supported: text, json)",
                other
            )))
        }
    };
    let config = build_config(&args)?;
    let resolved = config.validate()?;

    // Rule errors are fatal before any file is touched.
    let rules = rules::load_rules(&resolved.rules)?;
    log::info!(
        "loaded {} active rule(s) from {}",
        rules.len(),
        resolved.rules.display()
    );

    let pipeline = Pipeline::new(&rules, resolved.pipeline);
    log::debug!("pipeline options: {:?}", pipeline.options());
    let report = batch::run_batch(
        &resolved.input_dir,
        &resolved.output_dir,
        &pipeline,
        &resolved.detectors,
        resolved.batch,
    )?;

    if json {
        println!("{}", to_json(&report)?);
    } else {
        print!("{}", report);
    }

    if args.strict && !report.is_clean() {
        return Err(ScrubError::BatchHadFailures {
            failed: report.failed_count(),
            report,
        });
    }
    Ok(())
}

/// Merges the optional YAML config with command-line overrides.
fn build_config(args: &RedactArgs) -> Result<RedactConfig, ScrubError> {
    let mut config = match &args.config {
        Some(path) => RedactConfig::load(path)?,
        None => RedactConfig::default(),
    };

    if let Some(dir) = &args.input_dir {
        config.input_dir = Some(dir.clone());
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = Some(dir.clone());
    }
    if let Some(rules) = &args.rules {
        config.rules = Some(rules.clone());
    }
    if let Some(detector) = &args.detector {
        config.detector = parse_detector(detector)?;
    }
    if let Some(model) = &args.model {
        config.model = Some(model.clone());
    }
    if let Some(jobs) = args.jobs {
        config.jobs = jobs;
    }
    if let Some(radius) = args.radius {
        config.inpaint_radius = radius;
    }
    if let Some(method) = &args.method {
        config.inpaint_method = parse_method(method)?;
    }
    config.recursive |= args.recursive;
    config.preserve_range |= args.preserve_range;
    Ok(config)
}

fn parse_detector(name: &str) -> Result<DetectorKind, ScrubError> {
    match name {
        "none" => Ok(DetectorKind::None),
        "sidecar" => Ok(DetectorKind::Sidecar),
        "dbnet" => Ok(DetectorKind::Dbnet),
        other => Err(ScrubError::InvalidConfig(format!(
            "unknown detector '{}' (supported: none, sidecar, dbnet)",
            other
        ))),
    }
}

fn parse_method(name: &str) -> Result<InpaintMethod, ScrubError> {
    match name {
        "ns" | "navier-stokes" => Ok(InpaintMethod::NavierStokes),
        "telea" => Ok(InpaintMethod::Telea),
        other => Err(ScrubError::InvalidConfig(format!(
            "unknown inpainting method '{}' (supported: ns, telea)",
            other
        ))),
    }
}

/// Execute the rules subcommand.
fn run_rules(args: RulesArgs) -> Result<(), ScrubError> {
    let table = rules::load_rules(&args.input)?;
    match args.output.as_str() {
        "json" => {
            let value = serde_json::json!({
                "rows_read": table.rows_read,
                "disabled": table.disabled_count(),
                "active": table.active_tags().map(|t| t.to_string()).collect::<Vec<_>>(),
            });
            println!("{}", to_json(&value)?);
        }
        "text" => print!("{}", table),
        other => {
            return Err(ScrubError::InvalidConfig(format!(
                "unknown output format '{}' (supported: text, json)",
                other
            )))
        }
    }
    Ok(())
}

/// Execute the inspect subcommand.
fn run_inspect(args: InspectArgs) -> Result<(), ScrubError> {
    let record = dicom::io_part10::read_part10(&args.input)?;
    let report = inspect::inspect_record(&record, &args.input);
    match args.output.as_str() {
        "json" => println!("{}", to_json(&report)?),
        "text" => print!("{}", report),
        other => {
            return Err(ScrubError::InvalidConfig(format!(
                "unknown output format '{}' (supported: text, json)",
                other
            )))
        }
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, ScrubError> {
    serde_json::to_string_pretty(value).map_err(|e| ScrubError::Serialization {
        path: Path::new("<stdout>").to_path_buf(),
        message: e.to_string(),
    })
}
