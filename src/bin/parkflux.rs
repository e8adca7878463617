//! Park Flux CLI - Command-line interface for Park Flux
//!
//! Commands:
//! - learn: Feed parking sessions into the model
//! - predict: Predict where the user will park
//! - recommend: Rank known parking areas near a location
//! - maintain: Run maintenance jobs once
//! - stats / export / import: Inspect and move the learned model
//! - doctor: Diagnose configuration and stored data

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use park_flux::analytics::TracingAnalytics;
use park_flux::storage::{FileStorage, StorageAdapter, CLUSTERS_KEY, METRICS_KEY, PATTERNS_KEY};
use park_flux::{
    EngineBuilder, EngineConfig, GeoPoint, LocationFix, ParkError, ParkingEngine,
    ParkingSession, PARK_FLUX_VERSION, PRODUCER_NAME,
};
use tracing_subscriber::EnvFilter;

/// Park Flux - On-device engine that learns where you park
#[derive(Parser)]
#[command(name = "parkflux")]
#[command(author = "Synheart AI Inc")]
#[command(version = PARK_FLUX_VERSION)]
#[command(about = "Learn parking habits and predict where to park", long_about = None)]
struct Cli {
    /// Directory holding the learned model
    #[arg(long, global = true, default_value = ".parkflux")]
    data_dir: PathBuf,

    /// Engine configuration (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON (level via PARKFLUX_LOG, default "warn")
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Learn from completed parking sessions
    Learn {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        format: InputFormat,
    },

    /// Predict where you will park
    Predict {
        #[arg(long, allow_hyphen_values = true, required_unless_present = "fix", requires = "lng")]
        lat: Option<f64>,

        #[arg(long, allow_hyphen_values = true, required_unless_present = "fix", requires = "lat")]
        lng: Option<f64>,

        /// Location fix JSON from the device provider (use - for stdin)
        #[arg(long, conflicts_with_all = ["lat", "lng"])]
        fix: Option<PathBuf>,

        /// Destination latitude
        #[arg(long, allow_hyphen_values = true, requires = "dest_lng")]
        dest_lat: Option<f64>,

        /// Destination longitude
        #[arg(long, allow_hyphen_values = true, requires = "dest_lat")]
        dest_lng: Option<f64>,

        /// Context tag (repeatable), e.g. --tag work
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Rank known parking areas near a location
    Recommend {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lng: f64,

        /// Search radius in meters
        #[arg(long)]
        radius: Option<f64>,
    },

    /// Run maintenance jobs once (both when no flag is given)
    Maintain {
        /// Prune stale patterns
        #[arg(long)]
        patterns: bool,

        /// Prune and merge clusters
        #[arg(long)]
        clusters: bool,
    },

    /// Print model and cache counters
    Stats,

    /// Write the learned model as JSON
    Export {
        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },

    /// Replace the learned model with an exported JSON document
    Import {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Diagnose configuration and stored data
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one session per line)
    Ndjson,
    /// JSON array of sessions
    Json,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_logging(json: bool) {
    let filter =
        EnvFilter::try_from_env("PARKFLUX_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr);

    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn run(cli: Cli) -> Result<(), ParkCliError> {
    if let Commands::Doctor { json } = cli.command {
        return cmd_doctor(&cli.data_dir, cli.config.as_deref(), json).await;
    }

    let config = load_config(cli.config.as_deref())?;
    let engine = EngineBuilder::new(config)
        .storage(Arc::new(FileStorage::new(&cli.data_dir)))
        .analytics(Arc::new(TracingAnalytics))
        .build()
        .await?;

    let result = match cli.command {
        Commands::Learn { input, format } => cmd_learn(&engine, &input, format),
        Commands::Predict {
            lat,
            lng,
            fix,
            dest_lat,
            dest_lng,
            tags,
        } => {
            let current = match (fix, lat.zip(lng)) {
                (Some(path), _) => {
                    let fix: LocationFix = serde_json::from_str(&read_input(&path)?)?;
                    GeoPoint::from(fix)
                }
                (None, Some((lat, lng))) => GeoPoint::new(lat, lng),
                (None, None) => {
                    return Err(ParkCliError::Engine(ParkError::MissingField(
                        "--lat/--lng or --fix".to_string(),
                    )))
                }
            };
            let destination = dest_lat.zip(dest_lng).map(|(lat, lng)| GeoPoint::new(lat, lng));
            let prediction = engine.predict(current, destination, &tags)?;
            print_json(&prediction)
        }
        Commands::Recommend { lat, lng, radius } => {
            let recommendations = engine.recommend(GeoPoint::new(lat, lng), radius).await?;
            print_json(&recommendations)
        }
        Commands::Maintain { patterns, clusters } => {
            let both = !patterns && !clusters;
            let mut reports = Vec::new();
            if patterns || both {
                reports.push(engine.run_pattern_maintenance()?);
            }
            if clusters || both {
                reports.push(engine.run_cluster_maintenance()?);
            }
            print_json(&reports)
        }
        Commands::Stats => print_json(&engine.stats()),
        Commands::Export { output } => {
            let snapshot = engine.export_snapshot()?;
            write_output(&output, &snapshot)
        }
        Commands::Import { input } => {
            let generation = engine.import_snapshot(&read_input(&input)?)?;
            print_json(&serde_json::json!({ "imported": true, "generation": generation }))
        }
        Commands::Doctor { .. } => Ok(()),
    };

    // Persist whatever was changed, even if the command itself failed late
    engine.flush().await;
    result
}

fn cmd_learn(
    engine: &ParkingEngine,
    input: &Path,
    format: InputFormat,
) -> Result<(), ParkCliError> {
    let data = read_input(input)?;
    let sessions = match format {
        InputFormat::Ndjson => data
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                ParkingSession::from_json(line).map_err(|e| ParkCliError::Session {
                    line: i + 1,
                    source: e,
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
        InputFormat::Json => {
            let sessions: Vec<ParkingSession> = serde_json::from_str(&data)?;
            for (i, session) in sessions.iter().enumerate() {
                session.validate().map_err(|e| ParkCliError::Session {
                    line: i + 1,
                    source: e,
                })?;
            }
            sessions
        }
    };

    if sessions.is_empty() {
        return Err(ParkCliError::NoSessions);
    }

    let mut created = 0;
    let mut reinforced = 0;
    let mut generation = 0;
    for session in &sessions {
        let outcome = engine.learn(session)?;
        if outcome.pattern.created {
            created += 1;
        } else {
            reinforced += 1;
        }
        generation = outcome.generation;
    }

    print_json(&serde_json::json!({
        "learned": sessions.len(),
        "patterns_created": created,
        "patterns_reinforced": reinforced,
        "generation": generation,
    }))
}

async fn cmd_doctor(
    data_dir: &Path,
    config_path: Option<&Path>,
    json: bool,
) -> Result<(), ParkCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "park_flux_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Park Flux version {}", PARK_FLUX_VERSION),
    });

    match config_path {
        Some(path) => match EngineConfig::from_toml_file(path) {
            Ok(_) => checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!("Configuration {} is valid", path.display()),
            }),
            Err(e) => checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            }),
        },
        None => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: "Using built-in defaults".to_string(),
        }),
    }

    if data_dir.is_dir() {
        checks.push(DoctorCheck {
            name: "data_dir".to_string(),
            status: CheckStatus::Ok,
            message: format!("Data directory {}", data_dir.display()),
        });

        let storage = FileStorage::new(data_dir);
        for key in [PATTERNS_KEY, CLUSTERS_KEY, METRICS_KEY] {
            let check = match storage.get(key).await {
                Ok(Some(bytes)) => match serde_json::from_slice::<serde_json::Value>(&bytes) {
                    Ok(value) => DoctorCheck {
                        name: key.to_string(),
                        status: CheckStatus::Ok,
                        message: match value.as_array() {
                            Some(items) => format!("{} records", items.len()),
                            None => "present".to_string(),
                        },
                    },
                    Err(e) => DoctorCheck {
                        name: key.to_string(),
                        status: CheckStatus::Error,
                        message: format!("Invalid JSON: {}", e),
                    },
                },
                Ok(None) => DoctorCheck {
                    name: key.to_string(),
                    status: CheckStatus::Warning,
                    message: "Nothing learned yet".to_string(),
                },
                Err(e) => DoctorCheck {
                    name: key.to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                },
            };
            checks.push(check);
        }
    } else {
        checks.push(DoctorCheck {
            name: "data_dir".to_string(),
            status: CheckStatus::Warning,
            message: format!(
                "Data directory {} does not exist yet; it is created on first learn",
                data_dir.display()
            ),
        });
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (learn --input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: PARK_FLUX_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Park Flux Doctor Report");
        println!("=======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(ParkCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, ParkCliError> {
    match path {
        Some(path) => Ok(EngineConfig::from_toml_file(path)?),
        None => Ok(EngineConfig::default()),
    }
}

fn read_input(input: &Path) -> Result<String, ParkCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn write_output(output: &Path, data: &str) -> Result<(), ParkCliError> {
    if output.to_string_lossy() == "-" {
        println!("{}", data);
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), ParkCliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// Error types

#[derive(Debug)]
enum ParkCliError {
    Io(io::Error),
    Engine(ParkError),
    Json(serde_json::Error),
    Session { line: usize, source: ParkError },
    NoSessions,
    DoctorFailed,
}

impl From<io::Error> for ParkCliError {
    fn from(e: io::Error) -> Self {
        ParkCliError::Io(e)
    }
}

impl From<ParkError> for ParkCliError {
    fn from(e: ParkError) -> Self {
        ParkCliError::Engine(e)
    }
}

impl From<serde_json::Error> for ParkCliError {
    fn from(e: serde_json::Error) -> Self {
        ParkCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<ParkCliError> for CliError {
    fn from(e: ParkCliError) -> Self {
        match e {
            ParkCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            ParkCliError::Engine(e) => {
                let (code, hint) = match &e {
                    ParkError::Validation(_) | ParkError::MissingField(_) => (
                        "VALIDATION_ERROR",
                        "Check coordinates and required session fields",
                    ),
                    ParkError::Config(_) => ("CONFIG_ERROR", "Run 'parkflux doctor --config <file>'"),
                    ParkError::Json(_) => ("JSON_ERROR", "Check JSON syntax"),
                    ParkError::Storage(_) => ("STORAGE_ERROR", "Check the --data-dir permissions"),
                    ParkError::Assistant(_) => ("ASSISTANT_ERROR", "Retry later"),
                    ParkError::MaintenanceInProgress(_) => {
                        ("MAINTENANCE_BUSY", "Wait for the running job to finish")
                    }
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            ParkCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            ParkCliError::Session { line, source } => CliError {
                code: "INVALID_SESSION".to_string(),
                message: format!("Session {}: {}", line, source),
                hint: Some(
                    "Each session needs start_location, parking_location, \
                     search_duration_minutes and was_successful"
                        .to_string(),
                ),
            },
            ParkCliError::NoSessions => CliError {
                code: "NO_SESSIONS".to_string(),
                message: "No sessions found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            ParkCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
