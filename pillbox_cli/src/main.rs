use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use pillbox_core::*;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "pillbox")]
#[command(about = "Medication prescription and dose schedule tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage users (patients)
    User {
        #[command(subcommand)]
        command: UserCommand,
    },

    /// Manage prescriptions
    Rx {
        #[command(subcommand)]
        command: RxCommand,
    },

    /// Record that a dose was taken or skipped
    Dose {
        #[command(subcommand)]
        command: DoseCommand,
    },

    /// Show a patient's pending doses, earliest first
    Remaining {
        #[arg(long)]
        patient: UserId,

        /// Maximum number of doses across all regimens
        #[arg(long)]
        limit: Option<usize>,

        /// Print JSON instead of a listing
        #[arg(long)]
        json: bool,
    },

    /// Export a patient's full dose schedule as CSV
    Export {
        #[arg(long)]
        patient: UserId,

        /// Output file (stdout if omitted)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum UserCommand {
    /// Register a new user
    Add { name: String },
    /// Show a user
    Show { id: UserId },
}

#[derive(Subcommand)]
enum RxCommand {
    /// Create a prescription from JSON and generate its doses
    Add {
        #[arg(long)]
        patient: UserId,

        /// Prescription JSON file (stdin if omitted)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Schedule start, RFC 3339 (overrides the JSON)
        #[arg(long, value_parser = parse_timestamp)]
        start: Option<DateTime<Utc>>,
    },
    /// Show a prescription
    Show { id: PrescriptionId },
    /// List all prescriptions
    List,
}

#[derive(Subcommand)]
enum DoseCommand {
    /// Mark a dose as taken
    Take {
        id: DoseId,
        /// Time taken, RFC 3339 (defaults to now)
        #[arg(long, value_parser = parse_timestamp)]
        at: Option<DateTime<Utc>>,
    },
    /// Mark a dose as skipped
    Skip {
        id: DoseId,
        /// Time skipped, RFC 3339 (defaults to now)
        #[arg(long, value_parser = parse_timestamp)]
        at: Option<DateTime<Utc>>,
    },
}

fn main() -> ExitCode {
    // Initialize logging
    pillbox_core::logging::init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            exit_code(&e)
        }
    }
}

fn exit_code(err: &Error) -> ExitCode {
    match err.kind() {
        ErrorKind::NotFound => ExitCode::from(4),
        ErrorKind::BadRequest => ExitCode::from(2),
        ErrorKind::Internal => ExitCode::FAILURE,
    }
}

fn run(cli: Cli) -> Result<()> {
    // Determine data directory
    let config = Config::load()?;
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| config.data.data_dir.clone());
    let snapshot = SnapshotFile::in_dir(&data_dir);
    let ctx = RequestContext::new();

    match cli.command {
        Commands::User { command } => match command {
            UserCommand::Add { name } => {
                let user = snapshot.update(|store| {
                    PrescriptionService::new(store, config.clone()).register_user(&ctx, &name)
                })?;
                print_json(&user)
            }
            UserCommand::Show { id } => {
                let user = snapshot.read(|store| {
                    PrescriptionService::new(store, config.clone()).get_user(&ctx, id)
                })?;
                print_json(&user)
            }
        },

        Commands::Rx { command } => match command {
            RxCommand::Add {
                patient,
                file,
                start,
            } => {
                let mut rx = read_prescription(file)?;
                if start.is_some() {
                    rx.schedule_start = start;
                }
                let created = snapshot.update(|store| {
                    PrescriptionService::new(store, config.clone())
                        .create_prescription(&ctx, patient, rx)
                })?;
                print_json(&created)
            }
            RxCommand::Show { id } => {
                let rx = snapshot.read(|store| {
                    PrescriptionService::new(store, config.clone()).get_prescription(&ctx, id)
                })?;
                print_json(&rx)
            }
            RxCommand::List => {
                let all = snapshot.read(|store| {
                    PrescriptionService::new(store, config.clone()).list_prescriptions(&ctx)
                })?;
                print_json(&all)
            }
        },

        Commands::Dose { command } => {
            let (id, taken, at) = match command {
                DoseCommand::Take { id, at } => (id, true, at),
                DoseCommand::Skip { id, at } => (id, false, at),
            };
            let dose = snapshot.update(|store| {
                PrescriptionService::new(store, config.clone()).mark_dose(&ctx, id, taken, at)
            })?;
            print_json(&dose)
        }

        Commands::Remaining {
            patient,
            limit,
            json,
        } => {
            let groups = snapshot.read(|store| {
                PrescriptionService::new(store, config.clone())
                    .remaining_doses(&ctx, patient, limit)
            })?;
            if json {
                print_json(&groups)
            } else {
                print_remaining(&groups)
            }
        }

        Commands::Export { patient, out } => {
            let regimens = snapshot.read(|store| {
                PrescriptionService::new(store, config.clone()).patient_regimens(&ctx, patient)
            })?;
            let count = match out {
                Some(path) => {
                    let count = csv_export::write_schedule(&regimens, std::fs::File::create(&path)?)?;
                    eprintln!("✓ Exported {} doses to {}", count, path.display());
                    count
                }
                None => csv_export::write_schedule(&regimens, io::stdout().lock())?,
            };
            tracing::debug!("Export finished with {} rows", count);
            Ok(())
        }
    }
}

fn parse_timestamp(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 timestamp {:?}: {}", s, e))
}

fn read_prescription(file: Option<PathBuf>) -> Result<NewPrescription> {
    let contents = match file {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    Ok(serde_json::from_str(&contents)?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

fn print_remaining(groups: &[RegimenDoses]) -> Result<()> {
    let mut stdout = io::stdout().lock();

    if groups.is_empty() {
        writeln!(stdout, "No remaining doses.")?;
        return Ok(());
    }

    for group in groups {
        let med = &group.medication;
        if med.brand.is_empty() {
            writeln!(stdout, "{} (regimen {})", med.name, group.regimen_id)?;
        } else {
            writeln!(
                stdout,
                "{} [{}] (regimen {})",
                med.name, med.brand, group.regimen_id
            )?;
        }

        for dose in &group.doses {
            writeln!(
                stdout,
                "  #{:<6} {}  {} {}  refill {}",
                dose.id,
                dose.time.format("%Y-%m-%d %H:%M UTC"),
                dose.amount,
                dose.unit,
                dose.refill
            )?;
        }
    }

    Ok(())
}
