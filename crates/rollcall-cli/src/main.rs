use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rollcall_core::{ConsistencyTracker, FrameMatcher, IdentityDatabase, OnnxProvider, SkipReason, Skipped};
use rollcall_hw::Camera;
use rollcall_sheets::{
    populate_dates_if_empty, reconcile_roster, DateRange, GoogleSheet, MarkOutcome,
    PopulateOutcome, RateLimitedWriter, RosterOutcome, Sheet, SyncReport,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod session;

use config::Config;
use session::Session;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance with a shared sheet")]
struct Cli {
    /// TOML configuration file (also ROLLCALL_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the identity database from the enrollment folder
    Enroll {
        /// Re-enroll even if a database already exists
        #[arg(long)]
        rebuild: bool,
    },
    /// List enrolled identities
    List,
    /// Run a live attendance session, then mark confirmed names
    Run {
        /// Stop after this many frames (default: until Ctrl-C)
        #[arg(long)]
        max_frames: Option<u64>,
        /// Do not touch the sheet
        #[arg(long)]
        no_sync: bool,
        /// Write the latest annotated frame to DIR/latest.jpg
        #[arg(long, value_name = "DIR")]
        annotated_dir: Option<PathBuf>,
        /// Populate row 1 with weekends in "YYYY-MM-DD to YYYY-MM-DD" if it is empty
        #[arg(long, value_name = "RANGE")]
        dates: Option<DateRange>,
    },
    /// Add every enrolled name missing from the sheet's name column
    Reconcile,
    /// Fill row 1 with weekend date headers if it is empty
    PopulateDates {
        /// "YYYY-MM-DD to YYYY-MM-DD"
        range: DateRange,
    },
    /// Mark names present without running a session
    Mark {
        #[arg(required = true)]
        names: Vec<String>,
        /// Date to mark (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// List V4L2 capture devices
    Devices,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    run_command(cli.command, config)
}

fn run_command(command: Commands, config: Config) -> Result<()> {
    match command {
        Commands::Enroll { rebuild } => {
            let mut provider = load_provider(&config)?;
            let (db, skipped) = if rebuild {
                IdentityDatabase::rebuild(&config.db_path, &config.enroll_dir, &mut provider, config.enroll_jitters)?
            } else {
                IdentityDatabase::open_or_build(
                    &config.db_path,
                    &config.enroll_dir,
                    &mut provider,
                    config.enroll_jitters,
                )?
            };
            print_skipped(&skipped);
            println!("{} identities in {}", db.len(), config.db_path.display());
        }
        Commands::List => {
            let db = IdentityDatabase::load_or_empty(&config.db_path);
            if db.is_empty() {
                println!("No identities enrolled");
            }
            for record in db.records() {
                let b = &record.bounding_box;
                println!(
                    "{:<24} box=({:.0}, {:.0}, {:.0}, {:.0})",
                    record.name,
                    b.top(),
                    b.right(),
                    b.bottom(),
                    b.left()
                );
            }
        }
        Commands::Run { max_frames, no_sync, annotated_dir, dates } => {
            run_session(&config, max_frames, no_sync, annotated_dir, dates)?;
        }
        Commands::Reconcile => {
            let db = IdentityDatabase::load_or_empty(&config.db_path);
            if db.is_empty() {
                bail!("no identities enrolled in {}; run `rollcall enroll` first", config.db_path.display());
            }
            let mut sheet = open_sheet(&config)?;
            let writer = RateLimitedWriter::new(config.retry_policy());
            report_roster(&reconcile_roster(&mut sheet, &writer, db.names())?);
        }
        Commands::PopulateDates { range } => {
            let mut sheet = open_sheet(&config)?;
            let writer = RateLimitedWriter::new(config.retry_policy());
            report_dates(&populate_dates_if_empty(&mut sheet, &writer, range, &config.sheet.date_format)?);
        }
        Commands::Mark { names, date } => {
            let date = date.unwrap_or_else(today);
            let mut sheet = open_sheet(&config)?;
            let writer = RateLimitedWriter::new(config.retry_policy());
            let report = config.synchronizer().sync(&mut sheet, &writer, &names, date)?;
            print_report(&report);
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for d in devices {
                let current = if d.path == config.camera_device { " (configured)" } else { "" };
                println!("{}  {} (driver: {}, bus: {}){current}", d.path, d.name, d.driver, d.bus);
            }
        }
    }
    Ok(())
}

fn run_session(
    config: &Config,
    max_frames: Option<u64>,
    no_sync: bool,
    annotated_dir: Option<PathBuf>,
    dates: Option<DateRange>,
) -> Result<()> {
    let mut provider = load_provider(config)?;
    let (db, skipped) =
        IdentityDatabase::open_or_build(&config.db_path, &config.enroll_dir, &mut provider, config.enroll_jitters)?;
    print_skipped(&skipped);
    if db.is_empty() {
        tracing::warn!(dir = %config.enroll_dir.display(), "no identities enrolled; every face will be unknown");
    }

    let mut sheet = if no_sync {
        None
    } else {
        let mut sheet = open_sheet(config)?;
        prepare_sheet(config, &mut sheet, &db, dates)?;
        Some(sheet)
    };

    let camera = Camera::open(&config.camera_device, config.capture_width, config.capture_height)
        .with_context(|| format!("failed to open camera {}", config.camera_device))?;
    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        "camera opened"
    );
    let mut stream = camera.stream()?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        if !request_stop(&handler_stop) {
            eprintln!("Interrupted");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    })
    .context("failed to install Ctrl-C handler")?;
    println!("Session running; press Ctrl-C to finish");

    let matcher = FrameMatcher::new(config.thresholds()?, config.live_jitters);
    let tracker = ConsistencyTracker::new(config.min_frames, config.tally_policy);
    let mut session = Session::new(&mut provider, &db, matcher, tracker);
    if let Some(dir) = annotated_dir {
        session = session.with_annotated_dir(dir)?;
    }
    let summary = session.run(&mut stream, &stop, max_frames);
    // Any further Ctrl-C exits the process.
    stop.store(true, Ordering::SeqCst);

    match summary.average_frame_time {
        Some(avg) => println!(
            "Average frame time: {:.3}s over {} frames",
            avg.as_secs_f64(),
            summary.frames
        ),
        None => println!("No frames processed"),
    }

    if summary.confirmed.is_empty() {
        println!("Nothing added to the attendance sheet");
        return Ok(());
    }
    println!("Confirmed present: {}", summary.confirmed.join(", "));

    if let Some(sheet) = sheet.as_mut() {
        let writer = RateLimitedWriter::new(config.retry_policy());
        let report = config.synchronizer().sync(sheet, &writer, &summary.confirmed, today())?;
        print_report(&report);
    }
    Ok(())
}

const INTERRUPTED_EXIT_CODE: i32 = 130;

/// First Ctrl-C ends the session gracefully. Returns false once a stop was
/// already requested, meaning the process should exit.
fn request_stop(stop: &AtomicBool) -> bool {
    !stop.swap(true, Ordering::SeqCst)
}

/// Roster and date headers, before any marking.
fn prepare_sheet<S: Sheet + ?Sized>(
    config: &Config,
    sheet: &mut S,
    db: &IdentityDatabase,
    dates: Option<DateRange>,
) -> Result<()> {
    let writer = RateLimitedWriter::new(config.retry_policy());
    report_roster(&reconcile_roster(sheet, &writer, db.names())?);

    match dates {
        Some(range) => report_dates(&populate_dates_if_empty(sheet, &writer, range, &config.sheet.date_format)?),
        None => {
            if sheet.row_values(rollcall_sheets::sheet::HEADER_ROW)?.iter().all(|v| v.trim().is_empty()) {
                tracing::warn!("row 1 has no date headers; pass --dates or run `rollcall populate-dates`");
            } else {
                println!("Dates already populated in the sheet");
            }
        }
    }
    Ok(())
}

fn load_provider(config: &Config) -> Result<OnnxProvider> {
    OnnxProvider::load(&config.model_dir, config.distance_metric)
        .with_context(|| format!("failed to load face models from {}", config.model_dir.display()))
}

fn open_sheet(config: &Config) -> Result<GoogleSheet> {
    let Some(id) = config.sheet.spreadsheet_id.as_deref() else {
        bail!("sheet.spreadsheet_id is not configured (set it in the config file or ROLLCALL_SPREADSHEET_ID)");
    };
    let Some(token) = config.sheet.access_token.as_deref() else {
        bail!("no Sheets access token (set sheet.access_token or ROLLCALL_SHEETS_TOKEN)");
    };
    Ok(GoogleSheet::new(id, config.sheet.worksheet.as_str(), token)?)
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn print_skipped(skipped: &[Skipped]) {
    for s in skipped {
        match &s.reason {
            SkipReason::EmptyName => println!("Skipping {}: no name before the extension", s.filename),
            SkipReason::NoFace => println!("No face found in {}", s.filename),
            SkipReason::Unreadable(e) => println!("Could not read {}: {e}", s.filename),
            SkipReason::ProviderFailed(e) => println!("Could not embed {}: {e}", s.filename),
        }
    }
}

fn report_roster(outcome: &RosterOutcome) {
    match outcome {
        RosterOutcome::Populated(names) => println!("Added {} names to an empty roster", names.len()),
        RosterOutcome::Extended(names) => println!("Added missing names: {}", names.join(", ")),
        RosterOutcome::AllPresent => println!("All names already present in the sheet"),
    }
}

fn report_dates(outcome: &PopulateOutcome) {
    match outcome {
        PopulateOutcome::Populated(weekends) => println!("Row 1 populated with {weekends} weekends"),
        PopulateOutcome::AlreadyPopulated => println!("Dates already populated in the sheet"),
    }
}

fn print_report(report: &SyncReport) {
    for (name, outcome) in &report.outcomes {
        match outcome {
            MarkOutcome::Marked(_) => println!("Attendance marked for {name} on {}", report.date_header),
            MarkOutcome::AlreadyMarked(_) => {
                println!("Attendance already marked for {name} on {}", report.date_header)
            }
            MarkOutcome::NameNotFound => println!("Name {name} not found in the sheet"),
            MarkOutcome::DateNotFound => println!("Date {} not found in the sheet", report.date_header),
        }
    }
}
