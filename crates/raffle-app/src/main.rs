// Raffle command-line entry point.
//
// Startup sequence:
// 1. Parse arguments
// 2. Initialize tracing (log to file, stdout is for results)
// 3. Load config
// 4. Open database, sync teams, check for stored results
// 5. Spawn the app loop and send it the requested command
// 6. Print updates until the loop exits

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info};

use raffle_app::app;
use raffle_app::config;
use raffle_app::db;
use raffle_app::export::TeamSummary;
use raffle_app::protocol::{RaffleSummary, UiUpdate, UserCommand};
use raffle_core::RaffleMode;

#[derive(Parser, Debug)]
#[command(name = "raffle", about = "Corporate sports team raffle")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import employee registrations from a CSV file
    Import { csv: PathBuf },

    /// Draw teams
    Run {
        /// Place every employee in their best-fit sport
        #[arg(long, conflicts_with = "sport", required_unless_present = "sport")]
        all_sports: bool,

        /// Draw a single sport
        #[arg(long)]
        sport: Option<String>,
    },

    /// Show stored results
    Results,

    /// Write roster exports
    Export,

    /// Delete stored results
    Reset {
        /// Only this sport
        #[arg(long)]
        sport: Option<String>,
    },
}

impl Command {
    fn into_user_command(self) -> UserCommand {
        match self {
            Command::Import { csv } => UserCommand::ImportRegistrations(csv),
            Command::Run { sport: Some(sport), .. } => {
                UserCommand::RunRaffle(RaffleMode::SportBySport(sport))
            }
            Command::Run { sport: None, .. } => UserCommand::RunRaffle(RaffleMode::AllSports),
            Command::Results => UserCommand::ShowResults,
            Command::Export => UserCommand::Export,
            Command::Reset { sport } => UserCommand::ClearResults(sport),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Parse arguments
    let cli = Cli::parse();

    // 2. Initialize tracing
    init_tracing()?;
    info!("Raffle starting up");

    // 3. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: event={}, {} sports, {} teams",
        config.event.name,
        config.sports.len(),
        config.teams.len()
    );

    // 4. Open database
    let db = db::Database::open(&config.db_path).context("failed to open database")?;
    info!("Database opened at {}", config.db_path);

    let mut app_state = app::AppState::new(config, db);
    let team_count = app_state.sync_teams().context("failed to sync teams")?;
    info!("{} teams available", team_count);

    match app::recover_from_db(&mut app_state) {
        Ok(true) => info!("Stored results found"),
        Ok(false) => info!("No stored results"),
        Err(e) => {
            error!("Failed to read stored state: {}", e);
            return Err(e.context("failed to read stored state"));
        }
    }

    // 5. Spawn the app loop
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let (ui_tx, mut ui_rx) = mpsc::channel(32);
    let app_handle = tokio::spawn(async move {
        if let Err(e) = app::run(cmd_rx, ui_tx, app_state).await {
            error!("Application loop error: {}", e);
        }
    });

    cmd_tx
        .send(cli.command.into_user_command())
        .await
        .context("application loop exited early")?;
    cmd_tx
        .send(UserCommand::Shutdown)
        .await
        .context("application loop exited early")?;

    // 6. Print updates until the loop drops its sender
    let mut failed = false;
    while let Some(update) = ui_rx.recv().await {
        failed |= matches!(update, UiUpdate::Error(_));
        print_update(&update);
    }
    let _ = app_handle.await;

    info!("Raffle shut down");
    if failed {
        anyhow::bail!("command failed; see logs/raffle.log for details");
    }
    Ok(())
}

fn print_update(update: &UiUpdate) {
    match update {
        UiUpdate::RaffleCompleted(summary) => print_raffle_summary(summary),
        UiUpdate::Results { assignment, teams } => {
            if assignment.is_empty() {
                println!("No stored results.");
            } else {
                print_team_counts(teams);
                println!("{} players placed.", assignment.total_players());
            }
        }
        UiUpdate::Exported(paths) => {
            for path in paths {
                println!("wrote {}", path.display());
            }
        }
        UiUpdate::ResultsCleared { sport, removed } => match sport {
            Some(sport) => println!("Removed {removed} {sport} placements."),
            None => println!("Removed {removed} placements."),
        },
        UiUpdate::Imported { count } => println!("Imported {count} registrations."),
        UiUpdate::Error(message) => eprintln!("error: {message}"),
    }
}

fn print_raffle_summary(summary: &RaffleSummary) {
    println!("Raffle {} ({})", summary.raffle_id, summary.mode);
    print_team_counts(&summary.teams);
    println!(
        "{} placed, {} already raffled, {} rebalancing moves",
        summary.placed, summary.excluded, summary.moves
    );
    if !summary.unplaced.is_empty() {
        println!(
            "{} employees registered for no sport: {}",
            summary.unplaced.len(),
            summary.unplaced.join(", ")
        );
    }
}

fn print_team_counts(teams: &[TeamSummary]) {
    for team in teams {
        let counts: Vec<String> = team
            .counts
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(sport, n)| format!("{sport}={n}"))
            .collect();
        println!("  {:<20} {:>3}  {}", team.team_name, team.total, counts.join(" "));
    }
}

/// Initialize tracing to log to a file (stdout carries command output).
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("raffle.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("raffle_app=info,raffle_core=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
