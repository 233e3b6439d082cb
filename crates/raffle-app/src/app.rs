// Application state and the command loop.
//
// Commands are handled one at a time off a single channel, so at most one
// raffle is in flight. Each run reads teams, registrations and the already
// raffled codes from the store, draws, and persists every sport's rosters.

use std::path::{Path, PathBuf};

use anyhow::Context;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use raffle_core::{run_raffle, Assignment, RaffleMode, Team};

use crate::config::Config;
use crate::db::{Database, ExclusionScope};
use crate::export::{export_all, team_summary, TeamSummary};
use crate::import::load_registrations;
use crate::protocol::{RaffleSummary, UiUpdate, UserCommand};

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// The complete application state.
pub struct AppState {
    pub config: Config,
    pub db: Database,
    /// Teams as stored, with their numeric ids. Refreshed by `sync_teams`.
    pub teams: Vec<Team>,
    /// Id of the most recent raffle run, restored from the store on start.
    pub last_raffle_id: Option<String>,
}

impl AppState {
    pub fn new(config: Config, db: Database) -> Self {
        AppState {
            config,
            db,
            teams: Vec::new(),
            last_raffle_id: None,
        }
    }

    /// Upsert the configured teams into the store and reload the team list.
    /// Teams already in the store but absent from config are kept.
    pub fn sync_teams(&mut self) -> anyhow::Result<usize> {
        for seed in &self.config.teams {
            self.db
                .upsert_team(&seed.to_team())
                .with_context(|| format!("failed to store team {}", seed.code))?;
        }
        self.teams = self.db.list_teams()?;
        Ok(self.teams.len())
    }

    /// Per-run random source: fresh entropy, or `seed + run number` when a
    /// seed is configured.
    fn raffle_rng(&self) -> anyhow::Result<StdRng> {
        match self.config.raffle.seed {
            Some(seed) => {
                let run = self.db.next_run_number()?;
                Ok(StdRng::seed_from_u64(seed.wrapping_add(run)))
            }
            None => Ok(StdRng::from_entropy()),
        }
    }

    /// Run one raffle and persist its rosters.
    pub fn run_raffle(&mut self, mode: &RaffleMode) -> anyhow::Result<RaffleSummary> {
        let teams = self.db.list_teams()?;
        let employees = self.db.list_employees()?;
        let scope = match mode.target_sport() {
            Some(sport_id) => ExclusionScope::Sport(sport_id.to_string()),
            None => ExclusionScope::AnySport,
        };
        let excluded = self.db.list_raffled_employee_codes(&scope)?;
        let mut rng = self.raffle_rng()?;

        let outcome = run_raffle(
            &employees,
            &teams,
            &self.config.sports,
            mode,
            &excluded,
            &self.config.raffle_options(),
            &mut rng,
        )
        .with_context(|| format!("raffle ({mode}) failed"))?;

        let raffle_id = Database::generate_raffle_id();
        let persisted = self
            .db
            .persist_raffle(&raffle_id, &teams, &outcome.assignment)
            .with_context(|| format!("failed to persist raffle {raffle_id}"))?;
        if persisted < outcome.placed() {
            warn!(
                "{} placements were already stored and were skipped",
                outcome.placed() - persisted
            );
        }
        self.last_raffle_id = Some(raffle_id.clone());

        info!(
            "Raffle {} stored: {} placed, {} persisted ({})",
            raffle_id,
            outcome.placed(),
            persisted,
            outcome.assignment.sport_ids().join(", ")
        );

        Ok(RaffleSummary {
            raffle_id,
            mode: outcome.mode.clone(),
            placed: outcome.placed(),
            persisted,
            teams: team_summary(&outcome.assignment, &teams, &self.config.sports),
            unplaced: outcome.unplaced,
            excluded: outcome.excluded,
            moves: outcome.moves,
        })
    }

    /// Persisted results with per-team counts.
    pub fn results(&self) -> anyhow::Result<(Assignment, Vec<TeamSummary>)> {
        let assignment = self.db.load_results()?;
        let teams = self.db.list_teams()?;
        let summary = team_summary(&assignment, &teams, &self.config.sports);
        Ok((assignment, summary))
    }

    pub fn export(&self) -> anyhow::Result<Vec<PathBuf>> {
        let assignment = self.db.load_results()?;
        let teams = self.db.list_teams()?;
        let paths = export_all(
            Path::new(&self.config.export_dir),
            &self.config.event.name,
            &assignment,
            &teams,
            &self.config.sports,
        )?;
        Ok(paths)
    }

    pub fn import_registrations(&self, path: &Path) -> anyhow::Result<usize> {
        let employees = load_registrations(path, &self.config.sports)?;
        let count = self.db.import_employees(&employees)?;
        info!("Imported {} registrations from {}", count, path.display());
        Ok(count)
    }

    pub fn clear_results(&mut self, sport: Option<&str>) -> anyhow::Result<usize> {
        let removed = self.db.clear_results(sport)?;
        info!(
            "Cleared {} results ({})",
            removed,
            sport.unwrap_or("all sports")
        );
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

/// Run the application loop until `Shutdown`, Ctrl+C, or the command
/// channel closes. Results go out through `ui_tx`.
pub async fn run(
    mut cmd_rx: mpsc::Receiver<UserCommand>,
    ui_tx: mpsc::Sender<UiUpdate>,
    mut state: AppState,
) -> anyhow::Result<()> {
    info!("Application event loop started");

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UserCommand::Shutdown) => {
                        info!("Shutdown command received");
                        break;
                    }
                    Some(cmd) => {
                        handle_user_command(&mut state, cmd, &ui_tx).await;
                    }
                    None => {
                        info!("Command channel closed, shutting down");
                        break;
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    info!("Application event loop stopped");
    Ok(())
}

async fn handle_user_command(
    state: &mut AppState,
    cmd: UserCommand,
    ui_tx: &mpsc::Sender<UiUpdate>,
) {
    let update = match cmd {
        UserCommand::RunRaffle(mode) => state
            .run_raffle(&mode)
            .map(|summary| UiUpdate::RaffleCompleted(Box::new(summary))),
        UserCommand::ShowResults => state.results().map(|(assignment, teams)| UiUpdate::Results {
            assignment: Box::new(assignment),
            teams,
        }),
        UserCommand::Export => state.export().map(UiUpdate::Exported),
        UserCommand::ClearResults(sport) => state
            .clear_results(sport.as_deref())
            .map(|removed| UiUpdate::ResultsCleared { sport, removed }),
        UserCommand::ImportRegistrations(path) => state
            .import_registrations(&path)
            .map(|count| UiUpdate::Imported { count }),
        UserCommand::Shutdown => return,
    };

    let update = update.unwrap_or_else(|e| {
        error!("Command failed: {:#}", e);
        UiUpdate::Error(format!("{e:#}"))
    });
    let _ = ui_tx.send(update).await;
}

/// Restore state from the store after a restart. Returns `true` when
/// earlier raffle results exist.
pub fn recover_from_db(state: &mut AppState) -> anyhow::Result<bool> {
    state.last_raffle_id = state.db.last_raffle_id()?;
    let registered = state.db.employee_count()?;
    let stored = state.db.result_count()?;
    if stored == 0 {
        info!(
            "No stored raffle results, starting fresh with {} registrations",
            registered
        );
        return Ok(false);
    }
    info!(
        "Found {} stored placements for {} registrations (last raffle {})",
        stored,
        registered,
        state.last_raffle_id.as_deref().unwrap_or("unknown")
    );
    Ok(true)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EventConfig, RaffleSettings, TeamSeed};
    use raffle_core::eligibility::TieBreak;
    use raffle_core::{Employee, Sport};
    use std::collections::HashSet;

    // -----------------------------------------------------------------------
    // Test helpers
    // -----------------------------------------------------------------------

    fn test_config(team_count: usize, seed: Option<u64>) -> Config {
        Config {
            event: EventConfig {
                name: "Test Meet".into(),
            },
            db_path: ":memory:".into(),
            raffle: RaffleSettings {
                tie_break: TieBreak::CatalogueOrder,
                seed,
            },
            export_dir: std::env::temp_dir()
                .join("raffle_app_test_exports")
                .display()
                .to_string(),
            sports: Sport::catalogue(),
            teams: (1..=team_count)
                .map(|i| TeamSeed {
                    code: format!("team_{i}"),
                    name: format!("Team {i}"),
                    color: String::new(),
                    lead: None,
                })
                .collect(),
        }
    }

    fn create_test_app_state(team_count: usize, seed: Option<u64>) -> AppState {
        let db = Database::open(":memory:").expect("in-memory database should open");
        let mut state = AppState::new(test_config(team_count, seed), db);
        state.sync_teams().expect("teams should sync");
        state
    }

    fn registrations() -> Vec<Employee> {
        (0..24)
            .map(|i| {
                let e = Employee::new(0, format!("E{i:03}"), format!("Employee {i}"));
                match i % 3 {
                    0 => e.with_preference("cricket", 3, "High"),
                    1 => e
                        .with_preference("relay", 2, "Medium")
                        .with_preference("cricket", 1, "Low"),
                    _ => e.with_preference("badminton", 1, "Not specified"),
                }
            })
            .collect()
    }

    fn seeded_state(team_count: usize, seed: Option<u64>) -> AppState {
        let state = create_test_app_state(team_count, seed);
        state.db.import_employees(&registrations()).unwrap();
        state
    }

    // -----------------------------------------------------------------------
    // Tests: state operations
    // -----------------------------------------------------------------------

    #[test]
    fn sync_teams_assigns_numeric_ids() {
        let state = create_test_app_state(3, None);
        assert_eq!(state.teams.len(), 3);
        let ids: HashSet<i64> = state.teams.iter().map(|t| t.numeric_id).collect();
        assert_eq!(ids.len(), 3);
        assert!(state.teams.iter().all(|t| t.numeric_id > 0));
    }

    #[test]
    fn all_sports_run_persists_every_placement() {
        let mut state = seeded_state(4, Some(11));
        let summary = state.run_raffle(&RaffleMode::AllSports).unwrap();

        assert_eq!(summary.placed, 24);
        assert_eq!(summary.persisted, 24);
        assert!(summary.unplaced.is_empty());
        assert_eq!(summary.excluded, 0);
        assert_eq!(summary.teams.len(), 4);
        assert_eq!(state.db.result_count().unwrap(), 24);
        assert_eq!(state.last_raffle_id.as_deref(), Some(summary.raffle_id.as_str()));

        // Each team gets 2 of the 8 cricket, relay and badminton players.
        for team in &summary.teams {
            assert_eq!(team.counts["cricket"], 2);
            assert_eq!(team.counts["relay"], 2);
            assert_eq!(team.counts["badminton"], 2);
        }
    }

    #[test]
    fn second_all_sports_run_excludes_everyone() {
        let mut state = seeded_state(4, None);
        state.run_raffle(&RaffleMode::AllSports).unwrap();
        let again = state.run_raffle(&RaffleMode::AllSports).unwrap();
        assert_eq!(again.placed, 0);
        assert_eq!(again.excluded, 24);
        assert_eq!(state.db.result_count().unwrap(), 24);
    }

    #[test]
    fn sport_by_sport_exclusion_is_per_sport() {
        let mut state = seeded_state(2, None);
        let cricket = state
            .run_raffle(&RaffleMode::SportBySport("cricket".into()))
            .unwrap();
        // 8 cricket-first plus 8 relay-first who also ranked cricket.
        assert_eq!(cricket.placed, 16);

        let repeat = state
            .run_raffle(&RaffleMode::SportBySport("cricket".into()))
            .unwrap();
        assert_eq!(repeat.placed, 0);
        assert_eq!(repeat.excluded, 16);

        // Relay players already in cricket may still be drawn for relay.
        let relay = state
            .run_raffle(&RaffleMode::SportBySport("relay".into()))
            .unwrap();
        assert_eq!(relay.placed, 8);
        assert_eq!(state.db.result_count().unwrap(), 24);
    }

    #[test]
    fn configured_seed_makes_runs_reproducible() {
        let mut a = seeded_state(3, Some(42));
        let mut b = seeded_state(3, Some(42));
        a.run_raffle(&RaffleMode::AllSports).unwrap();
        b.run_raffle(&RaffleMode::AllSports).unwrap();
        assert_eq!(a.results().unwrap().0, b.results().unwrap().0);
    }

    #[test]
    fn raffle_without_teams_fails() {
        let db = Database::open(":memory:").unwrap();
        let mut state = AppState::new(test_config(0, None), db);
        state.sync_teams().unwrap();
        let err = state.run_raffle(&RaffleMode::AllSports).unwrap_err();
        assert!(format!("{err:#}").contains("no teams"));
    }

    #[test]
    fn unknown_sport_fails_without_persisting() {
        let mut state = seeded_state(2, None);
        assert!(state
            .run_raffle(&RaffleMode::SportBySport("curling".into()))
            .is_err());
        assert_eq!(state.db.result_count().unwrap(), 0);
        assert!(state.last_raffle_id.is_none());
    }

    #[test]
    fn clear_results_allows_a_redraw() {
        let mut state = seeded_state(2, None);
        state
            .run_raffle(&RaffleMode::SportBySport("relay".into()))
            .unwrap();
        assert_eq!(state.clear_results(Some("relay")).unwrap(), 8);
        let again = state
            .run_raffle(&RaffleMode::SportBySport("relay".into()))
            .unwrap();
        assert_eq!(again.placed, 8);
    }

    #[test]
    fn recover_reports_stored_results() {
        let mut state = seeded_state(2, None);
        assert!(!recover_from_db(&mut state).unwrap());

        let summary = state.run_raffle(&RaffleMode::AllSports).unwrap();
        state.last_raffle_id = None;
        assert!(recover_from_db(&mut state).unwrap());
        assert_eq!(state.last_raffle_id, Some(summary.raffle_id));
    }

    // -----------------------------------------------------------------------
    // Tests: event loop
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn loop_runs_commands_in_order_and_stops_on_shutdown() {
        let state = seeded_state(2, Some(5));
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (ui_tx, mut ui_rx) = mpsc::channel(8);
        let handle = tokio::spawn(run(cmd_rx, ui_tx, state));

        cmd_tx
            .send(UserCommand::RunRaffle(RaffleMode::AllSports))
            .await
            .unwrap();
        cmd_tx.send(UserCommand::ShowResults).await.unwrap();
        cmd_tx.send(UserCommand::ClearResults(None)).await.unwrap();
        cmd_tx.send(UserCommand::Shutdown).await.unwrap();

        match ui_rx.recv().await.unwrap() {
            UiUpdate::RaffleCompleted(summary) => assert_eq!(summary.placed, 24),
            other => panic!("expected RaffleCompleted, got {other:?}"),
        }
        match ui_rx.recv().await.unwrap() {
            UiUpdate::Results { assignment, teams } => {
                assert_eq!(assignment.total_players(), 24);
                assert_eq!(teams.len(), 2);
            }
            other => panic!("expected Results, got {other:?}"),
        }
        match ui_rx.recv().await.unwrap() {
            UiUpdate::ResultsCleared { sport, removed } => {
                assert_eq!(sport, None);
                assert_eq!(removed, 24);
            }
            other => panic!("expected ResultsCleared, got {other:?}"),
        }

        handle.await.unwrap().unwrap();
        // The loop dropped its sender on exit.
        assert!(ui_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn failures_are_reported_and_loop_keeps_going() {
        let state = seeded_state(2, None);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (ui_tx, mut ui_rx) = mpsc::channel(8);
        let handle = tokio::spawn(run(cmd_rx, ui_tx, state));

        cmd_tx
            .send(UserCommand::ImportRegistrations(PathBuf::from(
                "/nonexistent/registrations.csv",
            )))
            .await
            .unwrap();
        cmd_tx
            .send(UserCommand::RunRaffle(RaffleMode::SportBySport("relay".into())))
            .await
            .unwrap();
        drop(cmd_tx);

        match ui_rx.recv().await.unwrap() {
            UiUpdate::Error(message) => assert!(message.contains("registrations.csv")),
            other => panic!("expected Error, got {other:?}"),
        }
        assert!(matches!(
            ui_rx.recv().await.unwrap(),
            UiUpdate::RaffleCompleted(_)
        ));
        handle.await.unwrap().unwrap();
    }
}
