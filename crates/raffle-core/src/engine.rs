// Raffle orchestration: eligibility, best-fit resolution and distribution for
// one invocation, as a pure function of its inputs and random source.

use std::collections::{BTreeMap, HashSet};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::distribute::distribute;
use crate::eligibility::{candidates_for_sport, resolve_all_sports, BestFit, Candidate, TieBreak};
use crate::error::RaffleError;
use crate::model::{Assignment, Employee, RaffleMode, Sport, Team};

/// Tunables for a raffle run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaffleOptions {
    pub tie_break: TieBreak,
}

/// Everything one raffle invocation produced.
#[derive(Debug, Clone, Serialize)]
pub struct RaffleOutcome {
    pub mode: RaffleMode,
    pub assignment: Assignment,
    /// Employee code -> chosen sport. Only filled in all-sports mode.
    pub best_fit: BTreeMap<String, BestFit>,
    /// Codes of employees registered for no sport (all-sports mode).
    pub unplaced: Vec<String>,
    /// Registered employees skipped because they were already raffled.
    pub excluded: usize,
    /// Corrective moves made by the rebalancing pass, over all sports.
    pub moves: usize,
}

impl RaffleOutcome {
    pub fn placed(&self) -> usize {
        self.assignment.total_players()
    }
}

/// Run one raffle.
///
/// `excluded_codes` holds the employee codes already present in persisted
/// results for the relevant scope; they never enter the candidate pool.
/// Sports with no candidates produce empty rosters, not errors.
pub fn run_raffle<R: Rng + ?Sized>(
    employees: &[Employee],
    teams: &[Team],
    sports: &[Sport],
    mode: &RaffleMode,
    excluded_codes: &HashSet<String>,
    options: &RaffleOptions,
    rng: &mut R,
) -> Result<RaffleOutcome, RaffleError> {
    if teams.is_empty() {
        return Err(RaffleError::NoTeams);
    }
    if sports.is_empty() {
        return Err(RaffleError::EmptyCatalogue);
    }

    info!(
        "Raffle starting: mode={}, {} employees, {} teams, {} excluded codes",
        mode,
        employees.len(),
        teams.len(),
        excluded_codes.len()
    );

    let outcome = match mode {
        RaffleMode::AllSports => {
            let resolution =
                resolve_all_sports(employees, sports, excluded_codes, options.tie_break, rng);
            let mut assignment = Assignment::with_slots(teams, sports.iter().map(|s| s.id.as_str()));
            let mut moves = 0;
            for sport in sports {
                let pool = resolution.pools.get(&sport.id).cloned().unwrap_or_default();
                moves += place_sport(&mut assignment, &sport.id, pool, teams, rng)?;
            }
            RaffleOutcome {
                mode: mode.clone(),
                assignment,
                best_fit: resolution.best_fit,
                unplaced: resolution.unplaced,
                excluded: resolution.excluded,
                moves,
            }
        }
        RaffleMode::SportBySport(sport_id) => {
            let sport = sports
                .iter()
                .find(|s| &s.id == sport_id)
                .ok_or_else(|| RaffleError::UnknownSport(sport_id.clone()))?;
            let (pool, excluded) = candidates_for_sport(employees, &sport.id, excluded_codes);
            let mut assignment = Assignment::with_slots(teams, [sport.id.as_str()]);
            let moves = place_sport(&mut assignment, &sport.id, pool, teams, rng)?;
            RaffleOutcome {
                mode: mode.clone(),
                assignment,
                best_fit: BTreeMap::new(),
                unplaced: Vec::new(),
                excluded,
                moves,
            }
        }
    };

    info!(
        "Raffle finished: {} placed, {} unplaced, {} excluded, {} rebalancing moves",
        outcome.placed(),
        outcome.unplaced.len(),
        outcome.excluded,
        outcome.moves
    );
    Ok(outcome)
}

fn place_sport<R: Rng + ?Sized>(
    assignment: &mut Assignment,
    sport_id: &str,
    pool: Vec<Candidate>,
    teams: &[Team],
    rng: &mut R,
) -> Result<usize, RaffleError> {
    let pool_size = pool.len();
    let distribution = distribute(pool, teams, rng)?;
    debug!(
        "{}: {} candidates -> counts {:?}",
        sport_id,
        pool_size,
        distribution.counts()
    );
    for (team_id, roster) in distribution.rosters {
        let players = roster.into_iter().map(|c| c.employee).collect();
        assignment.extend_roster(&team_id, sport_id, players);
    }
    Ok(distribution.moves)
}
