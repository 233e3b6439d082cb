// Messages between the front end (CLI) and the application loop.

use std::path::PathBuf;

use raffle_core::{Assignment, RaffleMode};

use crate::export::TeamSummary;

/// Commands sent from the front end to the application loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    RunRaffle(RaffleMode),
    ShowResults,
    Export,
    /// Delete persisted results for one sport, or all when `None`.
    ClearResults(Option<String>),
    ImportRegistrations(PathBuf),
    Shutdown,
}

/// What a completed raffle run reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaffleSummary {
    pub raffle_id: String,
    pub mode: RaffleMode,
    pub placed: usize,
    /// Rows written to the store; lower than `placed` only when another
    /// run already placed the same employee in the same sport.
    pub persisted: usize,
    pub unplaced: Vec<String>,
    pub excluded: usize,
    pub moves: usize,
    pub teams: Vec<TeamSummary>,
}

/// Updates pushed from the application loop to the front end.
#[derive(Debug, Clone)]
pub enum UiUpdate {
    RaffleCompleted(Box<RaffleSummary>),
    Results {
        assignment: Box<Assignment>,
        teams: Vec<TeamSummary>,
    },
    Exported(Vec<PathBuf>),
    ResultsCleared {
        sport: Option<String>,
        removed: usize,
    },
    Imported {
        count: usize,
    },
    Error(String),
}
