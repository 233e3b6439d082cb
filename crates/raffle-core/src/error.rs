// Error taxonomy for the raffle engine.
//
// Only configuration problems are errors. An empty candidate pool is a valid
// (empty) result and malformed preference data is coerced, never reported.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RaffleError {
    #[error("no teams are configured; players cannot be distributed")]
    NoTeams,

    #[error("the sport catalogue is empty")]
    EmptyCatalogue,

    #[error("team id `{0}` is listed more than once")]
    DuplicateTeam(String),

    #[error("unknown sport `{0}`")]
    UnknownSport(String),
}
