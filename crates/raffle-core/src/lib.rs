// Library root for the raffle engine: a pure, I/O-free allocation core that
// turns employee registrations into balanced team rosters.

pub mod distribute;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod model;
pub mod rebalance;

pub use engine::{run_raffle, RaffleOptions, RaffleOutcome};
pub use error::RaffleError;
pub use model::{Assignment, Employee, RaffleMode, Sport, SportPreference, Team};
