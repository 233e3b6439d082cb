// Balanced team distribution for a single sport.
//
// Candidates are grouped into interest buckets, each bucket is shuffled and
// dealt round-robin across the teams, and the rebalancing pass then evens out
// the totals and decides at random which teams keep the leftover players.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::eligibility::{has_stated_interest, Candidate};
use crate::error::RaffleError;
use crate::model::Team;
use crate::rebalance::rebalance;

/// Grouping key for round-robin placement.
///
/// Ordering is fixed (the no-interest bucket first, then stated interests
/// lexicographically) so bucket iteration does not depend on fetch order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InterestBucket {
    NoInterest,
    Stated(String),
}

impl InterestBucket {
    /// Normalize an interest string (trimmed, lower-cased) into its bucket.
    pub fn of(interest: &str) -> Self {
        if has_stated_interest(interest) {
            InterestBucket::Stated(interest.trim().to_lowercase())
        } else {
            InterestBucket::NoInterest
        }
    }
}

impl fmt::Display for InterestBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterestBucket::NoInterest => write!(f, "(no interest)"),
            InterestBucket::Stated(key) => write!(f, "{key}"),
        }
    }
}

/// Rosters for one sport, keyed by team id, plus how many corrective moves
/// the rebalancing pass needed.
#[derive(Debug, Clone, Default)]
pub struct Distribution {
    pub rosters: BTreeMap<String, Vec<Candidate>>,
    pub moves: usize,
}

impl Distribution {
    pub fn counts(&self) -> Vec<usize> {
        self.rosters.values().map(Vec::len).collect()
    }
}

/// Partition candidates by normalized interest, keeping input order inside
/// each bucket.
pub fn group_by_interest(candidates: Vec<Candidate>) -> BTreeMap<InterestBucket, Vec<Candidate>> {
    let mut buckets: BTreeMap<InterestBucket, Vec<Candidate>> = BTreeMap::new();
    for candidate in candidates {
        buckets
            .entry(InterestBucket::of(&candidate.interest))
            .or_default()
            .push(candidate);
    }
    buckets
}

/// Shuffle every bucket and deal member `i` to team `i mod team_count`.
///
/// Within a bucket each team receives `floor(n / teams)` or
/// `ceil(n / teams)` members; totals across buckets are not balanced here.
pub fn place_round_robin<R: Rng + ?Sized>(
    buckets: BTreeMap<InterestBucket, Vec<Candidate>>,
    team_count: usize,
    rng: &mut R,
) -> Vec<Vec<Candidate>> {
    let mut rosters: Vec<Vec<Candidate>> = (0..team_count).map(|_| Vec::new()).collect();
    if team_count == 0 {
        return rosters;
    }
    for (bucket, mut members) in buckets {
        members.shuffle(rng);
        debug!("dealing bucket '{}' ({} members)", bucket, members.len());
        for (i, member) in members.into_iter().enumerate() {
            rosters[i % team_count].push(member);
        }
    }
    rosters
}

/// Distribute one sport's candidates over `teams`.
///
/// Fails fast with [`RaffleError::NoTeams`] when `teams` is empty and with
/// [`RaffleError::DuplicateTeam`] when two teams share an id. An empty
/// candidate list yields an empty roster for every team.
pub fn distribute<R: Rng + ?Sized>(
    candidates: Vec<Candidate>,
    teams: &[Team],
    rng: &mut R,
) -> Result<Distribution, RaffleError> {
    if teams.is_empty() {
        return Err(RaffleError::NoTeams);
    }
    let mut seen = HashSet::new();
    if let Some(dup) = teams.iter().find(|t| !seen.insert(t.id.as_str())) {
        return Err(RaffleError::DuplicateTeam(dup.id.clone()));
    }

    let buckets = group_by_interest(candidates);
    let mut rosters = place_round_robin(buckets, teams.len(), rng);
    let moves = rebalance(&mut rosters, |c: &Candidate| InterestBucket::of(&c.interest), rng);

    let rosters = teams
        .iter()
        .zip(rosters)
        .map(|(team, roster)| (team.id.clone(), roster))
        .collect();

    Ok(Distribution { rosters, moves })
}
