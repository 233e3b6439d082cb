// Registration predicate, preference scoring and best-fit sport resolution.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{Employee, Sport, SportPreference, NO_INTEREST_SENTINELS};

/// Score given to a sport the employee is not registered for. Low enough that
/// no registered sport can lose to it.
pub const UNREGISTERED_SCORE: i32 = -1_000;

// ---------------------------------------------------------------------------
// Predicates and scoring
// ---------------------------------------------------------------------------

/// Whether the interest text says anything beyond the "not specified" sentinels.
pub fn has_stated_interest(interest: &str) -> bool {
    let normalized = interest.trim().to_lowercase();
    !NO_INTEREST_SENTINELS.contains(&normalized.as_str())
}

/// An employee is registered for a sport when they gave it a positive
/// priority or wrote a meaningful interest.
pub fn is_registered(priority: u8, interest: &str) -> bool {
    priority > 0 || has_stated_interest(interest)
}

/// Keyword bonus/penalty for a stated interest. Modifiers stack:
/// +2 for "high"/"very", +1 for "medium"/"moderate", -1 for "low"/"no".
/// Sentinel interests ("Not specified", "None", ...) contribute nothing.
pub fn interest_modifier(interest: &str) -> i32 {
    if !has_stated_interest(interest) {
        return 0;
    }
    let lower = interest.to_lowercase();
    let mut modifier = 0;
    if lower.contains("high") || lower.contains("very") {
        modifier += 2;
    }
    if lower.contains("medium") || lower.contains("moderate") {
        modifier += 1;
    }
    if lower.contains("low") || lower.contains("no") {
        modifier -= 1;
    }
    modifier
}

/// Desirability of a sport for an employee. A heuristic rank, not a probability.
pub fn score(priority: u8, interest: &str) -> i32 {
    let base = if is_registered(priority, interest) {
        i32::from(priority)
    } else {
        UNREGISTERED_SCORE
    };
    base + interest_modifier(interest)
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// An employee entering the draw for one sport, with the preference that got
/// them there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub employee: Employee,
    pub priority: u8,
    pub interest: String,
    pub score: i32,
}

impl Candidate {
    pub fn new(employee: &Employee, preference: &SportPreference) -> Self {
        Candidate {
            employee: employee.clone(),
            priority: preference.priority,
            interest: preference.interest.clone(),
            score: score(preference.priority, &preference.interest),
        }
    }
}

/// Candidates for a single sport in sport-by-sport mode: every employee
/// registered for it whose code has not already been raffled.
///
/// Returns the candidates and how many registered employees were excluded.
pub fn candidates_for_sport(
    employees: &[Employee],
    sport_id: &str,
    excluded_codes: &HashSet<String>,
) -> (Vec<Candidate>, usize) {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut candidates = Vec::new();
    let mut excluded = 0;

    for employee in employees {
        let Some(pref) = employee.preference(sport_id) else {
            continue;
        };
        if !is_registered(pref.priority, &pref.interest) {
            continue;
        }
        if excluded_codes.contains(&employee.employee_code) {
            excluded += 1;
            continue;
        }
        if !seen.insert(employee.employee_code.as_str()) {
            debug!("duplicate employee code {} ignored", employee.employee_code);
            continue;
        }
        candidates.push(Candidate::new(employee, pref));
    }

    (candidates, excluded)
}

// ---------------------------------------------------------------------------
// Best fit (all-sports mode)
// ---------------------------------------------------------------------------

/// How to settle sports that tie on both score and priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    /// The sport listed first in the catalogue wins.
    #[default]
    CatalogueOrder,
    /// A uniformly random pick among the tied sports, drawn per run.
    Random,
}

/// The sport an employee was matched to and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestFit {
    pub sport_id: String,
    pub priority: u8,
    pub score: i32,
}

/// Pick the best sport for one employee.
///
/// Highest score wins, then highest raw priority, then `tie_break`. Returns
/// `None` when the employee is not registered for any catalogue sport.
pub fn best_fit_sport<R: Rng + ?Sized>(
    employee: &Employee,
    sports: &[Sport],
    tie_break: TieBreak,
    rng: &mut R,
) -> Option<BestFit> {
    let mut tied: Vec<BestFit> = Vec::new();

    for sport in sports {
        let Some(pref) = employee.preference(&sport.id) else {
            continue;
        };
        if !is_registered(pref.priority, &pref.interest) {
            continue;
        }
        let fit = BestFit {
            sport_id: sport.id.clone(),
            priority: pref.priority,
            score: score(pref.priority, &pref.interest),
        };
        let ordering = match tied.first() {
            None => Ordering::Greater,
            Some(best) => (fit.score, fit.priority).cmp(&(best.score, best.priority)),
        };
        match ordering {
            Ordering::Greater => {
                tied.clear();
                tied.push(fit);
            }
            Ordering::Equal => tied.push(fit),
            Ordering::Less => {}
        }
    }

    match tie_break {
        TieBreak::CatalogueOrder => tied.into_iter().next(),
        TieBreak::Random => tied.choose(rng).cloned(),
    }
}

/// Result of resolving every employee to a single sport.
#[derive(Debug, Clone, Default)]
pub struct BestFitResolution {
    /// Sport id -> candidates, one entry per catalogue sport (possibly empty).
    pub pools: BTreeMap<String, Vec<Candidate>>,
    /// Employee code -> chosen sport.
    pub best_fit: BTreeMap<String, BestFit>,
    /// Codes of employees registered for no sport at all.
    pub unplaced: Vec<String>,
    /// Employees skipped because they were already raffled.
    pub excluded: usize,
}

/// Resolve every eligible employee to exactly one sport.
pub fn resolve_all_sports<R: Rng + ?Sized>(
    employees: &[Employee],
    sports: &[Sport],
    excluded_codes: &HashSet<String>,
    tie_break: TieBreak,
    rng: &mut R,
) -> BestFitResolution {
    let mut resolution = BestFitResolution {
        pools: sports.iter().map(|s| (s.id.clone(), Vec::new())).collect(),
        ..BestFitResolution::default()
    };

    for employee in employees {
        if excluded_codes.contains(&employee.employee_code) {
            resolution.excluded += 1;
            continue;
        }
        if resolution.best_fit.contains_key(&employee.employee_code) {
            debug!("duplicate employee code {} ignored", employee.employee_code);
            continue;
        }
        let Some(fit) = best_fit_sport(employee, sports, tie_break, rng) else {
            resolution.unplaced.push(employee.employee_code.clone());
            continue;
        };
        // `fit.sport_id` always comes from `sports`, so the pool exists.
        if let (Some(pool), Some(pref)) = (
            resolution.pools.get_mut(&fit.sport_id),
            employee.preference(&fit.sport_id),
        ) {
            pool.push(Candidate::new(employee, pref));
        }
        resolution
            .best_fit
            .insert(employee.employee_code.clone(), fit);
    }

    debug!(
        "best-fit resolution: {} matched, {} unplaced, {} excluded",
        resolution.best_fit.len(),
        resolution.unplaced.len(),
        resolution.excluded
    );
    resolution
}
