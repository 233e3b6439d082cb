// Raffle data model: employees and their sport preferences, the sport
// catalogue, teams, and the team -> sport -> roster assignment.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Lower-cased interest strings that mean "no stated interest".
pub const NO_INTEREST_SENTINELS: [&str; 4] = ["not specified", "none", "null", ""];

/// Interest text stored for a preference that carries none.
pub const DEFAULT_INTEREST: &str = "Not specified";

/// Highest priority an employee can give a sport.
pub const MAX_PRIORITY: u8 = 3;

// ---------------------------------------------------------------------------
// Sport preferences
// ---------------------------------------------------------------------------

/// An employee's registration for a single sport.
///
/// Deserialization is lenient: a missing, null, negative or non-numeric
/// priority becomes 0 and a missing or null interest becomes
/// [`DEFAULT_INTEREST`]. Registration data comes from a free-form form and is
/// never rejected for being malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SportPreference {
    #[serde(default, deserialize_with = "lenient_priority")]
    pub priority: u8,
    #[serde(default = "default_interest", deserialize_with = "lenient_interest")]
    pub interest: String,
}

impl SportPreference {
    pub fn new(priority: u8, interest: impl Into<String>) -> Self {
        SportPreference {
            priority: priority.min(MAX_PRIORITY),
            interest: interest.into(),
        }
    }

    /// Build a preference from raw text columns (CSV cells, legacy TEXT
    /// columns), coercing anything unusable to the defaults.
    pub fn from_raw(priority: Option<&str>, interest: Option<&str>) -> Self {
        SportPreference {
            priority: priority.map(parse_priority).unwrap_or(0),
            interest: coerce_interest(interest),
        }
    }
}

impl Default for SportPreference {
    fn default() -> Self {
        SportPreference {
            priority: 0,
            interest: DEFAULT_INTEREST.to_string(),
        }
    }
}

/// Clamp an integer priority into `0..=MAX_PRIORITY`.
pub fn coerce_priority(value: i64) -> u8 {
    if value <= 0 {
        0
    } else {
        value.min(i64::from(MAX_PRIORITY)) as u8
    }
}

/// Parse a textual priority. Accepts integers and integral floats ("2",
/// " 3 ", "1.0"); everything else is priority 0.
pub fn parse_priority(raw: &str) -> u8 {
    let trimmed = raw.trim();
    if let Ok(v) = trimmed.parse::<i64>() {
        return coerce_priority(v);
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 => coerce_priority(v as i64),
        _ => 0,
    }
}

/// Trim an interest value, substituting [`DEFAULT_INTEREST`] when absent or blank.
pub fn coerce_interest(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => DEFAULT_INTEREST.to_string(),
    }
}

fn default_interest() -> String {
    DEFAULT_INTEREST.to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPriority {
    Int(i64),
    Float(f64),
    Text(String),
    Other(IgnoredAny),
}

fn lenient_priority<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawPriority>::deserialize(deserializer)?;
    Ok(match raw {
        Some(RawPriority::Int(v)) => coerce_priority(v),
        Some(RawPriority::Float(v)) if v.is_finite() && v.fract() == 0.0 => {
            coerce_priority(v as i64)
        }
        Some(RawPriority::Text(s)) => parse_priority(&s),
        _ => 0,
    })
}

fn lenient_interest<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(coerce_interest(raw.as_deref()))
}

// ---------------------------------------------------------------------------
// Employees
// ---------------------------------------------------------------------------

/// A registered employee. Never mutated by the raffle engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: i64,
    /// Unique business key; used for already-raffled exclusion.
    pub employee_code: String,
    pub name: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub working_branch: String,
    #[serde(default)]
    pub division: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    /// Sport id -> preference. Sports the employee never answered are absent.
    #[serde(default)]
    pub sports_preferences: BTreeMap<String, SportPreference>,
}

impl Employee {
    pub fn new(id: i64, employee_code: impl Into<String>, name: impl Into<String>) -> Self {
        Employee {
            id,
            employee_code: employee_code.into(),
            name: name.into(),
            department: String::new(),
            working_branch: String::new(),
            division: String::new(),
            email: None,
            phone: None,
            sports_preferences: BTreeMap::new(),
        }
    }

    /// Builder-style helper for attaching a preference.
    pub fn with_preference(
        mut self,
        sport_id: impl Into<String>,
        priority: u8,
        interest: impl Into<String>,
    ) -> Self {
        self.sports_preferences
            .insert(sport_id.into(), SportPreference::new(priority, interest));
        self
    }

    pub fn preference(&self, sport_id: &str) -> Option<&SportPreference> {
        self.sports_preferences.get(sport_id)
    }
}

// ---------------------------------------------------------------------------
// Sports and teams
// ---------------------------------------------------------------------------

/// A catalogue entry. Catalogue order matters for best-fit tie-breaking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sport {
    pub id: String,
    pub name: String,
    pub required_players_per_team: usize,
}

impl Sport {
    pub fn new(id: &str, name: &str, required_players_per_team: usize) -> Self {
        Sport {
            id: id.to_string(),
            name: name.to_string(),
            required_players_per_team,
        }
    }

    /// The standard event catalogue, in display order.
    pub fn catalogue() -> Vec<Sport> {
        vec![
            Sport::new("cricket", "Cricket", 11),
            Sport::new("football", "Football", 11),
            Sport::new("badminton", "Badminton", 2),
            Sport::new("volleyball", "Volleyball", 6),
            Sport::new("tug-of-war", "Tug of War", 8),
            Sport::new("100m-race", "100m Race", 1),
            Sport::new("relay", "Relay", 4),
        ]
    }
}

/// A team taking part in the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Stable team code, used as the assignment map key.
    pub id: String,
    /// Persisted foreign key.
    pub numeric_id: i64,
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub lead: Option<String>,
}

impl Team {
    pub fn new(id: &str, numeric_id: i64, name: &str) -> Self {
        Team {
            id: id.to_string(),
            numeric_id,
            name: name.to_string(),
            color: String::new(),
            lead: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Raffle mode
// ---------------------------------------------------------------------------

/// How a raffle run chooses its candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "sport", rename_all = "kebab-case")]
pub enum RaffleMode {
    /// Every employee is placed in exactly one sport: their best fit.
    AllSports,
    /// Every employee registered for the given sport is a candidate.
    SportBySport(String),
}

impl RaffleMode {
    pub fn target_sport(&self) -> Option<&str> {
        match self {
            RaffleMode::AllSports => None,
            RaffleMode::SportBySport(id) => Some(id),
        }
    }
}

impl fmt::Display for RaffleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaffleMode::AllSports => write!(f, "all sports"),
            RaffleMode::SportBySport(id) => write!(f, "sport-by-sport ({id})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// A team that ended up with fewer players than its sport needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Shortfall {
    pub team_id: String,
    pub sport_id: String,
    pub required: usize,
    pub actual: usize,
}

/// Raffle output: team id -> sport id -> ordered roster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Assignment {
    teams: BTreeMap<String, BTreeMap<String, Vec<Employee>>>,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// An assignment with an empty roster for every team/sport pair, so that
    /// sports nobody was drawn for still show up as `[]`.
    pub fn with_slots<'a>(teams: &[Team], sport_ids: impl IntoIterator<Item = &'a str> + Clone) -> Self {
        let mut assignment = Assignment::new();
        for team in teams {
            let sports = assignment.teams.entry(team.id.clone()).or_default();
            for sport_id in sport_ids.clone() {
                sports.entry(sport_id.to_string()).or_default();
            }
        }
        assignment
    }

    /// Append players to a team's roster for a sport.
    pub fn extend_roster(&mut self, team_id: &str, sport_id: &str, players: Vec<Employee>) {
        self.teams
            .entry(team_id.to_string())
            .or_default()
            .entry(sport_id.to_string())
            .or_default()
            .extend(players);
    }

    pub fn push(&mut self, team_id: &str, sport_id: &str, employee: Employee) {
        self.extend_roster(team_id, sport_id, vec![employee]);
    }

    /// The roster of one team for one sport; empty when absent.
    pub fn roster(&self, team_id: &str, sport_id: &str) -> &[Employee] {
        self.teams
            .get(team_id)
            .and_then(|sports| sports.get(sport_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn team(&self, team_id: &str) -> Option<&BTreeMap<String, Vec<Employee>>> {
        self.teams.get(team_id)
    }

    pub fn team_ids(&self) -> impl Iterator<Item = &str> {
        self.teams.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeMap<String, Vec<Employee>>)> {
        self.teams.iter()
    }

    /// Every sport id present under any team, sorted.
    pub fn sport_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .teams
            .values()
            .flat_map(|sports| sports.keys().map(String::as_str))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Player count per team for one sport. Teams without the sport count 0.
    pub fn sport_counts(&self, sport_id: &str) -> BTreeMap<&str, usize> {
        self.teams
            .iter()
            .map(|(team_id, sports)| {
                let count = sports.get(sport_id).map(Vec::len).unwrap_or(0);
                (team_id.as_str(), count)
            })
            .collect()
    }

    pub fn total_players(&self) -> usize {
        self.teams
            .values()
            .flat_map(|sports| sports.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_players() == 0
    }

    /// All placed employee codes, one entry per placement.
    pub fn employee_codes(&self) -> Vec<&str> {
        self.teams
            .values()
            .flat_map(|sports| sports.values())
            .flat_map(|roster| roster.iter().map(|e| e.employee_code.as_str()))
            .collect()
    }

    /// Teams whose roster is smaller than the sport's required size. Only
    /// sports present in the assignment are checked.
    pub fn shortfalls(&self, sports: &[Sport]) -> Vec<Shortfall> {
        let mut out = Vec::new();
        for (team_id, team_sports) in &self.teams {
            for sport in sports {
                let Some(roster) = team_sports.get(&sport.id) else {
                    continue;
                };
                if roster.len() < sport.required_players_per_team {
                    out.push(Shortfall {
                        team_id: team_id.clone(),
                        sport_id: sport.id.clone(),
                        required: sport.required_players_per_team,
                        actual: roster.len(),
                    });
                }
            }
        }
        out
    }
}
