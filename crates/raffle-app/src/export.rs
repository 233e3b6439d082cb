// Roster exports: spreadsheet CSV, plain-text report and JSON.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use raffle_core::{Assignment, Sport, Team};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
}

pub const ROSTER_CSV: &str = "roster.csv";
pub const ROSTER_REPORT: &str = "roster_report.txt";
pub const ASSIGNMENT_JSON: &str = "assignment.json";

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Player counts for one team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamSummary {
    pub team_id: String,
    pub team_name: String,
    /// Sport id -> players placed.
    pub counts: BTreeMap<String, usize>,
    pub total: usize,
}

/// Per-team counts, in the order of `teams`. Teams missing from the
/// assignment get zero counts for every sport.
pub fn team_summary(assignment: &Assignment, teams: &[Team], sports: &[Sport]) -> Vec<TeamSummary> {
    teams
        .iter()
        .map(|team| {
            let counts: BTreeMap<String, usize> = sports
                .iter()
                .map(|s| (s.id.clone(), assignment.roster(&team.id, &s.id).len()))
                .collect();
            let total = counts.values().sum();
            TeamSummary {
                team_id: team.id.clone(),
                team_name: team.name.clone(),
                counts,
                total,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct RosterRow<'a> {
    team_code: &'a str,
    team_name: &'a str,
    sport: &'a str,
    position: usize,
    employee_code: &'a str,
    name: &'a str,
    department: &'a str,
    working_branch: &'a str,
    division: &'a str,
}

fn write_roster_rows<W: std::io::Write>(
    writer: W,
    assignment: &Assignment,
    teams: &[Team],
    sports: &[Sport],
) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    let team_names: HashMap<&str, &str> =
        teams.iter().map(|t| (t.id.as_str(), t.name.as_str())).collect();

    for (team_code, team_sports) in assignment.iter() {
        let team_name = team_names.get(team_code.as_str()).copied().unwrap_or(team_code);
        for sport in ordered_sports(team_sports.keys(), sports) {
            for (i, employee) in assignment.roster(team_code, &sport).iter().enumerate() {
                wtr.serialize(RosterRow {
                    team_code,
                    team_name,
                    sport: &sport,
                    position: i + 1,
                    employee_code: &employee.employee_code,
                    name: &employee.name,
                    department: &employee.department,
                    working_branch: &employee.working_branch,
                    division: &employee.division,
                })?;
            }
        }
    }
    wtr.flush()?;
    Ok(())
}

/// One row per placed player.
pub fn write_roster_csv(
    path: &Path,
    assignment: &Assignment,
    teams: &[Team],
    sports: &[Sport],
) -> Result<(), ExportError> {
    let file = std::fs::File::create(path).map_err(|e| ExportError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    write_roster_rows(file, assignment, teams, sports).map_err(|e| ExportError::Csv {
        path: path.display().to_string(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// Text report
// ---------------------------------------------------------------------------

/// Sport ids present in an assignment, catalogue order first, then any
/// sports the catalogue doesn't know in key order.
fn ordered_sports<'a>(present: impl Iterator<Item = &'a String>, sports: &[Sport]) -> Vec<String> {
    let present: Vec<&String> = present.collect();
    let mut out: Vec<String> = sports
        .iter()
        .filter(|s| present.iter().any(|p| **p == s.id))
        .map(|s| s.id.clone())
        .collect();
    for p in present {
        if !out.contains(p) {
            out.push(p.clone());
        }
    }
    out
}

/// Render the roster report: every team, then every sport with its players.
/// Rosters below `required_players_per_team` are flagged.
pub fn render_roster_report(
    event_name: &str,
    assignment: &Assignment,
    teams: &[Team],
    sports: &[Sport],
) -> String {
    let sport_by_id: HashMap<&str, &Sport> = sports.iter().map(|s| (s.id.as_str(), s)).collect();
    let title = format!("{event_name}: team rosters");

    let mut out = String::new();
    let _ = writeln!(out, "{title}");
    let _ = writeln!(out, "{}", "=".repeat(title.chars().count()));

    if assignment.is_empty() {
        let _ = writeln!(out, "\nNo players have been drawn yet.");
        return out;
    }

    for (team_code, team_sports) in assignment.iter() {
        let team = teams.iter().find(|t| &t.id == team_code);
        let _ = writeln!(out);
        match team {
            Some(team) => {
                let _ = write!(out, "{} ({})", team.name, team.id);
                if !team.color.is_empty() {
                    let _ = write!(out, " [{}]", team.color);
                }
                if let Some(lead) = &team.lead {
                    let _ = write!(out, "  lead: {lead}");
                }
                let _ = writeln!(out);
            }
            None => {
                let _ = writeln!(out, "{team_code}");
            }
        }

        for sport_id in ordered_sports(team_sports.keys(), sports) {
            let roster = assignment.roster(team_code, &sport_id);
            match sport_by_id.get(sport_id.as_str()) {
                Some(sport) => {
                    let _ = write!(
                        out,
                        "  {} ({}/{})",
                        sport.name,
                        roster.len(),
                        sport.required_players_per_team
                    );
                    if roster.len() < sport.required_players_per_team {
                        let _ = write!(
                            out,
                            "  SHORT BY {}",
                            sport.required_players_per_team - roster.len()
                        );
                    }
                    let _ = writeln!(out);
                }
                None => {
                    let _ = writeln!(out, "  {} ({})", sport_id, roster.len());
                }
            }
            for (i, e) in roster.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "    {:>2}. {:<10} {:<24} {}",
                    i + 1,
                    e.employee_code,
                    e.name,
                    e.department
                );
            }
        }
    }

    let shortfalls = assignment.shortfalls(sports);
    let _ = writeln!(out);
    if shortfalls.is_empty() {
        let _ = writeln!(out, "Every roster meets its required size.");
    } else {
        let _ = writeln!(out, "{} rosters below required size.", shortfalls.len());
    }
    out
}

pub fn write_roster_report(
    path: &Path,
    event_name: &str,
    assignment: &Assignment,
    teams: &[Team],
    sports: &[Sport],
) -> Result<(), ExportError> {
    let report = render_roster_report(event_name, assignment, teams, sports);
    std::fs::write(path, report).map_err(|e| ExportError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

/// The assignment as `{team_id: {sport_id: [employee]}}`.
pub fn write_assignment_json(path: &Path, assignment: &Assignment) -> Result<(), ExportError> {
    let file = std::fs::File::create(path).map_err(|e| ExportError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), assignment).map_err(|e| {
        ExportError::Json {
            path: path.display().to_string(),
            source: e,
        }
    })
}

/// Write every export format into `dir`, creating it if needed. Returns the
/// written paths.
pub fn export_all(
    dir: &Path,
    event_name: &str,
    assignment: &Assignment,
    teams: &[Team],
    sports: &[Sport],
) -> Result<Vec<PathBuf>, ExportError> {
    std::fs::create_dir_all(dir).map_err(|e| ExportError::Io {
        path: dir.display().to_string(),
        source: e,
    })?;

    let csv_path = dir.join(ROSTER_CSV);
    write_roster_csv(&csv_path, assignment, teams, sports)?;
    let report_path = dir.join(ROSTER_REPORT);
    write_roster_report(&report_path, event_name, assignment, teams, sports)?;
    let json_path = dir.join(ASSIGNMENT_JSON);
    write_assignment_json(&json_path, assignment)?;

    info!(
        "Exported {} players to {}",
        assignment.total_players(),
        dir.display()
    );
    Ok(vec![csv_path, report_path, json_path])
}
