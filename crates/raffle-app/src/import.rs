// Registration import from CSV.
//
// Fixed employee columns followed by one `<sport_id>_priority` /
// `<sport_id>_interest` pair per sport, e.g. `cricket_priority,cricket_interest`.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;

use raffle_core::{Employee, Sport, SportPreference};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("validation error: {0}")]
    Validation(String),
}

const PRIORITY_SUFFIX: &str = "_priority";
const INTEREST_SUFFIX: &str = "_interest";

// ---------------------------------------------------------------------------
// Row conversion
// ---------------------------------------------------------------------------

/// Non-empty cell value for `column`.
fn cell<'a>(row: &'a HashMap<String, String>, column: &str) -> Option<&'a str> {
    row.get(column).map(String::as_str).filter(|v| !v.is_empty())
}

/// The sport id a `<sport>_priority` or `<sport>_interest` header refers to.
fn sport_of_column(header: &str) -> Option<&str> {
    header
        .strip_suffix(PRIORITY_SUFFIX)
        .or_else(|| header.strip_suffix(INTEREST_SUFFIX))
        .filter(|s| !s.is_empty())
}

/// Build an employee from one row, or `None` when code or name is missing.
/// A sport with both cells empty is treated as unanswered.
fn employee_from_row(row: &HashMap<String, String>, sports: &[Sport]) -> Option<Employee> {
    let code = cell(row, "employee_code")?;
    let name = cell(row, "name")?;

    let mut employee = Employee::new(0, code, name);
    employee.department = cell(row, "department").unwrap_or_default().to_string();
    employee.working_branch = cell(row, "working_branch").unwrap_or_default().to_string();
    employee.division = cell(row, "division").unwrap_or_default().to_string();
    employee.email = cell(row, "email").map(str::to_string);
    employee.phone = cell(row, "phone").map(str::to_string);

    for sport in sports {
        let priority = cell(row, &format!("{}{PRIORITY_SUFFIX}", sport.id));
        let interest = cell(row, &format!("{}{INTEREST_SUFFIX}", sport.id));
        if priority.is_none() && interest.is_none() {
            continue;
        }
        employee
            .sports_preferences
            .insert(sport.id.clone(), SportPreference::from_raw(priority, interest));
    }
    Some(employee)
}

// ---------------------------------------------------------------------------
// Reader-based loader (private, enables testing without temp files)
// ---------------------------------------------------------------------------

fn load_registrations_from_reader<R: Read>(
    rdr: R,
    sports: &[Sport],
) -> Result<Vec<Employee>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(rdr);

    let known: HashSet<&str> = sports.iter().map(|s| s.id.as_str()).collect();
    let mut unknown: Vec<String> = Vec::new();
    for header in reader.headers()?.iter() {
        let header = header.to_lowercase();
        if let Some(sport) = sport_of_column(&header) {
            if !known.contains(sport) && !unknown.iter().any(|u| u == sport) {
                unknown.push(sport.to_string());
            }
        }
    }
    for sport in &unknown {
        warn!("ignoring columns for unknown sport '{}'", sport);
    }

    let mut employees: Vec<Employee> = Vec::new();
    let mut by_code: HashMap<String, usize> = HashMap::new();

    for (i, result) in reader.deserialize::<HashMap<String, String>>().enumerate() {
        // Header is line 1.
        let line = i + 2;
        let row: HashMap<String, String> = match result {
            Ok(raw) => raw.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect(),
            Err(e) => {
                warn!("skipping malformed registration row {}: {}", line, e);
                continue;
            }
        };

        let Some(employee) = employee_from_row(&row, sports) else {
            warn!("skipping registration row {}: missing employee_code or name", line);
            continue;
        };

        match by_code.get(&employee.employee_code) {
            Some(&idx) => {
                warn!(
                    "duplicate registration for '{}', using latest row",
                    employee.employee_code
                );
                employees[idx] = employee;
            }
            None => {
                by_code.insert(employee.employee_code.clone(), employees.len());
                employees.push(employee);
            }
        }
    }

    debug!("parsed {} registrations", employees.len());
    Ok(employees)
}

// ---------------------------------------------------------------------------
// Public path-based loader
// ---------------------------------------------------------------------------

/// Load registrations from a CSV file. Only columns for sports in `sports`
/// are read.
pub fn load_registrations(path: &Path, sports: &[Sport]) -> Result<Vec<Employee>, ImportError> {
    let file = std::fs::File::open(path).map_err(|e| ImportError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let employees = load_registrations_from_reader(file, sports).map_err(|e| ImportError::Csv {
        path: path.display().to_string(),
        source: e,
    })?;

    if employees.is_empty() {
        return Err(ImportError::Validation(format!(
            "{} produced zero valid registrations",
            path.display()
        )));
    }
    Ok(employees)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
