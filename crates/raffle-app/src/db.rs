// SQLite persistence layer for registrations, teams and raffle results.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use tracing::debug;

use raffle_core::model::{coerce_interest, coerce_priority, parse_priority};
use raffle_core::{Assignment, Employee, SportPreference, Team};

/// Which persisted results make an employee ineligible for a new draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionScope {
    /// Placed in any sport (all-sports runs).
    AnySport,
    /// Already placed in this sport (sport-by-sport runs).
    Sport(String),
}

/// SQLite-backed persistence for employees, their sport preferences, teams,
/// raffle results and key-value raffle state.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        // `priority` is declared without a type so legacy text values are
        // kept as written and coerced on read.
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS employees (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                employee_code  TEXT NOT NULL UNIQUE,
                name           TEXT NOT NULL,
                department     TEXT NOT NULL DEFAULT '',
                working_branch TEXT NOT NULL DEFAULT '',
                division       TEXT NOT NULL DEFAULT '',
                email          TEXT,
                phone          TEXT
            );

            CREATE TABLE IF NOT EXISTS sport_preferences (
                employee_id INTEGER NOT NULL REFERENCES employees(id) ON DELETE CASCADE,
                sport_id    TEXT NOT NULL,
                priority,
                interest    TEXT,
                PRIMARY KEY (employee_id, sport_id)
            );

            CREATE TABLE IF NOT EXISTS teams (
                id    INTEGER PRIMARY KEY AUTOINCREMENT,
                code  TEXT NOT NULL UNIQUE,
                name  TEXT NOT NULL,
                color TEXT NOT NULL DEFAULT '',
                lead  TEXT
            );

            CREATE TABLE IF NOT EXISTS raffle_results (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                raffle_id     TEXT NOT NULL,
                sport_id      TEXT NOT NULL,
                team_id       INTEGER NOT NULL REFERENCES teams(id),
                employee_code TEXT NOT NULL,
                employee_name TEXT NOT NULL,
                position      INTEGER NOT NULL,
                created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                UNIQUE (sport_id, employee_code)
            );

            CREATE TABLE IF NOT EXISTS raffle_state (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_raffle_results_code ON raffle_results(employee_code);",
        )
        .context("failed to create raffle_results index")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Employees
    // ------------------------------------------------------------------

    /// Upsert a batch of employees in a single transaction. Returns the
    /// number of rows written.
    pub fn import_employees(&self, employees: &[Employee]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin import transaction")?;
        for employee in employees {
            write_employee(&tx, employee)?;
        }
        tx.commit().context("failed to commit import")?;
        Ok(employees.len())
    }

    /// All employees with their preferences, ordered by row id.
    pub fn list_employees(&self) -> Result<Vec<Employee>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, employee_code, name, department, working_branch, division, email, phone
                 FROM employees ORDER BY id",
            )
            .context("failed to prepare list_employees query")?;

        let mut employees = stmt
            .query_map([], |row| {
                Ok(Employee {
                    id: row.get(0)?,
                    employee_code: row.get(1)?,
                    name: row.get(2)?,
                    department: row.get(3)?,
                    working_branch: row.get(4)?,
                    division: row.get(5)?,
                    email: row.get(6)?,
                    phone: row.get(7)?,
                    sports_preferences: BTreeMap::new(),
                })
            })
            .context("failed to query employees")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map employee rows")?;

        let index: HashMap<i64, usize> = employees
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id, i))
            .collect();

        let mut stmt = conn
            .prepare("SELECT employee_id, sport_id, priority, interest FROM sport_preferences")
            .context("failed to prepare preferences query")?;
        let prefs = stmt
            .query_map([], |row| {
                let employee_id: i64 = row.get(0)?;
                let sport_id: String = row.get(1)?;
                let priority = read_priority(row.get_ref(2)?);
                let interest = read_interest(row.get_ref(3)?);
                Ok((employee_id, sport_id, SportPreference { priority, interest }))
            })
            .context("failed to query preferences")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map preference rows")?;

        for (employee_id, sport_id, pref) in prefs {
            if let Some(&i) = index.get(&employee_id) {
                employees[i].sports_preferences.insert(sport_id, pref);
            }
        }

        Ok(employees)
    }

    /// Number of registered employees.
    pub fn employee_count(&self) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM employees", [], |row| row.get(0))
            .context("failed to count employees")?;
        Ok(count as usize)
    }

    // ------------------------------------------------------------------
    // Teams
    // ------------------------------------------------------------------

    /// Insert a team or update the row with the same code. Returns the
    /// team's numeric id.
    pub fn upsert_team(&self, team: &Team) -> Result<i64> {
        let conn = self.conn();
        let id: i64 = conn
            .query_row(
                "INSERT INTO teams (code, name, color, lead)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(code) DO UPDATE SET
                    name  = excluded.name,
                    color = excluded.color,
                    lead  = excluded.lead
                 RETURNING id",
                params![team.id, team.name, team.color, team.lead],
                |row| row.get(0),
            )
            .context("failed to upsert team")?;
        Ok(id)
    }

    /// All teams ordered by numeric id.
    pub fn list_teams(&self) -> Result<Vec<Team>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id, code, name, color, lead FROM teams ORDER BY id")
            .context("failed to prepare list_teams query")?;
        let teams = stmt
            .query_map([], |row| {
                Ok(Team {
                    numeric_id: row.get(0)?,
                    id: row.get(1)?,
                    name: row.get(2)?,
                    color: row.get(3)?,
                    lead: row.get(4)?,
                })
            })
            .context("failed to query teams")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map team rows")?;
        Ok(teams)
    }

    // ------------------------------------------------------------------
    // Raffle results
    // ------------------------------------------------------------------

    /// Employee codes already present in persisted results for `scope`.
    pub fn list_raffled_employee_codes(&self, scope: &ExclusionScope) -> Result<HashSet<String>> {
        let conn = self.conn();
        let codes = match scope {
            ExclusionScope::AnySport => {
                let mut stmt = conn
                    .prepare("SELECT DISTINCT employee_code FROM raffle_results")
                    .context("failed to prepare raffled codes query")?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .context("failed to query raffled codes")?
                    .collect::<std::result::Result<HashSet<_>, _>>()
                    .context("failed to map raffled code rows")?;
                rows
            }
            ExclusionScope::Sport(sport_id) => {
                let mut stmt = conn
                    .prepare("SELECT employee_code FROM raffle_results WHERE sport_id = ?1")
                    .context("failed to prepare raffled codes query")?;
                let rows = stmt
                    .query_map(params![sport_id], |row| row.get::<_, String>(0))
                    .context("failed to query raffled codes")?
                    .collect::<std::result::Result<HashSet<_>, _>>()
                    .context("failed to map raffled code rows")?;
                rows
            }
        };
        Ok(codes)
    }

    /// Persist every roster of one raffle run, and record it as the last
    /// raffle, in a single transaction. Either the whole run is stored or
    /// nothing is.
    ///
    /// Uses INSERT OR IGNORE against the `(sport_id, employee_code)` unique
    /// key, so an employee already placed in a sport is left where they
    /// are. Returns the number of rows actually inserted.
    pub fn persist_raffle(
        &self,
        raffle_id: &str,
        teams: &[Team],
        assignment: &Assignment,
    ) -> Result<usize> {
        let team_ids: HashMap<&str, i64> = teams
            .iter()
            .map(|t| (t.id.as_str(), t.numeric_id))
            .collect();

        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin persist transaction")?;
        let mut inserted = 0;
        for (team_code, sports) in assignment.iter() {
            for (sport_id, roster) in sports {
                if roster.is_empty() {
                    continue;
                }
                let team_id = *team_ids
                    .get(team_code.as_str())
                    .ok_or_else(|| anyhow!("team '{team_code}' is not in the store"))?;
                for (position, employee) in roster.iter().enumerate() {
                    inserted += tx
                        .execute(
                            "INSERT OR IGNORE INTO raffle_results
                                (raffle_id, sport_id, team_id, employee_code, employee_name, position)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                            params![
                                raffle_id,
                                sport_id,
                                team_id,
                                employee.employee_code,
                                employee.name,
                                position as i64,
                            ],
                        )
                        .with_context(|| format!("failed to insert {sport_id} result"))?;
                }
            }
        }
        write_state(
            &tx,
            Self::LAST_RAFFLE_KEY,
            &serde_json::Value::String(raffle_id.to_string()),
        )?;
        tx.commit().context("failed to commit raffle results")?;
        debug!("persisted {} result rows for {}", inserted, raffle_id);
        Ok(inserted)
    }

    /// Rebuild the persisted results as an assignment, team by team in team
    /// order and players in placement order. Employee details come from the
    /// employees table when the code is still registered.
    pub fn load_results(&self) -> Result<Assignment> {
        let known: HashMap<String, Employee> = self
            .list_employees()?
            .into_iter()
            .map(|e| (e.employee_code.clone(), e))
            .collect();

        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT t.code, r.sport_id, r.employee_code, r.employee_name
                 FROM raffle_results r JOIN teams t ON t.id = r.team_id
                 ORDER BY t.id, r.sport_id, r.raffle_id, r.position",
            )
            .context("failed to prepare load_results query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .context("failed to query raffle results")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map raffle result rows")?;

        let mut assignment = Assignment::new();
        for (team_code, sport_id, code, name) in rows {
            let employee = known
                .get(&code)
                .cloned()
                .unwrap_or_else(|| Employee::new(0, code, name));
            assignment.push(&team_code, &sport_id, employee);
        }
        Ok(assignment)
    }

    pub fn result_count(&self) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM raffle_results", [], |row| row.get(0))
            .context("failed to count raffle results")?;
        Ok(count as usize)
    }

    /// Delete persisted results, for one sport or all of them. Returns the
    /// number of rows removed.
    pub fn clear_results(&self, sport_id: Option<&str>) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        let removed = match sport_id {
            Some(sport_id) => tx
                .execute("DELETE FROM raffle_results WHERE sport_id = ?1", params![sport_id])
                .context("failed to delete sport results")?,
            None => tx
                .execute("DELETE FROM raffle_results", [])
                .context("failed to delete raffle results")?,
        };
        tx.commit().context("failed to commit clear_results")?;
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Key-value state
    // ------------------------------------------------------------------

    /// Persist an arbitrary JSON value under `key`. Uses INSERT OR REPLACE so
    /// repeated saves overwrite the previous value.
    pub fn save_state(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.conn();
        write_state(&conn, key, value)
    }

    /// Load a previously saved JSON value by `key`. Returns `None` if the key
    /// does not exist.
    pub fn load_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT value FROM raffle_state WHERE key = ?1")
            .context("failed to prepare load_state query")?;

        let mut rows = stmt
            .query_map(params![key], |row| row.get::<_, String>(0))
            .context("failed to query raffle state")?;

        match rows.next() {
            Some(row_result) => {
                let json_str = row_result.context("failed to read state row")?;
                let value: serde_json::Value = serde_json::from_str(&json_str)
                    .context("failed to deserialize state value")?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    const LAST_RAFFLE_KEY: &'static str = "last_raffle_id";
    const RUN_COUNTER_KEY: &'static str = "run_counter";

    pub fn last_raffle_id(&self) -> Result<Option<String>> {
        let value = self.load_state(Self::LAST_RAFFLE_KEY)?;
        Ok(value.and_then(|v| v.as_str().map(|s| s.to_string())))
    }

    /// Bump and return the persisted run counter (first call returns 1).
    pub fn next_run_number(&self) -> Result<u64> {
        let current = self
            .load_state(Self::RUN_COUNTER_KEY)?
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let next = current + 1;
        self.save_state(Self::RUN_COUNTER_KEY, &serde_json::Value::from(next))?;
        Ok(next)
    }

    /// Generate a new raffle ID based on the current UTC timestamp.
    ///
    /// Format: `raffle_YYYYMMDD_HHMMSS_SSS`.
    pub fn generate_raffle_id() -> String {
        let now = chrono::Utc::now();
        now.format("raffle_%Y%m%d_%H%M%S_%3f").to_string()
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn write_state(conn: &Connection, key: &str, value: &serde_json::Value) -> Result<()> {
    let json_str = serde_json::to_string(value).context("failed to serialize state value")?;
    conn.execute(
        "INSERT OR REPLACE INTO raffle_state (key, value) VALUES (?1, ?2)",
        params![key, json_str],
    )
    .context("failed to save state")?;
    Ok(())
}

fn write_employee(conn: &Connection, employee: &Employee) -> Result<i64> {
    let id: i64 = conn
        .query_row(
            "INSERT INTO employees
                (employee_code, name, department, working_branch, division, email, phone)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(employee_code) DO UPDATE SET
                name           = excluded.name,
                department     = excluded.department,
                working_branch = excluded.working_branch,
                division       = excluded.division,
                email          = excluded.email,
                phone          = excluded.phone
             RETURNING id",
            params![
                employee.employee_code,
                employee.name,
                employee.department,
                employee.working_branch,
                employee.division,
                employee.email,
                employee.phone,
            ],
            |row| row.get(0),
        )
        .with_context(|| format!("failed to upsert employee {}", employee.employee_code))?;

    conn.execute(
        "DELETE FROM sport_preferences WHERE employee_id = ?1",
        params![id],
    )
    .context("failed to clear sport preferences")?;

    for (sport_id, pref) in &employee.sports_preferences {
        conn.execute(
            "INSERT INTO sport_preferences (employee_id, sport_id, priority, interest)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, sport_id, pref.priority, pref.interest],
        )
        .context("failed to insert sport preference")?;
    }
    Ok(id)
}

fn read_priority(value: ValueRef<'_>) -> u8 {
    match value {
        ValueRef::Integer(v) => coerce_priority(v),
        ValueRef::Real(v) if v.is_finite() && v.fract() == 0.0 => coerce_priority(v as i64),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes).map(parse_priority).unwrap_or(0),
        _ => 0,
    }
}

fn read_interest(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Text(bytes) => coerce_interest(std::str::from_utf8(bytes).ok()),
        _ => coerce_interest(None),
    }
}
