// Configuration loading and parsing (raffle.toml).

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use raffle_core::eligibility::TieBreak;
use raffle_core::{RaffleOptions, Sport, Team};

/// File name of the configuration, under both `config/` and `defaults/`.
const CONFIG_FILE: &str = "raffle.toml";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub event: EventConfig,
    pub db_path: String,
    pub raffle: RaffleSettings,
    pub export_dir: String,
    /// Sport catalogue, in the order used for best-fit tie-breaking.
    pub sports: Vec<Sport>,
    /// Teams seeded into the store on start.
    pub teams: Vec<TeamSeed>,
}

impl Config {
    pub fn raffle_options(&self) -> RaffleOptions {
        RaffleOptions {
            tie_break: self.raffle.tie_break,
        }
    }
}

// ---------------------------------------------------------------------------
// raffle.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire raffle.toml file.
#[derive(Debug, Clone, Deserialize)]
struct RaffleFile {
    event: EventConfig,
    database: DatabaseSection,
    #[serde(default)]
    raffle: RaffleSettings,
    export: ExportSection,
    sports: Vec<Sport>,
    #[serde(default)]
    teams: Vec<TeamSeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventConfig {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ExportSection {
    dir: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RaffleSettings {
    #[serde(default)]
    pub tie_break: TieBreak,
    /// Fixed seed for reproducible draws. Each run uses `seed + run number`;
    /// when absent every run samples fresh entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

/// A `[[teams]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TeamSeed {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub lead: Option<String>,
}

impl TeamSeed {
    /// The seed as a team with a not-yet-assigned row id.
    pub fn to_team(&self) -> Team {
        Team {
            id: self.code.clone(),
            numeric_id: 0,
            name: self.name.clone(),
            color: self.color.clone(),
            lead: self.lead.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/raffle.toml` relative to
/// `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config()` which handles default initialization automatically.
pub(crate) fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    let file: RaffleFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    let config = Config {
        event: file.event,
        db_path: file.database.path,
        raffle: file.raffle,
        export_dir: file.export.dir,
        sports: file.sports,
        teams: file.teams,
    };

    validate(&config)?;

    Ok(config)
}

/// Seed `config/raffle.toml` from `defaults/raffle.toml` when it is missing.
///
/// Returns the path written, or `None` when a local config already exists
/// (local edits are never overwritten).
pub fn ensure_config_files(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join("config").join(CONFIG_FILE);
    if target.exists() {
        return Ok(None);
    }

    let source = base_dir.join("defaults").join(CONFIG_FILE);
    if !source.is_file() {
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "no config/{CONFIG_FILE} and no defaults/{CONFIG_FILE} in {}",
                base_dir.display()
            ),
        });
    }

    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("cannot create {}: {e}", dir.display()),
        })?;
    }
    std::fs::copy(&source, &target).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("cannot seed {} from defaults: {e}", target.display()),
    })?;
    info!("Seeded {} from defaults", target.display());
    Ok(Some(target))
}

/// Convenience wrapper: loads config relative to the current working directory.
/// Ensures default config files are copied before loading.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.event.name.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "event.name".into(),
            message: "must not be empty".into(),
        });
    }

    if config.db_path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "database.path".into(),
            message: "must not be empty".into(),
        });
    }

    if config.sports.is_empty() {
        return Err(ConfigError::ValidationError {
            field: "sports".into(),
            message: "at least one sport must be configured".into(),
        });
    }

    let mut sport_ids = HashSet::new();
    for sport in &config.sports {
        if sport.id.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                field: "sports.id".into(),
                message: "must not be empty".into(),
            });
        }
        if !sport_ids.insert(sport.id.as_str()) {
            return Err(ConfigError::ValidationError {
                field: "sports.id".into(),
                message: format!("duplicate sport id '{}'", sport.id),
            });
        }
        if sport.required_players_per_team == 0 {
            return Err(ConfigError::ValidationError {
                field: format!("sports.{}.required_players_per_team", sport.id),
                message: "must be > 0".into(),
            });
        }
    }

    let mut team_codes = HashSet::new();
    for team in &config.teams {
        if team.code.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                field: "teams.code".into(),
                message: "must not be empty".into(),
            });
        }
        if !team_codes.insert(team.code.as_str()) {
            return Err(ConfigError::ValidationError {
                field: "teams.code".into(),
                message: format!("duplicate team code '{}'", team.code),
            });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    /// Helper: returns the path to the raffle-app crate root
    /// (works whether `cargo test` runs from the crate root or repo root).
    fn project_root() -> PathBuf {
        let cwd = std::env::current_dir().unwrap();
        if cwd.join("defaults").exists() {
            cwd
        } else if cwd.join("crates/raffle-app/defaults").exists() {
            cwd.join("crates/raffle-app")
        } else {
            panic!("Cannot locate defaults/ directory from CWD {:?}", cwd);
        }
    }

    /// Helper: a scratch dir with `config/raffle.toml` holding `contents`.
    fn scratch_with(name: &str, contents: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config/raffle.toml"), contents).unwrap();
        tmp
    }

    fn default_text() -> String {
        fs::read_to_string(project_root().join("defaults/raffle.toml")).unwrap()
    }

    #[test]
    fn load_valid_config_from_defaults() {
        let tmp = scratch_with("raffle_config_test_defaults", &default_text());
        let config = load_config_from(&tmp).expect("should load valid config");

        assert_eq!(config.event.name, "Annual Sports Meet");
        assert_eq!(config.db_path, "raffle.db");
        assert_eq!(config.export_dir, "exports");
        assert_eq!(config.raffle.tie_break, TieBreak::CatalogueOrder);
        assert!(config.raffle.seed.is_none());

        let ids: Vec<&str> = config.sports.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["cricket", "football", "badminton", "volleyball", "tug-of-war", "100m-race", "relay"]
        );
        assert_eq!(config.sports, Sport::catalogue());
        assert_eq!(config.teams.len(), 4);
        assert_eq!(config.teams[0].code, "team_1");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_file_is_reported_with_path() {
        let tmp = std::env::temp_dir().join("raffle_config_test_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        match load_config_from(&tmp) {
            Err(ConfigError::FileNotFound { path }) => {
                assert!(path.ends_with("config/raffle.toml"));
            }
            other => panic!("expected FileNotFound, got {other:?}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let tmp = scratch_with("raffle_config_test_malformed", "[event\nname = ");
        assert!(matches!(
            load_config_from(&tmp),
            Err(ConfigError::ParseError { .. })
        ));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn random_tie_break_and_seed_are_read() {
        let text = default_text().replace(
            "tie_break = \"catalogue-order\"",
            "tie_break = \"random\"\nseed = 7",
        );
        let tmp = scratch_with("raffle_config_test_random", &text);
        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.raffle.tie_break, TieBreak::Random);
        assert_eq!(config.raffle.seed, Some(7));
        assert_eq!(config.raffle_options().tie_break, TieBreak::Random);
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_empty_event_name() {
        let text = default_text().replace("name = \"Annual Sports Meet\"", "name = \"  \"");
        let tmp = scratch_with("raffle_config_test_event_name", &text);
        match load_config_from(&tmp) {
            Err(ConfigError::ValidationError { field, .. }) => assert_eq!(field, "event.name"),
            other => panic!("expected ValidationError, got {other:?}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_duplicate_sport_ids() {
        let text = format!(
            "{}\n[[sports]]\nid = \"relay\"\nname = \"Relay again\"\nrequired_players_per_team = 4\n",
            default_text()
        );
        let tmp = scratch_with("raffle_config_test_dup_sport", &text);
        match load_config_from(&tmp) {
            Err(ConfigError::ValidationError { field, message }) => {
                assert_eq!(field, "sports.id");
                assert!(message.contains("relay"));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_required_players() {
        let text = "[event]\nname = \"Meet\"\n[database]\npath = \"r.db\"\n[export]\ndir = \"out\"\n\
                    [[sports]]\nid = \"relay\"\nname = \"Relay\"\nrequired_players_per_team = 0\n";
        let tmp = scratch_with("raffle_config_test_zero_required", text);
        match load_config_from(&tmp) {
            Err(ConfigError::ValidationError { field, .. }) => {
                assert_eq!(field, "sports.relay.required_players_per_team");
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_empty_sport_list() {
        let text = "sports = []\n[event]\nname = \"Meet\"\n[database]\npath = \"r.db\"\n[export]\ndir = \"out\"\n";
        let tmp = scratch_with("raffle_config_test_no_sports", text);
        match load_config_from(&tmp) {
            Err(ConfigError::ValidationError { field, .. }) => assert_eq!(field, "sports"),
            other => panic!("expected ValidationError, got {other:?}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_duplicate_team_codes() {
        let text = format!(
            "{}\n[[teams]]\ncode = \"team_1\"\nname = \"Copy\"\n",
            default_text()
        );
        let tmp = scratch_with("raffle_config_test_dup_team", &text);
        match load_config_from(&tmp) {
            Err(ConfigError::ValidationError { field, .. }) => assert_eq!(field, "teams.code"),
            other => panic!("expected ValidationError, got {other:?}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn team_seed_converts_to_team() {
        let seed = TeamSeed {
            code: "team_9".into(),
            name: "Nines".into(),
            color: "teal".into(),
            lead: Some("Priya".into()),
        };
        let team = seed.to_team();
        assert_eq!(team.id, "team_9");
        assert_eq!(team.numeric_id, 0);
        assert_eq!(team.lead.as_deref(), Some("Priya"));
    }

    // ------------------------------------------------------------------
    // ensure_config_files
    // ------------------------------------------------------------------

    #[test]
    fn ensure_seeds_missing_config_from_defaults() {
        let tmp = std::env::temp_dir().join("raffle_config_test_seed");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::write(tmp.join("defaults/raffle.toml"), default_text()).unwrap();

        let seeded = ensure_config_files(&tmp).unwrap();
        assert_eq!(seeded, Some(tmp.join("config/raffle.toml")));
        assert!(load_config_from(&tmp).is_ok());

        // A second call leaves the now-existing file alone.
        assert_eq!(ensure_config_files(&tmp).unwrap(), None);
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_keeps_local_edits() {
        let tmp = std::env::temp_dir().join("raffle_config_test_ensure");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("defaults/raffle.toml"), "from defaults").unwrap();
        fs::write(tmp.join("config/raffle.toml"), "local edit").unwrap();

        assert_eq!(ensure_config_files(&tmp).unwrap(), None);
        assert_eq!(
            fs::read_to_string(tmp.join("config/raffle.toml")).unwrap(),
            "local edit"
        );
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_without_defaults_or_config_fails() {
        let tmp = std::env::temp_dir().join("raffle_config_test_nothing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        assert!(matches!(
            ensure_config_files(&tmp),
            Err(ConfigError::DefaultsCopyError { .. })
        ));
        let _ = fs::remove_dir_all(&tmp);
    }
}
