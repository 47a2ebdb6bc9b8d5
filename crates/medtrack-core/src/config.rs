// Configuration loading and parsing (config/medtrack.toml).

use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveTime};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::model::parse_time;

/// Shipped defaults, written to `config/medtrack.toml` when it is missing.
pub const DEFAULT_CONFIG: &str = include_str!("../defaults/medtrack.toml");

const CONFIG_FILE_NAME: &str = "medtrack.toml";

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

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub adherence: AdherenceConfig,
    pub schedule: ScheduleConfig,
    pub reminders: ReminderConfig,
    pub db_path: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AdherenceConfig {
    pub on_time_tolerance_minutes: u32,
    pub missed_grace_minutes: u32,
    pub match_window_minutes: u32,
}

impl AdherenceConfig {
    pub fn tolerance(&self) -> Duration {
        Duration::minutes(i64::from(self.on_time_tolerance_minutes))
    }

    pub fn grace(&self) -> Duration {
        Duration::minutes(i64::from(self.missed_grace_minutes))
    }

    pub fn match_window(&self) -> Duration {
        Duration::minutes(i64::from(self.match_window_minutes))
    }
}

/// Waking-day bounds used to derive default dose times.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleConfig {
    pub day_start: NaiveTime,
    pub day_end: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReminderConfig {
    pub lead_minutes: u32,
    pub poll_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            adherence: AdherenceConfig {
                on_time_tolerance_minutes: 30,
                missed_grace_minutes: 120,
                match_window_minutes: 180,
            },
            schedule: ScheduleConfig {
                day_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default(),
                day_end: NaiveTime::from_hms_opt(20, 0, 0).unwrap_or_default(),
            },
            reminders: ReminderConfig {
                lead_minutes: 15,
                poll_interval_secs: 60,
            },
            db_path: "medtrack.db".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw file structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire medtrack.toml file.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    adherence: AdherenceConfig,
    schedule: ScheduleSection,
    reminders: ReminderConfig,
    database: DatabaseSection,
}

#[derive(Debug, Clone, Deserialize)]
struct ScheduleSection {
    day_start: String,
    day_end: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    #[serde(default)]
    path: String,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Parse and validate configuration text. `path` is only used in errors.
pub fn parse_config(text: &str, path: &Path) -> Result<Config, ConfigError> {
    let file: ConfigFile = toml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let schedule = ScheduleConfig {
        day_start: parse_clock("schedule.day_start", &file.schedule.day_start)?,
        day_end: parse_clock("schedule.day_end", &file.schedule.day_end)?,
    };

    let config = Config {
        adherence: file.adherence,
        schedule,
        reminders: file.reminders,
        db_path: file.database.path,
    };

    validate(&config)?;

    Ok(config)
}

/// Load and validate `config/medtrack.toml` relative to `base_dir`.
///
/// Does not create missing files; prefer `load_config` for that.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE_NAME);
    load_config_file(&path)
}

/// Load and validate a config file at an explicit path.
pub fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    let text = read_file(path)?;
    parse_config(&text, path)
}

/// Write the shipped defaults to `config/medtrack.toml` under `base_dir` if
/// the file does not exist yet. Returns the files that were created.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let config_dir = base_dir.join("config");
    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let target = config_dir.join(CONFIG_FILE_NAME);
    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
    {
        Ok(mut dest) => {
            std::io::Write::write_all(&mut dest, DEFAULT_CONFIG.as_bytes()).map_err(|e| {
                ConfigError::DefaultsCopyError {
                    message: format!("failed to write {}: {e}", target.display()),
                }
            })?;
            info!("wrote default configuration to {}", target.display());
            Ok(vec![target])
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(vec![]),
        Err(e) => Err(ConfigError::DefaultsCopyError {
            message: format!("failed to create {}: {e}", target.display()),
        }),
    }
}

/// Load the configuration under `base_dir`, writing the defaults first when
/// the file does not exist yet.
pub fn load_config(base_dir: &Path) -> Result<Config, ConfigError> {
    ensure_config_files(base_dir)?;
    load_config_from(base_dir)
}

/// Resolve the configured database path.
///
/// `:memory:` passes through. An empty path selects the platform data
/// directory; relative paths resolve against `base_dir`.
pub fn resolve_db_path(config: &Config, base_dir: &Path) -> Result<String, ConfigError> {
    let raw = config.db_path.trim();
    if raw == ":memory:" {
        return Ok(raw.to_string());
    }
    let path = if raw.is_empty() {
        let dirs = directories::ProjectDirs::from("org", "medtrack", "medtrack").ok_or_else(|| {
            ConfigError::ValidationError {
                field: "database.path".into(),
                message: "no home directory available; set an explicit path".into(),
            }
        })?;
        std::fs::create_dir_all(dirs.data_dir()).map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to create data directory: {e}"),
        })?;
        dirs.data_dir().join("medtrack.db")
    } else if Path::new(raw).is_absolute() {
        PathBuf::from(raw)
    } else {
        base_dir.join(raw)
    };
    Ok(path.to_string_lossy().into_owned())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn parse_clock(field: &str, value: &str) -> Result<NaiveTime, ConfigError> {
    parse_time(value).map_err(|_| ConfigError::ValidationError {
        field: field.into(),
        message: format!("expected HH:MM, got `{value}`"),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let adherence = &config.adherence;

    if adherence.on_time_tolerance_minutes == 0 {
        return Err(ConfigError::ValidationError {
            field: "adherence.on_time_tolerance_minutes".into(),
            message: "must be greater than 0".into(),
        });
    }

    if adherence.missed_grace_minutes < adherence.on_time_tolerance_minutes {
        return Err(ConfigError::ValidationError {
            field: "adherence.missed_grace_minutes".into(),
            message: format!(
                "must be at least the on-time tolerance ({}), got {}",
                adherence.on_time_tolerance_minutes, adherence.missed_grace_minutes
            ),
        });
    }

    if adherence.match_window_minutes < adherence.on_time_tolerance_minutes {
        return Err(ConfigError::ValidationError {
            field: "adherence.match_window_minutes".into(),
            message: format!(
                "must be at least the on-time tolerance ({}), got {}",
                adherence.on_time_tolerance_minutes, adherence.match_window_minutes
            ),
        });
    }

    if config.schedule.day_end <= config.schedule.day_start {
        return Err(ConfigError::ValidationError {
            field: "schedule.day_end".into(),
            message: "must be later than schedule.day_start".into(),
        });
    }

    if config.reminders.poll_interval_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "reminders.poll_interval_secs".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.reminders.lead_minutes > 24 * 60 {
        return Err(ConfigError::ValidationError {
            field: "reminders.lead_minutes".into(),
            message: format!("must be at most one day, got {}", config.reminders.lead_minutes),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
