//! Configuration loading and resolution
//!
//! Every setting is resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! Command-line and environment values arrive together as [`ConfigOverrides`]
//! (the CLI parser reads both); the TOML file is parsed into [`TomlConfig`].

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::{Error, Result};

/// Default config file, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "annot.toml";

/// Sessions without a request for this long are flushed and discarded
pub const DEFAULT_SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Compiled defaults
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub sentences_file: PathBuf,
    pub annotations_file: PathBuf,
    pub service_account_file: PathBuf,
    pub sheet_range: String,
    pub flush_threshold: Duration,
    pub session_idle_timeout: Duration,
    pub bind_addr: SocketAddr,
    pub log_level: String,
}

impl Default for CompiledDefaults {
    fn default() -> Self {
        Self {
            sentences_file: PathBuf::from("data/sentences.csv"),
            annotations_file: PathBuf::from("data/annotations.csv"),
            service_account_file: PathBuf::from("service_account.json"),
            sheet_range: "Sheet1".to_string(),
            flush_threshold: crate::remote_log::DEFAULT_FLUSH_THRESHOLD,
            session_idle_timeout: DEFAULT_SESSION_IDLE_TIMEOUT,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5780)),
            log_level: "info".to_string(),
        }
    }
}

/// Logging section of the TOML file
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

/// Remote spreadsheet section of the TOML file
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SheetsConfig {
    /// Spreadsheet id; alternatively give the full `spreadsheet_url`
    pub spreadsheet_id: Option<String>,
    pub spreadsheet_url: Option<String>,
    /// A1 range the rows are appended to, usually the worksheet name
    pub range: Option<String>,
    pub service_account_file: Option<PathBuf>,
    /// Pre-issued OAuth bearer token, used instead of the service account
    pub access_token: Option<String>,
}

/// Contents of the TOML config file; every key is optional
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TomlConfig {
    pub sentences_file: Option<PathBuf>,
    pub annotations_file: Option<PathBuf>,
    pub flush_threshold_secs: Option<u64>,
    pub session_idle_timeout_secs: Option<u64>,
    pub bind_addr: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub sheets: SheetsConfig,
}

/// Values given on the command line or in the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub sentences_file: Option<PathBuf>,
    pub annotations_file: Option<PathBuf>,
    pub flush_threshold_secs: Option<u64>,
    pub session_idle_timeout_secs: Option<u64>,
    pub bind_addr: Option<String>,
    pub log_level: Option<String>,
    pub spreadsheet: Option<String>,
    pub sheet_range: Option<String>,
    pub service_account_file: Option<PathBuf>,
    pub access_token: Option<String>,
}

/// How the service authenticates against the spreadsheet API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetsAuth {
    /// Exchange a service account key for access tokens
    ServiceAccount(PathBuf),
    /// Use a fixed bearer token
    Token(String),
}

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub sentences_file: PathBuf,
    pub annotations_file: PathBuf,
    pub flush_threshold: Duration,
    pub session_idle_timeout: Duration,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub spreadsheet_id: String,
    pub sheet_range: String,
    pub auth: SheetsAuth,
}

impl AppConfig {
    /// Merge overrides, TOML values and compiled defaults
    pub fn resolve(overrides: ConfigOverrides, toml: TomlConfig) -> Result<Self> {
        let defaults = CompiledDefaults::default();

        let bind_addr = match overrides.bind_addr.or(toml.bind_addr) {
            Some(addr) => addr
                .parse::<SocketAddr>()
                .map_err(|e| Error::Config(format!("Invalid bind address '{}': {}", addr, e)))?,
            None => defaults.bind_addr,
        };

        let spreadsheet = overrides
            .spreadsheet
            .or(toml.sheets.spreadsheet_id)
            .or(toml.sheets.spreadsheet_url)
            .ok_or_else(|| {
                Error::Config(
                    "Spreadsheet not configured. Set one of:\n\
                     1. Command line: --spreadsheet <id or url>\n\
                     2. Environment: ANNOT_SPREADSHEET=<id or url>\n\
                     3. TOML config: [sheets] spreadsheet_id = \"...\""
                        .to_string(),
                )
            })?;
        let spreadsheet_id = spreadsheet_id_from(&spreadsheet)?;

        let auth = match overrides.access_token.or(toml.sheets.access_token) {
            Some(token) if !token.trim().is_empty() => SheetsAuth::Token(token.trim().to_string()),
            _ => SheetsAuth::ServiceAccount(
                overrides
                    .service_account_file
                    .or(toml.sheets.service_account_file)
                    .unwrap_or(defaults.service_account_file),
            ),
        };

        Ok(Self {
            sentences_file: overrides
                .sentences_file
                .or(toml.sentences_file)
                .unwrap_or(defaults.sentences_file),
            annotations_file: overrides
                .annotations_file
                .or(toml.annotations_file)
                .unwrap_or(defaults.annotations_file),
            flush_threshold: overrides
                .flush_threshold_secs
                .or(toml.flush_threshold_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.flush_threshold),
            session_idle_timeout: overrides
                .session_idle_timeout_secs
                .or(toml.session_idle_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_idle_timeout),
            bind_addr,
            log_level: overrides
                .log_level
                .or(toml.logging.level)
                .unwrap_or(defaults.log_level),
            spreadsheet_id,
            sheet_range: overrides
                .sheet_range
                .or(toml.sheets.range)
                .unwrap_or(defaults.sheet_range),
            auth,
        })
    }
}

/// Load the TOML config file
///
/// A missing file is not an error: `Ok(None)` is returned and the caller
/// falls back to defaults. A file that exists but does not parse is
/// [`Error::Config`]. Logging is left to the caller.
pub fn load_toml_config(path: &Path) -> Result<Option<TomlConfig>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    Ok(Some(config))
}

/// Accept either a bare spreadsheet id or a full spreadsheet URL
///
/// URLs look like `https://docs.google.com/spreadsheets/d/<id>/edit?...`.
pub fn spreadsheet_id_from(value: &str) -> Result<String> {
    let value = value.trim();
    if !value.contains('/') {
        if value.is_empty() {
            return Err(Error::Config("Spreadsheet id is empty".to_string()));
        }
        return Ok(value.to_string());
    }

    value
        .split("/spreadsheets/d/")
        .nth(1)
        .and_then(|rest| rest.split(['/', '?', '#']).next())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::Config(format!("Cannot find spreadsheet id in '{}'", value)))
}
