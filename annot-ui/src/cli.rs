//! Command-line arguments for annot-ui
//!
//! Every option can also be given through an `ANNOT_*` environment variable;
//! anything left unset falls through to the TOML file and compiled defaults.

use annot_common::config::{ConfigOverrides, DEFAULT_CONFIG_FILE};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "annot-ui")]
#[command(about = "Sentence sentiment annotation service")]
#[command(version)]
pub struct Args {
    /// TOML config file
    #[arg(short, long, env = "ANNOT_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Headerless CSV of (text, group id) rows
    #[arg(long, env = "ANNOT_SENTENCES")]
    pub sentences: Option<PathBuf>,

    /// Local annotation log (CSV, created with header if missing)
    #[arg(long, env = "ANNOT_ANNOTATIONS")]
    pub annotations: Option<PathBuf>,

    /// Seconds a remote write-back buffer may stay open before it is flushed
    #[arg(long, env = "ANNOT_FLUSH_THRESHOLD_SECS")]
    pub flush_threshold_secs: Option<u64>,

    /// Seconds without a request after which a session is flushed and discarded
    #[arg(long, env = "ANNOT_SESSION_IDLE_TIMEOUT_SECS")]
    pub session_idle_timeout_secs: Option<u64>,

    /// Address to listen on, e.g. 127.0.0.1:5780
    #[arg(short, long, env = "ANNOT_BIND")]
    pub bind: Option<String>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "ANNOT_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Spreadsheet id or full spreadsheet URL
    #[arg(long, env = "ANNOT_SPREADSHEET")]
    pub spreadsheet: Option<String>,

    /// Range rows are appended to (worksheet name)
    #[arg(long, env = "ANNOT_SHEET_RANGE")]
    pub sheet_range: Option<String>,

    /// Service account JSON key file
    #[arg(long, env = "ANNOT_SERVICE_ACCOUNT")]
    pub service_account: Option<PathBuf>,

    /// OAuth bearer token to use instead of the service account
    #[arg(long, env = "ANNOT_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,
}

impl Args {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            sentences_file: self.sentences.clone(),
            annotations_file: self.annotations.clone(),
            flush_threshold_secs: self.flush_threshold_secs,
            session_idle_timeout_secs: self.session_idle_timeout_secs,
            bind_addr: self.bind.clone(),
            log_level: self.log_level.clone(),
            spreadsheet: self.spreadsheet.clone(),
            sheet_range: self.sheet_range.clone(),
            service_account_file: self.service_account.clone(),
            access_token: self.access_token.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn test_cli_defaults() {
        env::remove_var("ANNOT_CONFIG");
        env::remove_var("ANNOT_FLUSH_THRESHOLD_SECS");

        let args = Args::try_parse_from(["annot-ui"]).unwrap();

        assert_eq!(args.config, PathBuf::from("annot.toml"));
        assert!(args.flush_threshold_secs.is_none());
    }

    #[test]
    #[serial]
    fn test_env_fills_unset_arguments() {
        env::set_var("ANNOT_FLUSH_THRESHOLD_SECS", "45");

        let args = Args::try_parse_from(["annot-ui", "--spreadsheet", "abc"]).unwrap();
        let overrides = args.overrides();

        env::remove_var("ANNOT_FLUSH_THRESHOLD_SECS");
        assert_eq!(overrides.flush_threshold_secs, Some(45));
        assert_eq!(overrides.spreadsheet.as_deref(), Some("abc"));
    }

    #[test]
    #[serial]
    fn test_cli_beats_env() {
        env::set_var("ANNOT_FLUSH_THRESHOLD_SECS", "45");

        let args =
            Args::try_parse_from(["annot-ui", "--flush-threshold-secs", "10"]).unwrap();

        env::remove_var("ANNOT_FLUSH_THRESHOLD_SECS");
        assert_eq!(args.flush_threshold_secs, Some(10));
    }
}
