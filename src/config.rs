use std::env;
use std::path::PathBuf;

use crate::error::ConfigError;

pub const DEFAULT_API_URL: &str = "https://www.searchapi.io/api/v1/search";

#[derive(Debug, Clone)]
pub struct Config {
    /// Checked lazily: a missing key only fails the fetch that needs it.
    pub api_key: Option<String>,
    pub api_url: String,
    pub gl: String,
    pub hl: String,
    pub database_path: PathBuf,
    pub environment: String,
    pub logfire_token: Option<String>,
    pub json_logs: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        let _ = dotenvy::dotenv();

        let database_path = match non_empty_var("JOBSWEEP_DB") {
            Some(path) => PathBuf::from(path),
            None => default_database_path(),
        };

        let json_logs = match non_empty_var("LOG_FORMAT").as_deref() {
            None | Some("text") | Some("pretty") => false,
            Some("json") => true,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    reason: format!("expected 'json' or 'text', got '{}'", other),
                });
            }
        };

        Ok(Self {
            api_key: non_empty_var("SEARCH_API_KEY"),
            api_url: non_empty_var("SEARCH_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            gl: non_empty_var("SEARCH_GL").unwrap_or_else(|| "us".to_string()),
            hl: non_empty_var("SEARCH_HL").unwrap_or_else(|| "en".to_string()),
            database_path,
            environment: non_empty_var("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            logfire_token: non_empty_var("LOGFIRE_TOKEN"),
            json_logs,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn default_database_path() -> PathBuf {
    // Use XDG data directory or fallback
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobsweep") {
        proj_dirs.data_dir().join("jobsweep.db")
    } else {
        PathBuf::from("jobsweep.db")
    }
}
