//! Configuration for the orchestrator daemon.
//!
//! `key=value` format, one entry per line; `#` starts a comment. Precedence:
//! CLI flags > `--config` file > defaults.

use crate::policy::{DEFAULT_ALLOWED_COMMANDS, DEFAULT_DEPENDENCY_FILES};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

/// Daemon configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// Override for the runs root; defaults to the platform user-data dir.
    pub runs_root: Option<PathBuf>,

    /// Planner endpoint and model.
    pub planner_base_url: String,
    pub planner_model: String,

    /// Child-process supervision.
    pub run_timeout_sec: u32,
    pub kill_grace_sec: u32,

    /// Autobuild iteration cap.
    pub max_iterations: u32,

    /// Command-prefix allowlist for cmd steps.
    pub allowed_commands: Vec<String>,

    /// Basenames gated behind human approval when they show up in a diff.
    pub dependency_files: Vec<String>,

    /// Classify a no-diff executor result as a no-op when the preceding
    /// content-search cmd produced output.
    pub noop_precheck: bool,

    /// Port for the local control-plane server.
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runs_root: None,
            planner_base_url: "https://api.openai.com/v1".to_string(),
            planner_model: "gpt-4o-mini".to_string(),
            run_timeout_sec: 30,
            kill_grace_sec: 3,
            max_iterations: 2,
            allowed_commands: DEFAULT_ALLOWED_COMMANDS.iter().map(|s| (*s).to_string()).collect(),
            dependency_files: DEFAULT_DEPENDENCY_FILES.iter().map(|s| (*s).to_string()).collect(),
            noop_precheck: true,
            port: 7433,
        }
    }
}

impl Config {
    /// Load config from a file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_file(path)?;
        Ok(config)
    }

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    /// Resolve the runs root: the configured override or the per-user data
    /// directory.
    pub fn resolved_runs_root(&self) -> PathBuf {
        self.runs_root.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ai-dev-orchestrator")
                .join("data")
                .join("runs")
        })
    }

    fn parse_content(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };
            let key = key.trim();
            let value = Self::unquote(value.trim());

            match key {
                "runs_root" => self.runs_root = Some(PathBuf::from(value)),
                "planner_base_url" => self.planner_base_url = value.to_string(),
                "planner_model" => self.planner_model = value.to_string(),
                "run_timeout_sec" => self.run_timeout_sec = Self::parse_int(key, value)?,
                "kill_grace_sec" => self.kill_grace_sec = Self::parse_int(key, value)?,
                "max_iterations" => self.max_iterations = Self::parse_int(key, value)?,
                "allowed_commands" => self.allowed_commands = Self::parse_list(value),
                "dependency_files" => self.dependency_files = Self::parse_list(value),
                "noop_precheck" => self.noop_precheck = Self::parse_bool(key, value)?,
                "port" => {
                    self.port = Self::parse_int::<u32>(key, value)? as u16;
                }
                other => return Err(ConfigError::UnknownKey(other.to_string())),
            }
        }
        Ok(())
    }

    fn unquote(value: &str) -> &str {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            &value[1..value.len() - 1]
        } else {
            value
        }
    }

    fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
        match value {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidInt {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    fn parse_list(value: &str) -> Vec<String> {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_supervision_constants() {
        let config = Config::default();
        assert_eq!(config.run_timeout_sec, 30);
        assert_eq!(config.kill_grace_sec, 3);
        assert_eq!(config.max_iterations, 2);
        assert_eq!(config.allowed_commands, vec!["git"]);
        assert_eq!(config.dependency_files.len(), 4);
        assert!(config.noop_precheck);
    }

    #[test]
    fn parses_key_value_content() {
        let mut config = Config::default();
        config
            .parse_content(
                "# comment\n\nplanner_model=gpt-4o\nrun_timeout_sec=5\nnoop_precheck=false\n",
            )
            .unwrap();
        assert_eq!(config.planner_model, "gpt-4o");
        assert_eq!(config.run_timeout_sec, 5);
        assert!(!config.noop_precheck);
    }

    #[test]
    fn unquotes_values() {
        let mut config = Config::default();
        config
            .parse_content("runs_root=\"/tmp/runs dir\"\nplanner_model='m'\n")
            .unwrap();
        assert_eq!(config.runs_root, Some(PathBuf::from("/tmp/runs dir")));
        assert_eq!(config.planner_model, "m");
    }

    #[test]
    fn parses_comma_lists() {
        let mut config = Config::default();
        config
            .parse_content("allowed_commands=git, hg\ndependency_files=Cargo.toml,Cargo.lock\n")
            .unwrap();
        assert_eq!(config.allowed_commands, vec!["git", "hg"]);
        assert_eq!(config.dependency_files, vec!["Cargo.toml", "Cargo.lock"]);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        let mut config = Config::default();
        assert!(matches!(
            config.parse_content("no_such_key=1\n"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            config.parse_content("run_timeout_sec=abc\n"),
            Err(ConfigError::InvalidInt { .. })
        ));
        assert!(matches!(
            config.parse_content("noop_precheck=maybe\n"),
            Err(ConfigError::InvalidBool { .. })
        ));
        assert!(matches!(
            config.parse_content("just a line\n"),
            Err(ConfigError::InvalidLine(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_iterations=4").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.max_iterations, 4);
    }

    #[test]
    fn resolved_runs_root_honors_override() {
        let mut config = Config::default();
        config.runs_root = Some(PathBuf::from("/tmp/x"));
        assert_eq!(config.resolved_runs_root(), PathBuf::from("/tmp/x"));

        config.runs_root = None;
        let root = config.resolved_runs_root();
        assert!(root.ends_with("ai-dev-orchestrator/data/runs"));
    }
}
