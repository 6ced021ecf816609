//! Configuration schema for codemend.
//!
//! Read from `codemend.yaml`. Every section is optional; a missing file means
//! all defaults.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::DEFAULT_MAX_CODE_LENGTH;
use crate::converge::LoopSettings;
use crate::detect::{Rule, RulePolicy, Severity};
use crate::oracle::RetryPolicy;

/// File names looked for in the working directory, in order.
pub const CONFIG_FILE_NAMES: &[&str] = &["codemend.yaml", ".codemend.yaml"];

/// Commented starting configuration written by `codemend init`.
pub const TEMPLATE: &str = include_str!("templates/codemend.yaml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default, rename = "loop")]
    pub fix_loop: LoopConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub python: PythonConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Glob patterns skipped when scanning a directory (e.g. "**/vendor/**")
    #[serde(default)]
    pub excluded_paths: Vec<String>,
}

impl Config {
    /// Parse a configuration file.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Find a configuration file: first in `dir`, then in the user config directory.
    pub fn discover(dir: &Path) -> Option<PathBuf> {
        let local = CONFIG_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.is_file());
        local.or_else(|| {
            directories::ProjectDirs::from("", "", "codemend")
                .map(|dirs| dirs.config_dir().join("codemend.yaml"))
                .filter(|p| p.is_file())
        })
    }

    /// Load `explicit` if given, else a discovered file, else defaults.
    ///
    /// The result is always validated.
    pub fn load(explicit: Option<&Path>, dir: &Path) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::discover(dir),
        };
        let config = match path {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading configuration");
                Self::parse_file(path)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fix_loop.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "loop.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.limits.max_code_length == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_code_length must be greater than 0".to_string(),
            ));
        }
        if self.limits.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_body_bytes must be greater than 0".to_string(),
            ));
        }
        if self.oracle.timeout_ms == 0 || self.python.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeouts must be greater than 0".to_string(),
            ));
        }
        if self.python.backend == PythonBackend::Interpreter && self.python.command.is_empty() {
            return Err(ConfigError::Invalid(
                "python.backend 'interpreter' requires python.command".to_string(),
            ));
        }
        for id in self.rules.disabled.iter().chain(self.rules.severity.keys()) {
            if Rule::parse(id).is_none() {
                return Err(ConfigError::Invalid(format!("unknown rule {:?}", id)));
            }
        }
        for pattern in &self.excluded_paths {
            globset::Glob::new(pattern).map_err(|e| {
                ConfigError::Invalid(format!("invalid excluded_paths pattern {:?}: {}", pattern, e))
            })?;
        }
        Ok(())
    }

    /// Rule policy described by the `rules` section.
    pub fn rule_policy(&self) -> RulePolicy {
        let mut policy = RulePolicy::new();
        for rule in self.rules.disabled.iter().filter_map(|id| Rule::parse(id)) {
            policy = policy.disable(rule);
        }
        for (id, severity) in &self.rules.severity {
            if let Some(rule) = Rule::parse(id) {
                policy = policy.with_severity(rule, *severity);
            }
        }
        policy
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            max_iterations: self.fix_loop.max_iterations,
            oracle_timeout: self
                .retry_policy()
                .budget(Duration::from_millis(self.oracle.timeout_ms)),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.oracle.max_retries,
            initial_backoff: Duration::from_millis(self.oracle.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.oracle.max_backoff_ms),
        }
    }

    /// Check if a path should be skipped when scanning.
    pub fn is_path_excluded(&self, path: &Path) -> bool {
        if self.excluded_paths.is_empty() {
            return false;
        }
        let mut builder = globset::GlobSetBuilder::new();
        for pattern in &self.excluded_paths {
            if let Ok(glob) = globset::Glob::new(pattern) {
                builder.add(glob);
            }
        }
        builder
            .build()
            .map(|set| set.is_match(path))
            .unwrap_or(false)
    }
}

/// Input size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Largest snippet accepted, in characters (default: 50000)
    #[serde(default = "default_max_code_length")]
    pub max_code_length: usize,
    /// Largest HTTP request body, in bytes (default: 1 MiB)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_max_code_length() -> usize {
    DEFAULT_MAX_CODE_LENGTH
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_code_length: default_max_code_length(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Fix loop bounds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoopConfig {
    /// Most oracle calls per session (default: 3)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_max_iterations() -> u32 {
    crate::converge::DEFAULT_MAX_ITERATIONS
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

/// Where and how to reach the fix oracle.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OracleConfig {
    /// Fix endpoint URL. Without it, sessions only report.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding a bearer token for the endpoint
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Per-request timeout in milliseconds (default: 30000). A fix may take
    /// this long for every attempt plus the backoff between retries.
    #[serde(default = "default_oracle_timeout")]
    pub timeout_ms: u64,
    /// Retries for timeouts, network errors, 429 and 5xx (default: 0)
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_oracle_timeout() -> u64 {
    30_000
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    8_000
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_env: None,
            timeout_ms: default_oracle_timeout(),
            max_retries: 0,
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl OracleConfig {
    /// Bearer token read from the configured environment variable, if set.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PythonBackend {
    /// In-process tree-sitter analysis.
    #[default]
    Native,
    /// An external program speaking the suggestions-over-stdout protocol.
    Interpreter,
}

/// Python analysis backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PythonConfig {
    #[serde(default)]
    pub backend: PythonBackend,
    /// argv of the external analyzer (e.g. ["python3", "analyzer.py"])
    #[serde(default)]
    pub command: Vec<String>,
    /// Timeout for one external analysis in milliseconds (default: 10000)
    #[serde(default = "default_python_timeout")]
    pub timeout_ms: u64,
}

fn default_python_timeout() -> u64 {
    10_000
}

impl Default for PythonConfig {
    fn default() -> Self {
        Self {
            backend: PythonBackend::Native,
            command: Vec::new(),
            timeout_ms: default_python_timeout(),
        }
    }
}

/// Rule selection and severity overrides, keyed by rule id.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RulesConfig {
    #[serde(default)]
    pub disabled: Vec<String>,
    #[serde(default)]
    pub severity: BTreeMap<String, Severity>,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Progress events buffered per slow subscriber (default: 256)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_event_buffer() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            event_buffer: default_event_buffer(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let yaml = r#"
limits:
  max_code_length: 1000
loop:
  max_iterations: 5
oracle:
  endpoint: "http://localhost:8080/fix"
  max_retries: 2
rules:
  disabled: [js-console-log]
  severity:
    py-print: info
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.limits.max_code_length, 1000);
        assert_eq!(config.limits.max_body_bytes, 1024 * 1024);
        assert_eq!(config.fix_loop.max_iterations, 5);
        assert_eq!(config.retry_policy().max_retries, 2);
        assert_eq!(config.oracle.timeout_ms, 30_000);

        let policy = config.rule_policy();
        assert!(!policy.is_enabled(Rule::JsConsoleLog));
        assert_eq!(policy.severity_for(Rule::PyPrint), Severity::Info);
    }

    #[test]
    fn test_loop_timeout_leaves_room_for_retries() {
        let yaml = "oracle:\n  timeout_ms: 300\n  max_retries: 2\n  initial_backoff_ms: 100\n  max_backoff_ms: 150\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.loop_settings().oracle_timeout,
            Duration::from_millis(300 * 3 + 100 + 150)
        );

        let single = Config::default();
        assert_eq!(
            single.loop_settings().oracle_timeout,
            Duration::from_millis(single.oracle.timeout_ms)
        );
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.loop_settings().max_iterations, 3);
        assert_eq!(config.python.backend, PythonBackend::Native);
    }

    #[test]
    fn test_template_parses_and_validates() {
        let config: Config = serde_yaml::from_str(TEMPLATE).unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_iterations() {
        let config: Config = serde_yaml::from_str("loop:\n  max_iterations: 0\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_rule() {
        let config: Config = serde_yaml::from_str("rules:\n  disabled: [no-such-rule]\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("no-such-rule"));
    }

    #[test]
    fn test_validate_requires_interpreter_command() {
        let config: Config = serde_yaml::from_str("python:\n  backend: interpreter\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_discover_prefers_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".codemend.yaml");
        std::fs::write(&path, "loop:\n  max_iterations: 7\n").unwrap();

        assert_eq!(Config::discover(dir.path()), Some(path));
        let config = Config::load(None, dir.path()).unwrap();
        assert_eq!(config.fix_loop.max_iterations, 7);
    }

    #[test]
    fn test_load_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codemend.yaml");
        std::fs::write(&path, "loop: [not, a, map]\n").unwrap();
        let err = Config::load(Some(&path), dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("codemend.yaml"));
    }

    #[test]
    fn test_excluded_paths() {
        let config: Config =
            serde_yaml::from_str("excluded_paths: [\"**/node_modules/**\"]\n").unwrap();
        assert!(config.is_path_excluded(Path::new("web/node_modules/left-pad/index.js")));
        assert!(!config.is_path_excluded(Path::new("web/src/index.js")));
    }
}
