use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "/etc/wardend/wardend.toml";
const ENV_CONFIG_PATH: &str = "WARDEND_CONFIG";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    /// Load configuration from file. The path can be overridden
    /// with the `WARDEND_CONFIG` environment variable. If the file
    /// is missing or fails to parse, defaults are returned.
    pub fn load() -> Self {
        Self::load_from_env_or(DEFAULT_CONFIG_PATH)
    }

    fn load_from_env_or(default_path: &str) -> Self {
        let path = std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| default_path.to_string());
        let path = PathBuf::from(path);
        match fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
            Err(_) => Config::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    #[serde(default = "default_trace_pipe")]
    pub trace_pipe: String,
    #[serde(default = "default_kprobe_events")]
    pub kprobe_events: String,
    #[serde(default = "default_set_event")]
    pub set_event: String,
    #[serde(default = "default_tracing_dir")]
    pub tracing_dir: String,
    #[serde(default = "default_correlation_ttl_secs")]
    pub correlation_ttl_secs: u64,
    #[serde(default = "default_line_queue_cap")]
    pub line_queue_cap: usize,
    #[serde(default = "default_event_queue_cap")]
    pub event_queue_cap: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trace_pipe: default_trace_pipe(),
            kprobe_events: default_kprobe_events(),
            set_event: default_set_event(),
            tracing_dir: default_tracing_dir(),
            correlation_ttl_secs: default_correlation_ttl_secs(),
            line_queue_cap: default_line_queue_cap(),
            event_queue_cap: default_event_queue_cap(),
        }
    }
}

fn default_trace_pipe() -> String {
    "/sys/kernel/debug/tracing/trace_pipe".to_string()
}
fn default_kprobe_events() -> String {
    "/sys/kernel/debug/tracing/kprobe_events".to_string()
}
fn default_set_event() -> String {
    "/sys/kernel/debug/tracing/set_event".to_string()
}
fn default_tracing_dir() -> String {
    "/sys/kernel/debug/tracing".to_string()
}
fn default_correlation_ttl_secs() -> u64 {
    5
}
fn default_line_queue_cap() -> usize {
    100
}
fn default_event_queue_cap() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_events_file")]
    pub events_file: String,
    #[serde(default = "default_threats_file")]
    pub threats_file: String,
    #[serde(default)]
    pub stdout: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_event_mask")]
    pub event_mask: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            events_file: default_events_file(),
            threats_file: default_threats_file(),
            stdout: false,
            debug: false,
            event_mask: default_event_mask(),
        }
    }
}

fn default_events_file() -> String {
    "/var/wardend/events.log".to_string()
}
fn default_threats_file() -> String {
    "/var/wardend/threats.log".to_string()
}
fn default_event_mask() -> String {
    "a".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_files_dir")]
    pub files_dir: String,
    #[serde(default = "default_rules_dir")]
    pub rules_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            files_dir: default_files_dir(),
            rules_dir: default_rules_dir(),
        }
    }
}

fn default_db_path() -> String {
    "/var/wardend/wardend.db".to_string()
}
fn default_files_dir() -> String {
    "/var/wardend/files".to_string()
}
fn default_rules_dir() -> String {
    "/var/wardend/rules".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config_defaults() {
        let toml = r#"[runtime]
trace_pipe = "/sys/kernel/debug/tracing/trace_pipe"
correlation_ttl_secs = 5
[logging]
events_file = "/var/wardend/events.log"
threats_file = "/var/wardend/threats.log"
stdout = true
[store]
db_path = "/var/wardend/wardend.db"
"#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert_eq!(cfg.runtime.correlation_ttl_secs, 5);
        assert_eq!(cfg.logging.events_file, "/var/wardend/events.log");
        assert!(cfg.logging.stdout);
        assert_eq!(cfg.store.db_path, "/var/wardend/wardend.db");
    }

    #[test]
    fn defaults_on_missing_file() {
        let cfg = Config::load_from_env_or("/nonexistent/path/wardend.toml");
        assert_eq!(cfg.runtime.correlation_ttl_secs, 5);
        assert_eq!(cfg.store.rules_dir, "/var/wardend/rules");
    }
}
