use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;

const CONFIG_PATH_ENV: &str = "BUILDWARDEN_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = ".buildwarden.yml";

/// Resolved application configuration.
///
/// Values come from a YAML config file overridden by environment variables;
/// the environment always wins. Required keys missing from both sources fail
/// with [`ConfigError::Missing`].
#[derive(Debug, Clone)]
pub struct Config {
    // Drone server
    pub drone_server_url: String,
    pub drone_access_token: String,
    pub drone_owner: String,
    pub drone_repo: String,

    // Drone API paging
    pub max_pages: u32,
    pub max_builds: usize,
    pub initial_page: u32,
    pub http_timeout_secs: u64,

    // Queue transport
    pub queue_rep_address: String,
    pub queue_pull_address: String,
    pub queue_push_address: String,
    pub queue_monitor_address: String,
    pub queue_control_address: String,
    pub max_workers_per_process: usize,
    pub poll_timeout_ms: u64,
    pub postmortem_sleep_secs: u64,

    // Database
    pub database_url: String,

    // Search index
    pub search_host: String,
    pub search_port: u16,
    pub search_pool_size: usize,
    pub search_logs_index: String,

    // Redis (ancillary session storage, not used by the pipeline itself)
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_db: u32,

    // Notifications
    pub slack_webhook_url: String,

    // Logging
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// YAML file sections. Every field is optional; the environment fills gaps.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    drone: DroneSection,
    workers: WorkersSection,
    database: DatabaseSection,
    elasticsearch: SearchSection,
    redis: RedisSection,
    slack: SlackSection,
    logging: LoggingSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct DroneSection {
    server: Option<String>,
    access_token: Option<String>,
    owner: Option<String>,
    repo: Option<String>,
    api: DroneApiSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct DroneApiSection {
    max_pages: Option<u32>,
    max_builds: Option<usize>,
    initial_page: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct WorkersSection {
    queue_address: Option<String>,
    pull_address: Option<String>,
    push_address: Option<String>,
    monitor_address: Option<String>,
    control_address: Option<String>,
    max_per_process: Option<usize>,
    poll_timeout_ms: Option<u64>,
    postmortem_sleep_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct DatabaseSection {
    url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SearchSection {
    hostname: Option<String>,
    port: Option<u16>,
    pool_size: Option<usize>,
    logs_index: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RedisSection {
    host: Option<String>,
    port: Option<u16>,
    db: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SlackSection {
    webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct LoggingSection {
    level: Option<String>,
}

impl Config {
    /// Load configuration from the default path (or `BUILDWARDEN_CONFIG_PATH`)
    /// plus the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        match explicit {
            Some(path) => Self::load_from(&path),
            None => {
                let path = default_path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    Self::resolve(FileConfig::default())
                }
            }
        }
    }

    /// Load configuration from an explicit file path plus the environment.
    /// The file must exist and parse when named explicitly.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: FileConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::resolve(file)
    }

    fn resolve(file: FileConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            drone_server_url: required(
                string_or(file.drone.server, "DRONE_SERVER_URL"),
                "drone.server",
                "DRONE_SERVER_URL",
            )?,
            drone_access_token: required(
                string_or(file.drone.access_token, "DRONE_ACCESS_TOKEN"),
                "drone.access_token",
                "DRONE_ACCESS_TOKEN",
            )?,
            drone_owner: required(
                string_or(file.drone.owner, "DRONE_GITHUB_OWNER"),
                "drone.owner",
                "DRONE_GITHUB_OWNER",
            )?,
            drone_repo: required(
                string_or(file.drone.repo, "DRONE_GITHUB_REPO"),
                "drone.repo",
                "DRONE_GITHUB_REPO",
            )?,
            max_pages: parsed_or(file.drone.api.max_pages, "DRONE_API_MAX_PAGES", 100_000)?,
            max_builds: parsed_or(file.drone.api.max_builds, "DRONE_API_MAX_BUILDS", 250_000)?,
            initial_page: parsed_or(file.drone.api.initial_page, "DRONE_API_INITIAL_PAGE", 0)?,
            http_timeout_secs: parsed_or(
                file.drone.api.timeout_secs,
                "DRONE_API_TIMEOUT_SECS",
                30,
            )?,
            queue_rep_address: string_or(file.workers.queue_address, "BUILDWARDEN_QUEUE_ADDRESS")
                .unwrap_or_else(|| "tcp://127.0.0.1:5555".to_string()),
            queue_pull_address: string_or(file.workers.pull_address, "BUILDWARDEN_PULL_ADDRESS")
                .unwrap_or_else(|| "tcp://127.0.0.1:7777".to_string()),
            queue_push_address: string_or(file.workers.push_address, "BUILDWARDEN_PUSH_ADDRESS")
                .unwrap_or_else(|| "tcp://127.0.0.1:6666".to_string()),
            queue_monitor_address: string_or(
                file.workers.monitor_address,
                "BUILDWARDEN_MONITOR_ADDRESS",
            )
            .unwrap_or_else(|| "tcp://127.0.0.1:5001".to_string()),
            queue_control_address: string_or(
                file.workers.control_address,
                "BUILDWARDEN_CONTROL_ADDRESS",
            )
            .unwrap_or_else(|| "tcp://127.0.0.1:5002".to_string()),
            max_workers_per_process: parsed_or(
                file.workers.max_per_process,
                "BUILDWARDEN_MAX_WORKERS_PER_PROCESS",
                default_worker_count(),
            )?,
            poll_timeout_ms: parsed_or(
                file.workers.poll_timeout_ms,
                "BUILDWARDEN_POLL_TIMEOUT_MS",
                100,
            )?,
            postmortem_sleep_secs: parsed_or(
                file.workers.postmortem_sleep_secs,
                "BUILDWARDEN_POSTMORTEM_SLEEP_SECS",
                10,
            )?,
            database_url: required(
                string_or(file.database.url, "BUILDWARDEN_DATABASE_URL"),
                "database.url",
                "BUILDWARDEN_DATABASE_URL",
            )?,
            search_host: string_or(
                file.elasticsearch.hostname,
                "BUILDWARDEN_ELASTICSEARCH_HOSTNAME",
            )
            .unwrap_or_else(|| "localhost".to_string()),
            search_port: parsed_or(
                file.elasticsearch.port,
                "BUILDWARDEN_ELASTICSEARCH_PORT",
                9200,
            )?,
            search_pool_size: parsed_or(
                file.elasticsearch.pool_size,
                "BUILDWARDEN_ELASTICSEARCH_POOL_SIZE",
                default_worker_count(),
            )?,
            search_logs_index: string_or(
                file.elasticsearch.logs_index,
                "BUILDWARDEN_ELASTICSEARCH_LOGS_INDEX",
            )
            .unwrap_or_else(|| "buildwarden_logs".to_string()),
            redis_host: string_or(file.redis.host, "REDIS_HOST")
                .unwrap_or_else(|| "localhost".to_string()),
            redis_port: parsed_or(file.redis.port, "REDIS_PORT", 6379)?,
            redis_db: parsed_or(file.redis.db, "REDIS_DB", 0)?,
            slack_webhook_url: string_or(file.slack.webhook_url, "SLACK_WEBHOOK_URL")
                .unwrap_or_default(),
            log_level: string_or(file.logging.level, "BUILDWARDEN_LOG_LEVEL")
                .unwrap_or_else(|| "info".to_string()),
        })
    }

    pub fn repo_slug(&self) -> String {
        format!("{}/{}", self.drone_owner, self.drone_repo)
    }

    /// Log the presence of each sensitive value without exposing it.
    pub fn log_redacted(&self) {
        let vars = [
            ("DRONE_SERVER_URL", &self.drone_server_url),
            ("DRONE_ACCESS_TOKEN", &self.drone_access_token),
            ("BUILDWARDEN_DATABASE_URL", &self.database_url),
            ("SLACK_WEBHOOK_URL", &self.slack_webhook_url),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
    }
}

fn default_path() -> PathBuf {
    match env::var("HOME") {
        Ok(home) => Path::new(&home).join(DEFAULT_CONFIG_PATH),
        Err(_) => PathBuf::from(DEFAULT_CONFIG_PATH),
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

/// Environment value if set and non-empty, otherwise the file value.
fn string_or(file_value: Option<String>, env_var: &str) -> Option<String> {
    env::var(env_var)
        .ok()
        .filter(|v| !v.is_empty())
        .or(file_value)
}

fn required(value: Option<String>, key: &str, env_var: &str) -> Result<String, ConfigError> {
    value.ok_or_else(|| ConfigError::Missing {
        key: key.to_string(),
        env: env_var.to_string(),
    })
}

/// Numeric resolution: env wins over file, falling back to a default.
fn parsed_or<T>(file_value: Option<T>, env_var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
{
    match env::var(env_var).ok().filter(|v| !v.is_empty()) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            key: env_var.to_string(),
            value: raw,
        }),
        None => Ok(file_value.unwrap_or(default)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_file() -> FileConfig {
        serde_yaml::from_str(
            r#"
drone:
  server: https://drone.example.com
  access_token: file-token
  owner: acme
  repo: widgets
database:
  url: postgres://localhost/buildwarden
"#,
        )
        .unwrap()
    }

    #[test]
    fn file_values_resolve() {
        let config = Config::resolve(minimal_file()).unwrap();
        assert_eq!(config.drone_server_url, "https://drone.example.com");
        assert_eq!(config.repo_slug(), "acme/widgets");
        assert_eq!(config.max_pages, 100_000);
        assert_eq!(config.queue_rep_address, "tcp://127.0.0.1:5555");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn missing_required_key_fails() {
        let file: FileConfig = serde_yaml::from_str("drone:\n  owner: acme\n").unwrap();
        let err = Config::resolve(file).unwrap_err();
        match err {
            ConfigError::Missing { key, .. } => assert_eq!(key, "drone.server"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_yaml_keys_are_ignored() {
        let file: FileConfig =
            serde_yaml::from_str("drone:\n  server: x\nfuture_section:\n  a: 1\n").unwrap();
        assert_eq!(file.drone.server.as_deref(), Some("x"));
    }
}
