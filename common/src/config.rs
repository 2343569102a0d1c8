use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use std::fs;

/// Expands a leading `~/` against `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_url")]
    pub url: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_server_url() -> String { "http://localhost:8000".to_string() }
fn default_connect_timeout() -> u64 { 5 }
fn default_request_timeout() -> u64 { 60 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
}

fn default_poll_interval() -> u64 { 10 }

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval_secs: default_poll_interval() }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

fn default_ledger_path() -> PathBuf { expand_home(crate::DEFAULT_LEDGER_PATH) }
fn default_cache_dir() -> PathBuf { expand_home(crate::DEFAULT_CACHE_DIR) }

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
            cache_dir: default_cache_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub server: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_from")]
    pub from: String,
}

fn default_from() -> String { "lunaflow@localhost".to_string() }

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: None,
            username: None,
            password: None,
            from: default_from(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_ssh")]
    pub ssh_program: String,
    #[serde(default = "default_scp")]
    pub scp_program: String,
    /// Where the daemon binary is installed on remote hosts, relative to the remote home.
    #[serde(default = "default_install_dir")]
    pub install_dir: String,
}

fn default_ssh() -> String { "ssh".to_string() }
fn default_scp() -> String { "scp".to_string() }
fn default_install_dir() -> String { ".lunaflow/bin".to_string() }

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            ssh_program: default_ssh(),
            scp_program: default_scp(),
            install_dir: default_install_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub output: Option<PathBuf>,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: None,
        }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }

    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| expand_home(crate::DEFAULT_DAEMON_LOG))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Detect file type by extension and load
    pub fn from_file(path: &Path) -> Result<Self> {
        let ext = path.extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match ext {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "toml" => Self::from_toml_file(path),
            _ => Err(anyhow::anyhow!("Unsupported config file format. Use .yaml, .yml, or .toml")),
        }
    }

    /// Reads `$LUNAFLOW_CONFIG` or the user config file if one exists,
    /// then applies environment overrides.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var_os("LUNAFLOW_CONFIG").map(PathBuf::from);
        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => {
                let path = expand_home(crate::USER_CONFIG_PATH);
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Environment wins over file values.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("LUNAFLOW_SERVER") {
            self.server.url = url;
        }
        if let Some(path) = var("LUNAFLOW_LEDGER") {
            self.ledger.path = expand_home(&path);
        }
        if let Some(server) = var("LUNAFLOW_SMTP_SERVER") {
            self.smtp.server = Some(server);
        }
        if let Some(user) = var("LUNAFLOW_SMTP_USERNAME") {
            self.smtp.username = Some(user);
        }
        if let Some(password) = var("LUNAFLOW_SMTP_PASSWORD") {
            self.smtp.password = Some(password);
        }
        if let Some(from) = var("LUNAFLOW_EMAIL_FROM") {
            self.smtp.from = from;
        }
    }
}
