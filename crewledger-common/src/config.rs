//! Configuration loading
//!
//! Every setting resolves with the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! Secrets (auth tokens, API keys, passwords) are never logged; only the
//! source they came from.

use crate::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Setting key paired with the environment variable that can supply it
struct Setting {
    key: &'static str,
    env: &'static str,
    secret: bool,
}

const SETTINGS: &[Setting] = &[
    Setting { key: "database_path", env: "DATABASE_PATH", secret: false },
    Setting { key: "receipt_storage_path", env: "RECEIPT_STORAGE_PATH", secret: false },
    Setting { key: "host", env: "APP_HOST", secret: false },
    Setting { key: "port", env: "APP_PORT", secret: false },
    Setting { key: "public_base_url", env: "PUBLIC_BASE_URL", secret: false },
    Setting { key: "twilio_account_sid", env: "TWILIO_ACCOUNT_SID", secret: false },
    Setting { key: "twilio_auth_token", env: "TWILIO_AUTH_TOKEN", secret: true },
    Setting { key: "openai_api_key", env: "OPENAI_API_KEY", secret: true },
    Setting { key: "openai_model", env: "OPENAI_MODEL", secret: false },
    Setting { key: "smtp_host", env: "SMTP_HOST", secret: false },
    Setting { key: "smtp_port", env: "SMTP_PORT", secret: false },
    Setting { key: "smtp_user", env: "SMTP_USER", secret: false },
    Setting { key: "smtp_password", env: "SMTP_PASSWORD", secret: true },
    Setting { key: "accountant_email", env: "ACCOUNTANT_EMAIL", secret: false },
    Setting { key: "google_client_id", env: "GOOGLE_CLIENT_ID", secret: false },
    Setting { key: "google_client_secret", env: "GOOGLE_CLIENT_SECRET", secret: true },
    Setting { key: "session_hours", env: "SESSION_HOURS", secret: false },
];

/// Twilio account credentials
#[derive(Debug, Clone, Default)]
pub struct TwilioConfig {
    pub account_sid: String,
    /// Empty disables webhook signature validation (development only)
    pub auth_token: String,
}

/// SMTP relay settings for the weekly report
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

/// Google OAuth client registration
#[derive(Debug, Clone, Default)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
}

/// Fully resolved application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub receipt_storage_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// Externally visible base URL; used for Twilio signatures and OAuth redirects
    pub public_base_url: String,
    pub twilio: TwilioConfig,
    pub openai_api_key: String,
    pub openai_model: String,
    pub smtp: SmtpConfig,
    pub accountant_email: String,
    pub google: GoogleOAuthConfig,
    pub session_hours: i64,
}

impl AppConfig {
    /// Configuration suitable for tests: everything under `root`, no external credentials
    pub fn for_root(root: &Path) -> Self {
        Self {
            database_path: root.join("crewledger.db"),
            receipt_storage_path: root.join("receipts"),
            host: "127.0.0.1".to_string(),
            port: 5000,
            public_base_url: "http://localhost:5000".to_string(),
            twilio: TwilioConfig::default(),
            openai_api_key: String::new(),
            openai_model: "gpt-4o-mini".to_string(),
            smtp: SmtpConfig {
                host: "smtp.gmail.com".to_string(),
                port: 587,
                user: String::new(),
                password: String::new(),
            },
            accountant_email: String::new(),
            google: GoogleOAuthConfig::default(),
            session_hours: 24,
        }
    }
}

/// Collects configuration sources and resolves them into an [`AppConfig`]
#[derive(Debug, Default)]
pub struct ConfigLoader {
    cli: HashMap<&'static str, String>,
    file: Option<toml::Table>,
    file_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value given on the command line
    ///
    /// Unknown keys are rejected so a typo in a flag mapping fails loudly.
    pub fn cli(mut self, key: &'static str, value: Option<impl ToString>) -> Result<Self> {
        if !is_valid_key(key) {
            return Err(Error::Config(format!("Unknown setting: {}", key)));
        }
        if let Some(v) = value {
            self.cli.insert(key, v.to_string());
        }
        Ok(self)
    }

    /// Load the TOML config file
    ///
    /// An explicit path must exist. Without one, the platform default location
    /// is used when present and silently skipped otherwise.
    pub fn file(mut self, explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => {
                if !p.exists() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        p.display()
                    )));
                }
                p.to_path_buf()
            }
            None => match default_config_file() {
                Some(p) => p,
                None => return Ok(self),
            },
        };

        let content = std::fs::read_to_string(&path)?;
        self.file = Some(toml::from_str::<toml::Table>(&content)?);
        debug!("Loaded config file: {}", path.display());
        self.file_path = Some(path);
        Ok(self)
    }

    /// Use TOML text directly (tests, embedded defaults)
    pub fn toml_str(mut self, content: &str) -> Result<Self> {
        self.file = Some(toml::from_str::<toml::Table>(content)?);
        Ok(self)
    }

    /// Resolve every setting
    pub fn load(&self) -> Result<AppConfig> {
        let data_root = default_data_root();

        let database_path = self
            .lookup("database_path")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_root.join("crewledger.db"));
        let receipt_storage_path = self
            .lookup("receipt_storage_path")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_root.join("receipts"));

        Ok(AppConfig {
            database_path,
            receipt_storage_path,
            host: self.string_or("host", "0.0.0.0"),
            port: self.parse_or("port", 5000)?,
            public_base_url: self
                .string_or("public_base_url", "http://localhost:5000")
                .trim_end_matches('/')
                .to_string(),
            twilio: TwilioConfig {
                account_sid: self.string_or("twilio_account_sid", ""),
                auth_token: self.string_or("twilio_auth_token", ""),
            },
            openai_api_key: self.string_or("openai_api_key", ""),
            openai_model: self.string_or("openai_model", "gpt-4o-mini"),
            smtp: SmtpConfig {
                host: self.string_or("smtp_host", "smtp.gmail.com"),
                port: self.parse_or("smtp_port", 587)?,
                user: self.string_or("smtp_user", ""),
                password: self.string_or("smtp_password", ""),
            },
            accountant_email: self.string_or("accountant_email", ""),
            google: GoogleOAuthConfig {
                client_id: self.string_or("google_client_id", ""),
                client_secret: self.string_or("google_client_secret", ""),
            },
            session_hours: self.parse_or("session_hours", 24)?,
        })
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.lookup(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.lookup(key) {
            Some(raw) => raw.trim().parse::<T>().map_err(|_| {
                Error::Config(format!("Invalid value for {}: {:?}", key, raw))
            }),
            None => Ok(default),
        }
    }

    /// Resolve one key, warning when more than one source supplies it
    fn lookup(&self, key: &str) -> Option<String> {
        let setting = SETTINGS.iter().find(|s| s.key == key)?;

        let from_cli = self.cli.get(key).cloned();
        let from_env = std::env::var(setting.env).ok().filter(|v| !v.is_empty());
        let from_file = self.file.as_ref().and_then(|t| t.get(key)).and_then(toml_scalar);

        let mut sources = Vec::new();
        if from_cli.is_some() {
            sources.push("command line");
        }
        if from_env.is_some() {
            sources.push(setting.env);
        }
        if from_file.is_some() {
            sources.push("config file");
        }
        if sources.len() > 1 {
            warn!(
                key = key,
                secret = setting.secret,
                "Setting supplied by multiple sources ({}); using {}",
                sources.join(", "),
                sources[0]
            );
        }

        from_cli.or(from_env).or(from_file)
    }
}

/// Whether `key` names a known setting
pub fn is_valid_key(key: &str) -> bool {
    SETTINGS.iter().any(|s| s.key == key)
}

fn toml_scalar(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Default config file: `<config_dir>/crewledger/config.toml`, then `/etc/crewledger/config.toml`
fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("crewledger").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/crewledger/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }
    None
}

/// OS-dependent data directory for the database and stored images
fn default_data_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("crewledger"))
        .unwrap_or_else(|| PathBuf::from("./crewledger_data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_cli_key_rejected() {
        let result = ConfigLoader::new().cli("no_such_key", Some("x"));
        assert!(result.is_err());
    }

    #[test]
    fn test_toml_values_are_read() {
        let config = ConfigLoader::new()
            .toml_str("openai_model = \"gpt-4o\"\nsession_hours = 8\n")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.openai_model, "gpt-4o");
        assert_eq!(config.session_hours, 8);
    }

    #[test]
    fn test_cli_beats_file() {
        let config = ConfigLoader::new()
            .toml_str("smtp_host = \"mail.example.com\"")
            .unwrap()
            .cli("smtp_host", Some("relay.internal"))
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.smtp.host, "relay.internal");
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let result = ConfigLoader::new()
            .toml_str("smtp_port = \"not-a-port\"")
            .unwrap()
            .load();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_trailing_slash_stripped_from_base_url() {
        let config = ConfigLoader::new()
            .cli("public_base_url", Some("https://ledger.example.com/"))
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.public_base_url, "https://ledger.example.com");
    }
}
