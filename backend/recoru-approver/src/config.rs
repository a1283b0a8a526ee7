// src/config.rs

use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::site::DEFAULT_ENTRY_URL;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";
pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const DEFAULT_MAX_PAGES: usize = 200;
const ENV_PREFIX: &str = "RECORU_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0:?}")]
    NotFound(PathBuf),

    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("Invalid configuration JSON")]
    Json(#[from] serde_json::Error),

    #[error("Invalid environment override")]
    Env(#[from] envy::Error),

    #[error("Missing configuration value: {0}")]
    MissingField(&'static str),

    #[error("Invalid mode {0}: expected 1 (apply) or 2 (dry run)")]
    InvalidMode(i64),
}

// --- Resolved Configuration ---

/// Whether a clean timesheet is actually committed or only verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Apply,
    DryRun,
}

impl OperatingMode {
    pub fn from_code(code: i64) -> Result<Self, ConfigError> {
        match code {
            1 => Ok(OperatingMode::Apply),
            2 => Ok(OperatingMode::DryRun),
            other => Err(ConfigError::InvalidMode(other)),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OperatingMode::Apply => "承認モード",
            OperatingMode::DryRun => "確認モード(ドライラン)",
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub contract_id: String,
    pub user_id: String,
    pub secret: String,
}

// Never print the secret, and keep the identifiers out of logs as well.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("contract_id", &"***")
            .field("user_id", &"***")
            .field("secret", &"***")
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct MailSender {
    pub account: String,
    pub secret: String,
}

impl fmt::Debug for MailSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailSender")
            .field("account", &self.account)
            .field("secret", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailSettings {
    pub recipient: String,
    pub sender: MailSender,
    pub smtp_host: String,
    pub smtp_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    Chrome,
    #[default]
    Edge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Timeouts {
    pub element_secs: u64,
    pub navigation_secs: u64,
    pub item_secs: u64,
    pub run_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            element_secs: 5,
            navigation_secs: 10,
            item_secs: 120,
            run_secs: 3 * 60 * 60,
        }
    }
}

impl Timeouts {
    pub fn element(&self) -> Duration {
        Duration::from_secs(self.element_secs)
    }

    pub fn navigation(&self) -> Duration {
        Duration::from_secs(self.navigation_secs)
    }

    pub fn item(&self) -> Duration {
        Duration::from_secs(self.item_secs)
    }

    pub fn run(&self) -> Duration {
        Duration::from_secs(self.run_secs)
    }
}

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub kind: BrowserKind,
    pub webdriver_url: String,
    pub binary: Option<PathBuf>,
    pub profile_path: Option<PathBuf>,
    pub extension_path: Option<PathBuf>,
    pub headless: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub credentials: Credentials,
    pub browser: BrowserSettings,
    pub entry_url: String,
    pub mode: OperatingMode,
    pub log_directory: PathBuf,
    pub mail: Option<MailSettings>,
    pub filter_identity: Option<String>,
    pub units: Option<Vec<String>>,
    pub strict_unit_selection: bool,
    pub timeouts: Timeouts,
    pub max_pages: usize,
}

// --- File & Environment Shapes ---

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsFile {
    contract_id: Option<String>,
    user_id: Option<String>,
    secret: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MailSenderFile {
    account: String,
    secret: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(default)]
    credentials: CredentialsFile,
    profile_path: Option<PathBuf>,
    extension_path: Option<PathBuf>,
    browser_binary: Option<PathBuf>,
    #[serde(default)]
    browser: BrowserKind,
    webdriver_url: Option<String>,
    entry_url: Option<String>,
    mode: Option<i64>,
    #[serde(default)]
    headless: bool,
    log_directory: Option<PathBuf>,
    mail_recipient: Option<String>,
    mail_sender: Option<MailSenderFile>,
    smtp_host: Option<String>,
    smtp_port: Option<u16>,
    filter_identity: Option<String>,
    units: Option<Vec<String>>,
    #[serde(default)]
    strict_unit_selection: bool,
    #[serde(default)]
    timeouts: Timeouts,
    max_pages: Option<usize>,
}

/// `RECORU_`-prefixed variables (also read from `.env`) that take precedence
/// over secrets stored in the config file.
#[derive(Debug, Default, Deserialize)]
pub struct SecretOverrides {
    pub contract_id: Option<String>,
    pub user_id: Option<String>,
    pub secret: Option<String>,
    pub mail_secret: Option<String>,
}

impl SecretOverrides {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(envy::prefixed(ENV_PREFIX).from_env::<SecretOverrides>()?)
    }
}

impl AppConfig {
    /// Read `path`, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let json = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let overrides = SecretOverrides::from_env()?;
        Self::from_json(&json, overrides)
    }

    pub fn from_json(json: &str, overrides: SecretOverrides) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(json)?;

        // Mode is checked first so a bad mode never gets as far as a browser.
        let mode = OperatingMode::from_code(file.mode.ok_or(ConfigError::MissingField("mode"))?)?;

        let credentials = Credentials {
            contract_id: overrides
                .contract_id
                .or(file.credentials.contract_id)
                .ok_or(ConfigError::MissingField("credentials.contractId"))?,
            user_id: overrides
                .user_id
                .or(file.credentials.user_id)
                .ok_or(ConfigError::MissingField("credentials.userId"))?,
            secret: overrides
                .secret
                .or(file.credentials.secret)
                .ok_or(ConfigError::MissingField("credentials.secret"))?,
        };

        let mail = match (file.mail_recipient, file.mail_sender) {
            (Some(recipient), Some(sender)) => Some(MailSettings {
                recipient,
                sender: MailSender {
                    account: sender.account,
                    secret: overrides
                        .mail_secret
                        .or(sender.secret)
                        .ok_or(ConfigError::MissingField("mailSender.secret"))?,
                },
                smtp_host: file.smtp_host.unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
                smtp_port: file.smtp_port.unwrap_or(DEFAULT_SMTP_PORT),
            }),
            _ => None,
        };

        Ok(Self {
            credentials,
            browser: BrowserSettings {
                kind: file.browser,
                webdriver_url: file
                    .webdriver_url
                    .unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string()),
                binary: file.browser_binary,
                profile_path: file.profile_path,
                extension_path: file.extension_path,
                headless: file.headless,
            },
            entry_url: file.entry_url.unwrap_or_else(|| DEFAULT_ENTRY_URL.to_string()),
            mode,
            log_directory: file.log_directory.unwrap_or_else(|| PathBuf::from("logs")),
            mail,
            filter_identity: file.filter_identity.filter(|s| !s.trim().is_empty()),
            units: file.units.filter(|u| !u.is_empty()),
            strict_unit_selection: file.strict_unit_selection,
            timeouts: file.timeouts,
            max_pages: file.max_pages.unwrap_or(DEFAULT_MAX_PAGES).max(1),
        })
    }
}
