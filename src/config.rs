//! Configuration types.
//!
//! Everything is read from the environment. A channel is enabled by its
//! anchor variable (`MAILBOX_IMAP_HOST`, `VENDOR_API_BASE_URL`, `MOCK_DIR`);
//! once enabled, missing credentials or a missing company are startup errors.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::channels::{MailboxConfig, MessageFilter, VendorApiConfig};
use crate::error::ConfigError;
use crate::fleet::{CompanySelector, ResolveOptions};
use crate::parsers::Dialect;
use crate::pipeline::ScheduleConfig;

/// Top-level intake configuration.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    pub db_path: PathBuf,
    /// Root of the `bookings/<company>/...` document tree.
    pub storage_root: PathBuf,
    pub schedule: ScheduleConfig,
    pub resolve: ResolveOptions,
    pub mailbox: Option<MailboxChannelConfig>,
    pub vendor_api: Option<VendorApiChannelConfig>,
    pub mock: Option<MockChannelConfig>,
}

/// IMAP mailbox channel.
#[derive(Debug, Clone)]
pub struct MailboxChannelConfig {
    pub imap: MailboxConfig,
    pub filter: MessageFilter,
    pub company: CompanySelector,
    pub dialect: Dialect,
}

/// Vendor mail API channel.
#[derive(Debug, Clone)]
pub struct VendorApiChannelConfig {
    pub api: VendorApiConfig,
    pub filter: MessageFilter,
    pub company: CompanySelector,
    pub dialect: Dialect,
}

/// Filesystem mock channel.
#[derive(Debug, Clone)]
pub struct MockChannelConfig {
    pub dir: PathBuf,
    pub company: CompanySelector,
    pub dialect: Dialect,
}

impl IntakeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let companies = env
            .get("INTAKE_COMPANIES")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(selector)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            db_path: env
                .get("INTAKE_DB_PATH")
                .unwrap_or_else(|| "./data/fleet-intake.db".to_string())
                .into(),
            storage_root: env
                .get("INTAKE_STORAGE_ROOT")
                .unwrap_or_else(|| "./data/documents".to_string())
                .into(),
            schedule: ScheduleConfig {
                interval: Duration::from_secs(env.parse_or("INTAKE_POLL_INTERVAL_SECS", 300u64)?),
                companies,
            },
            resolve: ResolveOptions {
                allow_single_available_fallback: env
                    .flag_or("INTAKE_SINGLE_AVAILABLE_FALLBACK", true)?,
            },
            mailbox: mailbox_from(&env)?,
            vendor_api: vendor_api_from(&env)?,
            mock: mock_from(&env)?,
        })
    }

    /// Names of the enabled channels, for the startup banner.
    pub fn enabled_channels(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.mailbox.is_some() {
            names.push("mailbox");
        }
        if self.vendor_api.is_some() {
            names.push("vendor-api");
        }
        if self.mock.is_some() {
            names.push("filesystem-mock");
        }
        names
    }
}

fn mailbox_from(env: &Env<'_>) -> Result<Option<MailboxChannelConfig>, ConfigError> {
    let Some(host) = env.get("MAILBOX_IMAP_HOST") else {
        return Ok(None);
    };
    let username = env.require("MAILBOX_USERNAME", "IMAP login for the reservations mailbox")?;
    let password = env.require("MAILBOX_PASSWORD", "IMAP password or app password")?;

    let mut imap = MailboxConfig::new(&host, &username, SecretString::from(password));
    imap.port = env.parse_or("MAILBOX_IMAP_PORT", imap.port)?;
    if let Some(folder) = env.get("MAILBOX_FOLDER") {
        imap.folder = folder;
    }
    imap.mark_seen = env.flag_or("MAILBOX_MARK_SEEN", imap.mark_seen)?;

    Ok(Some(MailboxChannelConfig {
        imap,
        filter: MessageFilter {
            sender: env.get("MAILBOX_SENDER"),
            raw_query: env.get("MAILBOX_RAW_QUERY"),
            include_seen: env.flag_or("MAILBOX_INCLUDE_SEEN", false)?,
            limit: None,
        },
        company: env.company("MAILBOX_COMPANY")?,
        dialect: env.parse_or("MAILBOX_DIALECT", Dialect::Generic)?,
    }))
}

fn vendor_api_from(env: &Env<'_>) -> Result<Option<VendorApiChannelConfig>, ConfigError> {
    let Some(base_url) = env.get("VENDOR_API_BASE_URL") else {
        return Ok(None);
    };
    let token = env.require("VENDOR_API_TOKEN", "bearer token for the mail API")?;

    let mut api = VendorApiConfig::new(&base_url, SecretString::from(token));
    if let Some(folder) = env.get("VENDOR_API_FOLDER") {
        api.folder = folder;
    }
    api.limit = env.parse_or("VENDOR_API_LIMIT", api.limit)?;

    Ok(Some(VendorApiChannelConfig {
        api,
        filter: MessageFilter {
            sender: env.get("VENDOR_API_SENDER"),
            ..Default::default()
        },
        company: env.company("VENDOR_API_COMPANY")?,
        dialect: env.parse_or("VENDOR_API_DIALECT", Dialect::Vendor)?,
    }))
}

fn mock_from(env: &Env<'_>) -> Result<Option<MockChannelConfig>, ConfigError> {
    let Some(dir) = env.get("MOCK_DIR") else {
        return Ok(None);
    };
    Ok(Some(MockChannelConfig {
        dir: dir.into(),
        company: env.company("MOCK_COMPANY")?,
        dialect: env.parse_or("MOCK_DIALECT", Dialect::Generic)?,
    }))
}

fn selector(value: &str) -> CompanySelector {
    match value.parse() {
        Ok(selector) => selector,
        Err(never) => match never {},
    }
}

/// Accepts `1/0`, `true/false`, `yes/no`, `on/off`.
pub fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, key: &str, hint: &str) -> Result<String, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::MissingRequired {
            key: key.to_string(),
            hint: hint.to_string(),
        })
    }

    fn company(&self, key: &str) -> Result<CompanySelector, ConfigError> {
        self.require(key, "company id, email or name owning this channel")
            .map(|v| selector(&v))
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}': {e}"),
            }),
        }
    }

    fn flag_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        self.get(key)
            .map_or(Ok(default), |raw| parse_flag(key, &raw))
    }
}
