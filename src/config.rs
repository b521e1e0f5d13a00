//! Layered application configuration.
//!
//! Precedence, lowest first: built-in defaults, the TOML settings file,
//! the app root `.env` file, then the process environment.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::db::{select_db_config, DbConfig};
use crate::remote::transport::{ReqwestTransport, TransportError, DEFAULT_REQUEST_TIMEOUT};
use crate::remote::{ApiKey, RemoteEndpoints, RemoteTaskClient, DEFAULT_API_BASE};
use crate::tasks::schedule::PollSchedule;
use crate::upload::{SuffixCase, UploadPolicies};

pub const DEFAULT_SETTINGS_PATH: &str = "config/picture-ai.settings.toml";
pub const DEFAULT_STORAGE_ROOT: &str = "var/picture-ai/objects";
pub const DEFAULT_PUBLIC_BASE_URL: &str = "/objects";

pub const ENV_SETTINGS: &str = "PICTURE_AI_SETTINGS";
pub const ENV_API_KEY: &str = "PICTURE_AI_API_KEY";
pub const ENV_API_KEY_FALLBACK: &str = "DASHSCOPE_API_KEY";
pub const ENV_API_BASE: &str = "PICTURE_AI_API_BASE";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "PICTURE_AI_HTTP_TIMEOUT_SECS";
pub const ENV_DB: &str = "PICTURE_AI_DB";
pub const ENV_STORAGE_ROOT: &str = "PICTURE_AI_STORAGE_ROOT";
pub const ENV_PUBLIC_BASE_URL: &str = "PICTURE_AI_PUBLIC_BASE_URL";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read settings '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse settings TOML '{path}': {message}")]
    ParseToml { path: String, message: String },
    #[error("setting '{field}' is invalid: {message}")]
    InvalidField { field: String, message: String },
    #[error("no AI service API key configured (set {ENV_API_KEY} or {ENV_API_KEY_FALLBACK})")]
    MissingApiKey,
    #[error("http client setup failed: {0}")]
    HttpClient(String),
}

impl From<TransportError> for ConfigError {
    fn from(error: TransportError) -> Self {
        Self::HttpClient(error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiServiceConfig {
    pub api_key: Option<ApiKey>,
    pub api_base: String,
    pub http_timeout: Duration,
}

impl AiServiceConfig {
    pub fn api_key(&self) -> Result<&ApiKey, ConfigError> {
        self.api_key.as_ref().ok_or(ConfigError::MissingApiKey)
    }

    pub fn transport(&self) -> Result<ReqwestTransport, ConfigError> {
        Ok(ReqwestTransport::new(self.http_timeout)?)
    }

    pub fn build_client(&self) -> Result<RemoteTaskClient<ReqwestTransport>, ConfigError> {
        let api_key = self.api_key()?.clone();
        let transport = self.transport()?;
        Ok(RemoteTaskClient::new(transport, api_key)
            .with_endpoints(RemoteEndpoints::new(self.api_base.as_str())))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub public_base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub app_root: PathBuf,
    pub ai: AiServiceConfig,
    pub db: DbConfig,
    pub storage: StorageConfig,
    pub upload: UploadPolicies,
    pub polling: PollSchedule,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SettingsFile {
    pub ai: AiSection,
    pub storage: StorageSection,
    pub database: DatabaseSection,
    pub upload: UploadSection,
    pub polling: PollingSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AiSection {
    pub api_base: Option<String>,
    pub http_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub root: Option<String>,
    pub public_base_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    pub suffix_case: Option<SuffixCase>,
    pub picture_max_bytes: Option<u64>,
    pub avatar_max_bytes: Option<u64>,
    pub url_max_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollingSection {
    pub interval_secs: Option<u64>,
    pub max_wait_secs: Option<u64>,
    pub max_consecutive_failures: Option<u32>,
}

/// Environment-derived values, already merged from `.env` and the process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub http_timeout_secs: Option<String>,
    pub db_path: Option<String>,
    pub storage_root: Option<String>,
    pub public_base_url: Option<String>,
}

impl EnvOverrides {
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            api_key: get(ENV_API_KEY).or_else(|| get(ENV_API_KEY_FALLBACK)),
            api_base: get(ENV_API_BASE),
            http_timeout_secs: get(ENV_HTTP_TIMEOUT_SECS),
            db_path: get(ENV_DB),
            storage_root: get(ENV_STORAGE_ROOT),
            public_base_url: get(ENV_PUBLIC_BASE_URL),
        }
    }
}

pub fn load_app_config(
    app_root: &Path,
    explicit_settings_path: Option<&str>,
) -> Result<AppConfig, ConfigError> {
    let dotenv = load_dotenv(app_root.join(".env").as_path())?;
    let lookup = |key: &str| std::env::var(key).ok().or_else(|| dotenv.get(key).cloned());

    let settings_path = explicit_settings_path
        .map(str::to_string)
        .or_else(|| lookup(ENV_SETTINGS));
    let settings = load_settings_file(app_root, settings_path.as_deref())?;
    select_app_config(app_root, &settings, &EnvOverrides::from_lookup(lookup))
}

/// Reads the settings file. Only an explicitly named file must exist.
pub fn load_settings_file(
    app_root: &Path,
    explicit_path: Option<&str>,
) -> Result<SettingsFile, ConfigError> {
    let explicit = explicit_path
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .map(|p| if p.is_absolute() { p } else { app_root.join(p) });
    let path = match explicit {
        Some(path) => path,
        None => {
            let default_path = app_root.join(DEFAULT_SETTINGS_PATH);
            if !default_path.exists() {
                return Ok(SettingsFile::default());
            }
            default_path
        }
    };

    let raw = fs::read_to_string(path.as_path()).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let settings = toml::from_str::<SettingsFile>(raw.as_str()).map_err(|e| ConfigError::ParseToml {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    debug!(path = %path.display(), "settings file loaded");
    Ok(settings)
}

pub fn select_app_config(
    app_root: &Path,
    settings: &SettingsFile,
    env: &EnvOverrides,
) -> Result<AppConfig, ConfigError> {
    let api_base = choose(env.api_base.as_deref(), settings.ai.api_base.as_deref())
        .unwrap_or_else(|| String::from(DEFAULT_API_BASE));
    let http_timeout = match env.http_timeout_secs.as_deref() {
        Some(raw) => parse_positive_secs(ENV_HTTP_TIMEOUT_SECS, raw)?,
        None => match settings.ai.http_timeout_secs {
            Some(secs) => positive_secs("ai.http_timeout_secs", secs)?,
            None => DEFAULT_REQUEST_TIMEOUT,
        },
    };

    let db = select_db_config(
        choose(env.db_path.as_deref(), settings.database.path.as_deref()).as_deref(),
        app_root,
    );

    let storage_root = choose(env.storage_root.as_deref(), settings.storage.root.as_deref())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT));
    let storage = StorageConfig {
        root: if storage_root.is_absolute() {
            storage_root
        } else {
            app_root.join(storage_root)
        },
        public_base_url: choose(
            env.public_base_url.as_deref(),
            settings.storage.public_base_url.as_deref(),
        )
        .unwrap_or_else(|| String::from(DEFAULT_PUBLIC_BASE_URL)),
    };

    Ok(AppConfig {
        app_root: app_root.to_path_buf(),
        ai: AiServiceConfig {
            api_key: env.api_key.as_deref().and_then(ApiKey::new),
            api_base,
            http_timeout,
        },
        db,
        storage,
        upload: select_upload_policies(&settings.upload),
        polling: select_poll_schedule(&settings.polling)?,
    })
}

fn select_upload_policies(section: &UploadSection) -> UploadPolicies {
    let mut policies = UploadPolicies::default();
    let suffix_case = section.suffix_case.unwrap_or_default();
    for policy in [
        &mut policies.picture,
        &mut policies.avatar,
        &mut policies.url,
    ] {
        policy.suffix_case = suffix_case;
    }
    if section.picture_max_bytes.is_some() {
        policies.picture.max_bytes = section.picture_max_bytes;
    }
    if section.avatar_max_bytes.is_some() {
        policies.avatar.max_bytes = section.avatar_max_bytes;
    }
    if section.url_max_bytes.is_some() {
        policies.url.max_bytes = section.url_max_bytes;
    }
    policies
}

fn select_poll_schedule(section: &PollingSection) -> Result<PollSchedule, ConfigError> {
    let mut schedule = PollSchedule::default();
    if let Some(secs) = section.interval_secs {
        schedule.interval = positive_secs("polling.interval_secs", secs)?;
    }
    if let Some(secs) = section.max_wait_secs {
        schedule.max_duration = positive_secs("polling.max_wait_secs", secs)?;
    }
    if let Some(limit) = section.max_consecutive_failures {
        schedule.max_consecutive_failures = limit;
    }
    Ok(schedule)
}

fn choose(primary: Option<&str>, fallback: Option<&str>) -> Option<String> {
    primary
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| fallback.map(str::trim).filter(|v| !v.is_empty()))
        .map(str::to_string)
}

fn parse_positive_secs(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    let secs = raw
        .trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidField {
            field: field.to_string(),
            message: format!("expected whole seconds, got '{raw}': {e}"),
        })?;
    positive_secs(field, secs)
}

fn positive_secs(field: &str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::InvalidField {
            field: field.to_string(),
            message: String::from("must be greater than zero"),
        });
    }
    Ok(Duration::from_secs(secs))
}

fn load_dotenv(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let raw = fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    Ok(parse_dotenv_content(raw.as_str()))
}

pub fn parse_dotenv_content(raw: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in raw.lines() {
        let mut line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("export ") {
            line = rest.trim_start();
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        out.insert(key.to_string(), unquote_env_value(value.trim()));
    }
    out
}

fn unquote_env_value(value: &str) -> String {
    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    if quoted {
        return value[1..value.len() - 1].to_string();
    }
    match value.split_once(" #") {
        Some((before_comment, _)) => before_comment.trim_end().to_string(),
        None => value.to_string(),
    }
}
