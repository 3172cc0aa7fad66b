use std::{fs, path::Path, path::PathBuf, time::Duration};

use tracing::warn;
use url::Url;

use crate::error::{ClientError, ClientResult};

pub const SETTINGS_FILE: &str = "voting.toml";
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2500);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub server_url: String,
    pub poll_interval: Duration,
    /// Upper bound on one HTTP request, connect through body.
    pub request_timeout: Duration,
    pub credentials_path: PathBuf,
    /// Legacy admin allowlist, consulted only when the server issued no role claim.
    pub admin_emails: Vec<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            credentials_path: PathBuf::from("./.voting/credentials.json"),
            admin_emails: Vec::new(),
        }
    }
}

pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

/// Defaults, then the settings file if readable, then environment overrides.
pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<toml::Table>(&raw) {
            Ok(table) => apply_file(&mut settings, &table),
            Err(err) => warn!(
                path = %path.display(),
                "config: ignoring unparseable settings file: {err}"
            ),
        }
    }

    if let Some(v) = env("VOTING_API_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("APP__SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("APP__POLL_INTERVAL_MS").and_then(|v| parse_millis(&v)) {
        settings.poll_interval = v;
    }
    if let Some(v) = env("APP__REQUEST_TIMEOUT_MS").and_then(|v| parse_millis(&v)) {
        settings.request_timeout = v;
    }
    if let Some(v) = env("APP__CREDENTIALS_PATH") {
        settings.credentials_path = PathBuf::from(v);
    }
    if let Some(v) = env("APP__ADMIN_EMAILS") {
        settings.admin_emails = split_emails(&v);
    }

    settings
}

fn apply_file(settings: &mut ClientSettings, table: &toml::Table) {
    if let Some(v) = table.get("server_url").and_then(toml::Value::as_str) {
        settings.server_url = v.to_string();
    }
    if let Some(v) = table.get("poll_interval_ms").and_then(table_millis) {
        settings.poll_interval = v;
    }
    if let Some(v) = table.get("request_timeout_ms").and_then(table_millis) {
        settings.request_timeout = v;
    }
    if let Some(v) = table.get("credentials_path").and_then(toml::Value::as_str) {
        settings.credentials_path = PathBuf::from(v);
    }
    match table.get("admin_emails") {
        Some(toml::Value::String(raw)) => settings.admin_emails = split_emails(raw),
        Some(toml::Value::Array(items)) => {
            settings.admin_emails = items
                .iter()
                .filter_map(toml::Value::as_str)
                .flat_map(split_emails)
                .collect();
        }
        _ => {}
    }
}

fn parse_millis(raw: &str) -> Option<Duration> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

fn table_millis(value: &toml::Value) -> Option<Duration> {
    match value {
        toml::Value::Integer(ms) if *ms > 0 => Some(Duration::from_millis(*ms as u64)),
        toml::Value::String(ms) => parse_millis(ms),
        _ => None,
    }
}

fn split_emails(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|email| email.trim().to_ascii_lowercase())
        .filter(|email| !email.is_empty())
        .collect()
}

/// Parses the API base URL. The path always ends in `/` so endpoint paths join beneath it.
pub fn parse_server_url(raw: &str) -> ClientResult<Url> {
    let mut url = Url::parse(raw.trim())
        .map_err(|err| ClientError::validation(format!("invalid server url '{raw}': {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ClientError::validation(format!(
            "server url must start with http:// or https://: {raw}"
        )));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
