use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use client_core::{ClientResult, ServiceEndpoints};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "collatex.toml";
pub const DEFAULT_COOKIE_FILE: &str = ".collatex-session.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub base_url: String,
    pub transcription_base_url: Option<String>,
    pub upload_path: String,
    pub request_timeout_seconds: Option<u64>,
    pub notice_dismiss_seconds: u64,
    /// Where the service's session cookie is kept between runs.
    pub cookie_file: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000/collate".into(),
            transcription_base_url: None,
            upload_path: "upload".into(),
            request_timeout_seconds: Some(120),
            notice_dismiss_seconds: 8,
            cookie_file: PathBuf::from(DEFAULT_COOKIE_FILE),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    base_url: Option<String>,
    transcription_base_url: Option<String>,
    upload_path: Option<String>,
    request_timeout_seconds: Option<u64>,
    notice_dismiss_seconds: Option<u64>,
    cookie_file: Option<PathBuf>,
}

impl Settings {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_seconds
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn notice_dismiss_after(&self) -> Duration {
        Duration::from_secs(self.notice_dismiss_seconds)
    }

    pub fn endpoints(&self) -> ClientResult<ServiceEndpoints> {
        let mut endpoints =
            ServiceEndpoints::new(&self.base_url)?.with_upload_path(self.upload_path.clone());
        if let Some(url) = &self.transcription_base_url {
            endpoints = endpoints.with_transcription_base_url(url)?;
        }
        Ok(endpoints)
    }
}

pub fn load_settings(config_path: &Path) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if config_path.exists() {
        let raw = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config '{}'", config_path.display()))?;
        apply_file(&mut settings, &raw)
            .with_context(|| format!("invalid config '{}'", config_path.display()))?;
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw)?;
    if let Some(v) = file_cfg.base_url {
        settings.base_url = v;
    }
    if let Some(v) = file_cfg.transcription_base_url {
        settings.transcription_base_url = Some(v);
    }
    if let Some(v) = file_cfg.upload_path {
        settings.upload_path = v;
    }
    if let Some(v) = file_cfg.request_timeout_seconds {
        settings.request_timeout_seconds = Some(v);
    }
    if let Some(v) = file_cfg.notice_dismiss_seconds {
        settings.notice_dismiss_seconds = v;
    }
    if let Some(v) = file_cfg.cookie_file {
        settings.cookie_file = v;
    }
    Ok(())
}

fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("COLLATEX_BASE_URL") {
        settings.base_url = v;
    }
    if let Some(v) = var("APP__BASE_URL") {
        settings.base_url = v;
    }

    if let Some(v) = var("APP__TRANSCRIPTION_BASE_URL") {
        settings.transcription_base_url = Some(v);
    }

    if let Some(v) = var("APP__UPLOAD_PATH") {
        settings.upload_path = v;
    }

    if let Some(v) = var("APP__REQUEST_TIMEOUT_SECONDS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_seconds = Some(parsed);
        }
    }

    if let Some(v) = var("APP__NOTICE_DISMISS_SECONDS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.notice_dismiss_seconds = parsed;
        }
    }

    if let Some(v) = var("APP__COOKIE_FILE") {
        settings.cookie_file = PathBuf::from(v);
    }
}
