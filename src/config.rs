use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::viewport::OverlayConfig;

const DEFAULT_API_URL: &str = "http://localhost:8000/api";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct ReviewConfig {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub http_timeout: Duration,
    pub overlay: OverlayConfig,
    pub export_dir: Option<PathBuf>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            http_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            overlay: OverlayConfig::default(),
            export_dir: None,
        }
    }
}

/// Load `.env` from the working directory (missing file is fine).
pub fn load_env() {
    let _ = dotenvy::dotenv();
}

/// Load an extra `.env`, e.g. from the app data folder, when it exists.
pub fn load_env_file(path: &Path) {
    if path.exists() {
        if let Err(e) = dotenvy::from_path(path) {
            warn!(path = %path.display(), error = %e, "could not read env file");
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    match non_empty_var(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "invalid value, using default");
            default
        }),
        None => default,
    }
}

impl ReviewConfig {
    /// Read settings from the process environment. Call `load_env` first to
    /// pick up a `.env` file.
    pub fn from_env() -> Self {
        let defaults = OverlayConfig::default();
        let config = Self {
            api_base_url: non_empty_var("DOCFLOW_API_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_token: non_empty_var("DOCFLOW_API_TOKEN"),
            http_timeout: Duration::from_secs(parse_var(
                "DOCFLOW_HTTP_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )),
            overlay: OverlayConfig {
                max_display_width: parse_var("DOCFLOW_MAX_DISPLAY_WIDTH", defaults.max_display_width),
                container_padding: parse_var("DOCFLOW_CONTAINER_PADDING", defaults.container_padding),
                ..defaults
            },
            export_dir: non_empty_var("DOCFLOW_EXPORT_DIR").map(PathBuf::from),
        };
        debug!(api = %config.api_base_url, token = config.api_token.is_some(), "config loaded");
        config
    }

    /// "configured" when an API token is present, else "not_configured".
    pub fn status(&self) -> &'static str {
        if self.api_token.is_some() {
            "configured"
        } else {
            "not_configured"
        }
    }

    /// Export folder: explicit setting, else Downloads, else Desktop.
    pub fn resolve_export_dir(&self) -> Option<PathBuf> {
        self.export_dir
            .clone()
            .or_else(dirs::download_dir)
            .or_else(dirs::desktop_dir)
    }
}
