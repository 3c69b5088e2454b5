use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::client::ClientSettings;
use crate::core::controller::ControllerSettings;
use crate::core::conversation::{DEFAULT_MODEL, DEFAULT_TITLE, TITLE_MAX_CHARS};
use crate::core::store::ConversationDefaults;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_API_VERSION: &str = "v1";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const ENV_BASE_URL: &str = "BRANCHAT_BASE_URL";
pub const ENV_TOKEN: &str = "BRANCHAT_TOKEN";

/// On-disk configuration. Every field is optional; accessors supply the
/// defaults.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Backend root, e.g. `http://localhost:8000`
    pub base_url: Option<String>,
    pub api_version: Option<String>,
    /// Connect timeout, and the longest wait between two stream events
    pub request_timeout_secs: Option<u64>,
    /// Models selected in new conversations; the first one generates
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_models: Vec<String>,
    pub default_title: Option<String>,
    pub title_max_chars: Option<usize>,
    /// Bearer token sent with every request
    pub token: Option<String>,
}

impl Config {
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn api_version(&self) -> &str {
        self.api_version
            .as_deref()
            .filter(|version| !version.trim().is_empty())
            .unwrap_or(DEFAULT_API_VERSION)
    }

    pub fn request_timeout(&self) -> Duration {
        let secs = self
            .request_timeout_secs
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    pub fn default_models(&self) -> Vec<String> {
        let models: Vec<String> = self
            .default_models
            .iter()
            .map(|model| model.trim())
            .filter(|model| !model.is_empty())
            .map(String::from)
            .collect();
        if models.is_empty() {
            vec![DEFAULT_MODEL.to_string()]
        } else {
            models
        }
    }

    pub fn default_title(&self) -> &str {
        self.default_title.as_deref().unwrap_or(DEFAULT_TITLE)
    }

    pub fn title_max_chars(&self) -> usize {
        self.title_max_chars
            .filter(|max| *max > 0)
            .unwrap_or(TITLE_MAX_CHARS)
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|token| !token.trim().is_empty())
    }

    /// Overlay `BRANCHAT_BASE_URL` and `BRANCHAT_TOKEN` from the environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    pub(crate) fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(base_url) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.base_url = Some(base_url);
        }
        if let Some(token) = lookup(ENV_TOKEN).filter(|v| !v.trim().is_empty()) {
            self.token = Some(token);
        }
        self
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            base_url: self.base_url().to_string(),
            api_version: self.api_version().to_string(),
            token: self.token().map(String::from),
            request_timeout: self.request_timeout(),
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            defaults: ConversationDefaults {
                title: self.default_title().to_string(),
                models: self.default_models(),
            },
            title_max_chars: self.title_max_chars(),
            idle_timeout: self.request_timeout(),
        }
    }
}

/// Render a path for display, abbreviating the home directory to `~`.
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
