use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const BASE_URL_ENV: &str = "ROOMCHAT_BASE_URL";
const SESSION_COOKIE_ENV: &str = "ROOMCHAT_SESSION_COOKIE";
const TOKEN_ENV: &str = "ROOMCHAT_TOKEN";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the conversation backend lives
    pub backend: BackendConfig,

    /// Credentials attached to every request
    pub auth: AuthConfig,

    /// Room session behaviour
    pub session: SessionConfig,
}

/// Conversation backend endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub rooms_path: String,
    pub chat_path: String,
    /// Limit for establishing a connection
    pub connect_timeout_secs: u64,
    /// Whole-response limit for the room list and history requests.
    /// The chat stream is not bounded by it.
    pub request_timeout_secs: u64,
}

/// Opaque credentials. Whichever is set is sent as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub session_cookie: Option<String>,
    pub bearer_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Abort the in-flight stream read when the user switches rooms
    pub cancel_on_switch: bool,
    /// Label shown for rooms the server has not titled yet
    pub untitled_label: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:33333/conversation".to_string(),
            rooms_path: "rooms".to_string(),
            chat_path: "chat/stream-auto".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cancel_on_switch: true,
            untitled_label: "New chat".to_string(),
        }
    }
}

impl Config {
    /// Default config location: `~/.roomchat/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(".roomchat").join("config.toml"))
    }

    /// Load configuration from the default location, then apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_env();
        Ok(config)
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            self.backend.base_url = url;
        }
        if let Ok(cookie) = std::env::var(SESSION_COOKIE_ENV) {
            self.auth.session_cookie = Some(cookie);
        }
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            self.auth.bearer_token = Some(token);
        }
    }

    /// Override the backend base URL (CLI flag)
    pub fn set_base_url(&mut self, url: String) {
        self.backend.base_url = url;
    }
}

impl BackendConfig {
    /// Join `path` onto the base URL with exactly one slash between them
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn rooms_url(&self) -> String {
        self.endpoint(&self.rooms_path)
    }

    pub fn history_url(&self, room_id: &str) -> String {
        self.endpoint(&format!(
            "{}/{}/messages",
            self.rooms_path.trim_end_matches('/'),
            room_id
        ))
    }

    pub fn chat_url(&self) -> String {
        self.endpoint(&self.chat_path)
    }
}

impl AuthConfig {
    pub fn has_credentials(&self) -> bool {
        self.session_cookie.is_some() || self.bearer_token.is_some()
    }
}
