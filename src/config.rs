use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use log::info;
use once_cell::sync::OnceCell;

use mentorchat::models::User;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatConfig {
    pub base_url: String,
    pub user_id: String,
    pub username: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

impl ChatConfig {
    pub fn new(base_url: &str, user_id: &str, username: &str) -> Self {
        ChatConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id: user_id.to_string(),
            username: username.to_string(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }

    pub fn user(&self) -> User {
        User { id: self.user_id.clone(), username: self.username.clone() }
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(anyhow!("Backend base url is missing"));
        }
        if self.user_id.is_empty() {
            return Err(anyhow!("User id is missing"));
        }
        url::Url::parse(&self.base_url).map_err(|e| anyhow!("Invalid backend base url '{}': {}", self.base_url, e))?;
        Ok(())
    }
}

static CONFIG_PATH_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

/// Point config loading/saving at `path` instead of the user config dir.
pub fn set_config_path_override(path: PathBuf) {
    if CONFIG_PATH_OVERRIDE.set(path).is_err() {
        info!("Config path override already set, keeping the first one");
    }
}

pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not determine config directory"))?
        .join("mentorchat");

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

fn get_config_path() -> Result<PathBuf> {
    if let Some(path) = CONFIG_PATH_OVERRIDE.get() {
        return Ok(path.clone());
    }
    Ok(get_config_dir()?.join("config.json"))
}

pub fn save_config(config: &ChatConfig) -> Result<()> {
    save_config_to(&get_config_path()?, config)
}

pub fn load_config() -> Result<Option<ChatConfig>> {
    load_config_from(&get_config_path()?)
}

pub fn save_config_to(path: &Path, config: &ChatConfig) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, config)?;

    info!("Config saved for {}", config.username);
    Ok(())
}

pub fn load_config_from(path: &Path) -> Result<Option<ChatConfig>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut file = File::open(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    let config: ChatConfig = serde_json::from_str(&contents)?;
    info!("Loaded config for {} from {}", config.username, path.display());

    Ok(Some(config))
}

/// Config values from `MENTORCHAT_*` variables, if all required ones are set.
pub fn config_from_env() -> Option<ChatConfig> {
    let base_url = std::env::var("MENTORCHAT_BASE_URL").ok()?;
    let user_id = std::env::var("MENTORCHAT_USER_ID").ok()?;
    let username = std::env::var("MENTORCHAT_USERNAME").unwrap_or_else(|_| user_id.clone());
    Some(ChatConfig::new(&base_url, &user_id, &username))
}
