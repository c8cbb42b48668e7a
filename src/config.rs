use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the chatflow platform API
    pub base_url: String,

    /// Access token used for REST calls
    pub access_token: Option<String>,

    /// Chat flow to use when the CLI argument is omitted
    pub default_flow: Option<String>,

    /// Seconds to wait before the feed task retries a dropped connection
    pub reconnect_delay_secs: u64,

    /// Flowchat home directory
    #[serde(skip)]
    pub flowchat_home: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));

        Config {
            base_url: "http://localhost:8080/api/v1".to_string(),
            access_token: None,
            default_flow: None,
            reconnect_delay_secs: 3,
            flowchat_home: home.join(".flowchat"),
        }
    }
}

impl Config {
    /// Load configuration from `~/.flowchat/config.toml`
    pub fn load() -> Result<Self> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        let flowchat_home = home.join(".flowchat");
        let config_path = flowchat_home.join("config.toml");

        // Ensure flowchat directory exists
        fs::create_dir_all(&flowchat_home)
            .context("Failed to create .flowchat directory")?;

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            Self::parse(&content)?
        } else {
            Config::default()
        };

        config.flowchat_home = flowchat_home;

        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self.flowchat_home.join("config.toml");
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;
        fs::write(&config_path, content)
            .context("Failed to write config file")?;
        Ok(())
    }

    /// Check if an access token is configured
    pub fn has_access_token(&self) -> bool {
        self.access_token.is_some() || std::env::var("FLOWCHAT_TOKEN").is_ok()
    }

    /// Get access token from config or environment
    pub fn get_access_token(&self) -> Option<String> {
        self.access_token
            .clone()
            .or_else(|| std::env::var("FLOWCHAT_TOKEN").ok())
    }

    /// Update access token
    pub fn set_access_token(&mut self, token: String) {
        self.access_token = Some(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config = Config::parse(
            r#"
            base_url = "https://flow.example.com/api/v1"
            access_token = "tok"
            default_flow = "42"
            reconnect_delay_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.base_url, "https://flow.example.com/api/v1");
        assert_eq!(config.access_token.as_deref(), Some("tok"));
        assert_eq!(config.default_flow.as_deref(), Some("42"));
        assert_eq!(config.reconnect_delay_secs, 5);
    }

    #[test]
    fn rejects_malformed_config() {
        assert!(Config::parse("base_url = [").is_err());
    }
}
