use std::{env, fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Settings for the monitoring portal and the browser session driving it.
///
/// Credentials may come from the config file or from the
/// `DAMWATCH_USERNAME`/`DAMWATCH_PASSWORD` environment variables; the
/// environment wins when both are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub login_url: String,
    pub webdriver_url: String,
    pub username: String,
    pub password: String,
    pub headless: bool,
    /// How far behind wall-clock time the portal's freshest column lags.
    pub delay_minutes: i64,
    pub alarm_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            login_url: "http://192.168.1.152:8082/production/pages/login.jsp".into(),
            webdriver_url: "http://localhost:4444".into(),
            username: String::new(),
            password: String::new(),
            headless: true,
            delay_minutes: 12,
            alarm_enabled: false,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("failed to read config from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            Self::default()
        };

        if let Ok(username) = env::var("DAMWATCH_USERNAME") {
            config.username = username;
        }
        if let Ok(password) = env::var("DAMWATCH_PASSWORD") {
            config.password = password;
        }

        Ok(config)
    }

    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/damwatch.json")).unwrap();
        assert_eq!(config.delay_minutes, 12);
        assert!(config.headless);
        assert!(!config.has_credentials());
    }
}
