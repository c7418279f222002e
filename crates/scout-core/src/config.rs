//! ============================================================================
//! Console Configuration - Environment defaults and effective settings
//! ============================================================================
//! Precedence, lowest to highest: environment, stored settings, explicit
//! overrides (CLI flags).
//! ============================================================================

use serde::{Deserialize, Serialize};

use crate::db::Settings;
use crate::types::Credentials;

/// Relay base URL used when none is configured
pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:8787";

/// Defaults read from the environment (after `.env` is loaded)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsoleConfig {
    pub backend_url: Option<String>,
    pub api_key: Option<String>,
    pub relay_url: String,
    pub db_path: Option<String>,
}

impl ConsoleConfig {
    pub fn from_env() -> Self {
        Self {
            backend_url: non_empty_env("FAIRFETCH_BACKEND_URL"),
            api_key: non_empty_env("FAIRFETCH_API_KEY"),
            relay_url: non_empty_env("MACROSCOUT_RELAY_URL")
                .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string()),
            db_path: non_empty_env("MACROSCOUT_DB_PATH"),
        }
    }

    /// Merge environment defaults, stored settings, and overrides
    pub fn effective_settings(
        &self,
        stored: Option<Settings>,
        overrides: &SettingsOverrides,
    ) -> Settings {
        let mut settings = stored.unwrap_or_else(|| Settings {
            backend_url: self.backend_url.clone().unwrap_or_default(),
            api_key: self.api_key.clone().unwrap_or_default(),
            ..Settings::default()
        });

        if settings.backend_url.is_empty() {
            settings.backend_url = self.backend_url.clone().unwrap_or_default();
        }
        if settings.api_key.is_empty() {
            settings.api_key = self.api_key.clone().unwrap_or_default();
        }

        overrides.apply(&mut settings);
        settings
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Per-invocation settings overrides
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub backend_url: Option<String>,
    pub api_key: Option<String>,
    pub agent_label: Option<String>,
    pub user_agent: Option<String>,
}

impl SettingsOverrides {
    pub fn is_empty(&self) -> bool {
        self.backend_url.is_none()
            && self.api_key.is_none()
            && self.agent_label.is_none()
            && self.user_agent.is_none()
    }

    pub fn apply(&self, settings: &mut Settings) {
        if let Some(v) = &self.backend_url {
            settings.backend_url = v.clone();
        }
        if let Some(v) = &self.api_key {
            settings.api_key = v.clone();
        }
        if let Some(v) = &self.agent_label {
            settings.agent_label = v.clone();
        }
        if let Some(v) = &self.user_agent {
            settings.user_agent = v.clone();
        }
    }
}

impl Settings {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            api_key: self.api_key.clone(),
            user_agent: self.user_agent.clone(),
            agent_label: self.agent_label.clone(),
        }
    }
}
