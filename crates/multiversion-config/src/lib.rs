// SPDX-License-Identifier: GPL-3.0-or-later
use std::path::Path;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use indexmap::IndexMap;
use multiversion_domain::{Attribution, OrchestratorSettings};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://multiversion.db".to_string(),
            pool_max_size: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5160,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

/// One selectable rule group. Kept as an array so the configured order survives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleToggle {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub enabled: bool,
    pub delay_seconds: f64,
    pub debounce_seconds: u64,
    pub subscription_marker: String,
    pub attribution_username: String,
    pub attribution_source: String,
    pub rules: Vec<RuleToggle>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let defaults = OrchestratorSettings::default();
        Self {
            enabled: defaults.enabled,
            delay_seconds: defaults.delay_seconds,
            debounce_seconds: defaults.debounce_seconds,
            subscription_marker: defaults.subscription_marker,
            attribution_username: defaults.attribution.username,
            attribution_source: defaults.attribution.source,
            rules: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn settings(&self) -> OrchestratorSettings {
        let mut selected_rules = IndexMap::with_capacity(self.rules.len());
        for rule in &self.rules {
            selected_rules.insert(rule.name.clone(), rule.enabled);
        }

        OrchestratorSettings {
            enabled: self.enabled,
            selected_rules,
            delay_seconds: self.delay_seconds,
            debounce_seconds: self.debounce_seconds,
            subscription_marker: self.subscription_marker.clone(),
            attribution: Attribution {
                username: self.attribution_username.clone(),
                source: self.attribution_source.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadClientConfig {
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
}

impl Default for DownloadClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            username: None,
            password: None,
            category: None,
            tags: vec!["multiversion".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunsConfig {
    pub retained: usize,
}

impl Default for RunsConfig {
    fn default() -> Self {
        Self { retained: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub telemetry: TelemetryConfig,
    pub orchestrator: OrchestratorConfig,
    pub search: SearchConfig,
    pub download_client: DownloadClientConfig,
    pub runs: RunsConfig,
}

/// Load configuration from defaults, optional TOML file, and environment overrides (prefix: MULTIVERSION_).
pub fn load(config_path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("MULTIVERSION_").split("__"));

    let config: AppConfig = figment.extract()?;
    config
        .orchestrator
        .settings()
        .validate()
        .context("invalid orchestrator configuration")?;

    Ok(config)
}
