use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub collections: CollectionsConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectionsConfig {
    #[serde(default = "default_conversations")]
    pub conversations: String,
    #[serde(default = "default_snapshots")]
    pub snapshots: String,
    #[serde(default = "default_rfqs")]
    pub rfqs: String,
    #[serde(default = "default_transcript_field")]
    pub transcript_field: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NavigationConfig {
    #[serde(default = "default_unauthorized_redirect")]
    pub unauthorized_redirect: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    /// Seed documents for the in-memory store.
    #[serde(default)]
    pub fixture: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            conversations: default_conversations(),
            snapshots: default_snapshots(),
            rfqs: default_rfqs(),
            transcript_field: default_transcript_field(),
        }
    }
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            unauthorized_redirect: default_unauthorized_redirect(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let mut cfg = Self::parse(&content)?;
        // Relative fixture paths are resolved against the config file.
        if let (Some(fixture), Some(dir)) = (cfg.store.fixture.as_mut(), path.parent()) {
            if fixture.is_relative() {
                *fixture = dir.join(&*fixture);
            }
        }
        Ok(cfg)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(content).context("failed to parse config toml")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        let c = &self.collections;
        for (key, value) in [
            ("collections.conversations", &c.conversations),
            ("collections.snapshots", &c.snapshots),
            ("collections.rfqs", &c.rfqs),
            ("collections.transcript_field", &c.transcript_field),
        ] {
            if value.trim().is_empty() {
                bail!("{key} must not be empty");
            }
        }
        if !self.navigation.unauthorized_redirect.starts_with('/') {
            bail!("navigation.unauthorized_redirect must be an absolute path");
        }
        Ok(())
    }
}

fn default_conversations() -> String {
    "chats".to_string()
}

fn default_snapshots() -> String {
    "chatProducts".to_string()
}

fn default_rfqs() -> String {
    "rfqs".to_string()
}

fn default_transcript_field() -> String {
    "messages".to_string()
}

fn default_unauthorized_redirect() -> String {
    "/".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}
