use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use prewarm::config::PrebufferConfig;
use prewarm::{NumericAdjacency, StaticUrlResolver};
use serde::Deserialize;

use crate::cli::Args;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelEntry {
    pub id: String,
    pub url: String,
}

/// Contents of the JSON file passed with `--config`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Lineup in channel-number order; adjacency follows this order
    pub channels: Vec<ChannelEntry>,
    pub favorites: Vec<String>,
    pub data_dir: Option<PathBuf>,
    /// Neighbours on each side considered adjacent
    pub adjacency_radius: usize,
    /// Channel up from the last channel wraps to the first
    pub wrap_lineup: bool,
    pub max_cached: Option<usize>,
    pub buffer_capacity_mb: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            favorites: Vec::new(),
            data_dir: None,
            adjacency_radius: 1,
            wrap_lineup: true,
            max_cached: None,
            buffer_capacity_mb: None,
            poll_interval_ms: None,
            idle_timeout_secs: None,
            user_agent: None,
        }
    }
}

impl HostConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(AppError::Config("no channels configured".to_string()));
        }
        let mut seen = HashSet::new();
        for channel in &self.channels {
            if channel.id.trim().is_empty() {
                return Err(AppError::Config("channel with empty id".to_string()));
            }
            if !seen.insert(channel.id.as_str()) {
                return Err(AppError::Config(format!(
                    "channel `{}` listed twice",
                    channel.id
                )));
            }
        }
        if self.buffer_capacity_mb == Some(0) {
            return Err(AppError::Config(
                "buffer_capacity_mb must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Library configuration, with command line flags taking precedence.
    pub fn prebuffer_config(&self, args: &Args) -> PrebufferConfig {
        let mut config = PrebufferConfig::default();

        if let Some(max_cached) = args.max_cached.or(self.max_cached) {
            config.coordinator.max_cached = max_cached;
        }
        if let Some(secs) = self.idle_timeout_secs {
            config.coordinator.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(mb) = self.buffer_capacity_mb {
            config.buffer.capacity = mb * 1024 * 1024;
        }
        if let Some(ms) = args.poll_interval_ms.or(self.poll_interval_ms) {
            config.fetcher.poll_interval = Duration::from_millis(ms.max(100));
        }
        if let Some(user_agent) = &self.user_agent {
            config.fetcher.user_agent = user_agent.clone();
        }
        config.predictor.data_dir = args.data_dir.clone().or_else(|| self.data_dir.clone());
        config
    }

    pub fn url_resolver(&self) -> StaticUrlResolver {
        self.channels
            .iter()
            .map(|c| (c.id.clone(), c.url.clone()))
            .collect()
    }

    pub fn adjacency(&self) -> NumericAdjacency {
        let lineup = self.channels.iter().map(|c| c.id.clone()).collect();
        NumericAdjacency::new(lineup, self.adjacency_radius).with_wrap(self.wrap_lineup)
    }

    pub fn has_channel(&self, id: &str) -> bool {
        self.channels.iter().any(|c| c.id == id)
    }
}
