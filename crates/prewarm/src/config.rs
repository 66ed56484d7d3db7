use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Default per-channel buffer size (10 MiB).
pub const DEFAULT_BUFFER_CAPACITY: usize = 10 * 1024 * 1024;

// --- Top-Level Configuration ---
#[derive(Debug, Clone, Default)]
pub struct PrebufferConfig {
    pub coordinator: CoordinatorConfig,
    pub buffer: BufferConfig,
    pub predictor: PredictorConfig,
    pub fetcher: FetcherConfig,
}

// --- Coordinator Configuration ---
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Maximum number of channels buffered at the same time
    pub max_cached: usize,
    /// Number of predicted channels considered on each recomputation
    pub predicted_candidates: usize,
    /// Length of the recently-watched list
    pub recent_limit: usize,
    /// How often idle streams are swept
    pub maintenance_interval: Duration,
    /// Non-active streams unaccessed for longer than this are evicted
    pub idle_timeout: Duration,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_cached: 5,
            predicted_candidates: 3,
            recent_limit: 10,
            maintenance_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(5 * 60),
            event_capacity: 64,
        }
    }
}

// --- Buffer Configuration ---
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Bytes reserved per cached channel
    pub capacity: usize,
    /// Maximum number of segment records kept per buffer
    pub max_segments: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUFFER_CAPACITY,
            max_segments: 50,
        }
    }
}

// --- Predictor Configuration ---
#[derive(Debug, Clone)]
pub struct PredictorConfig {
    /// Directory holding the persisted model. `None` keeps the model in memory only.
    pub data_dir: Option<PathBuf>,
    /// Minimum interval between two saves of the model
    pub save_interval: Duration,
    /// Multiplier applied to every weight on each persistence tick (1.0 disables decay)
    pub decay_factor: f64,
    /// Weights that decay below this value are dropped
    pub min_weight: f64,
    /// Maximum number of destinations remembered per source channel
    pub max_targets_per_channel: usize,
    /// Maximum number of channels remembered per hour of day
    pub max_channels_per_hour: usize,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            save_interval: Duration::from_secs(5 * 60),
            decay_factor: 0.999,
            min_weight: 0.01,
            max_targets_per_channel: 64,
            max_channels_per_hour: 256,
        }
    }
}

// --- Fetcher Configuration ---
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Interval between two playlist refreshes of a cached channel
    pub poll_interval: Duration,
    pub playlist_timeout: Duration,
    pub segment_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
    /// Extra headers sent with every request
    pub headers: HeaderMap,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
    /// Only ingest this many segments from the live edge on the first poll.
    /// `None` ingests every segment listed in the first playlist.
    pub initial_segments: Option<usize>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            playlist_timeout: Duration::from_secs(10),
            segment_timeout: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: FetcherConfig::default_headers(),
            pool_max_idle_per_host: 10,
            pool_idle_timeout: Duration::from_secs(30),
            initial_segments: None,
        }
    }
}

impl FetcherConfig {
    pub fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static(
                "application/vnd.apple.mpegurl,application/x-mpegurl,video/*;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        headers
    }
}
