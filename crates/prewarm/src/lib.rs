//! Predictive channel pre-buffering for live TV playback.
//!
//! While a viewer watches one channel, the [`PrebufferCoordinator`] keeps the
//! channels they are most likely to switch to next buffered in memory, so a
//! switch can be served instantly from a [`CachedStream`].

pub mod buffer;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fetcher;
pub mod predictor;
pub mod resolver;

pub use buffer::{SegmentBuffer, SegmentInfo};
pub use config::{BufferConfig, CoordinatorConfig, FetcherConfig, PrebufferConfig, PredictorConfig};
pub use coordinator::{
    CachedStream, EvictionReason, PrebufferCoordinator, PrebufferEvent, PrebufferStats,
    StreamStats,
};
pub use error::{PrebufferError, Result};
pub use fetcher::{HlsFetcher, SegmentSource};
pub use predictor::{ChannelPredictor, Prediction};
pub use resolver::{AdjacentChannelResolver, NumericAdjacency, StaticUrlResolver, StreamUrlResolver};
