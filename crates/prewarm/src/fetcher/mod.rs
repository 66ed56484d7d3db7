// Playlist/segment retrieval for cached channels.

mod http;
mod playlist;
mod poller;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

pub use http::HlsFetcher;
pub use playlist::{
    ByteRange, Playlist, PlaylistDocument, SegmentDescriptor, Variant, parse_playlist,
};
pub use poller::{ChannelIngest, PollReport};

/// Where a channel's manifest and segment payloads come from.
#[async_trait]
pub trait SegmentSource: Send + Sync {
    /// Fetches and parses the media playlist at `url`.
    async fn fetch_playlist(&self, url: &str) -> Result<Playlist>;

    /// Fetches one segment's payload, honouring its byte range.
    async fn fetch_segment(&self, segment: &SegmentDescriptor) -> Result<Bytes>;
}
