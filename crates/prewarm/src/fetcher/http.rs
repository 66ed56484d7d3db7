// HTTP implementation of the segment source: playlist GET + (range) segment GET.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument, trace};
use url::Url;

use super::SegmentSource;
use super::playlist::{ByteRange, Playlist, PlaylistDocument, SegmentDescriptor, parse_playlist};
use crate::config::FetcherConfig;
use crate::error::{PrebufferError, Result};

pub struct HlsFetcher {
    client: Client,
    config: FetcherConfig,
}

impl HlsFetcher {
    pub fn new(client: Client, config: FetcherConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    async fn get_playlist_document(&self, url: &Url) -> Result<PlaylistDocument> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.config.playlist_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PrebufferError::http_status(status, url.as_str(), "playlist"));
        }

        // Redirects change the base that relative segment URIs resolve against.
        let final_url = response.url().clone();
        let body = response.bytes().await?;
        parse_playlist(&body, &final_url)
    }
}

/// Cuts the requested range out of a full-body (200) response to a range request.
fn slice_full_body(body: Bytes, range: &ByteRange, url: &Url) -> Result<Bytes> {
    let start = usize::try_from(range.offset).unwrap_or(usize::MAX);
    let end = usize::try_from(range.end()).unwrap_or(usize::MAX);
    if end > body.len() || start >= end {
        return Err(PrebufferError::IncompleteBody {
            url: url.to_string(),
            end: range.end(),
            received: body.len(),
        });
    }
    Ok(body.slice(start..end))
}

#[async_trait]
impl SegmentSource for HlsFetcher {
    #[instrument(skip(self), level = "debug")]
    async fn fetch_playlist(&self, url: &str) -> Result<Playlist> {
        let playlist_url =
            Url::parse(url).map_err(|e| PrebufferError::invalid_url(url, e.to_string()))?;

        match self.get_playlist_document(&playlist_url).await? {
            PlaylistDocument::Media(playlist) => Ok(playlist),
            master @ PlaylistDocument::Master(_) => {
                let variant = master.best_variant().ok_or_else(|| {
                    PrebufferError::playlist(format!("Master playlist {url} has no variants"))
                })?;
                debug!(
                    variant = %variant.url,
                    bandwidth = variant.bandwidth,
                    "Selected highest bandwidth variant"
                );
                match self.get_playlist_document(&variant.url).await? {
                    PlaylistDocument::Media(playlist) => Ok(playlist),
                    PlaylistDocument::Master(_) => Err(PrebufferError::playlist(format!(
                        "Expected media playlist at {}, got master",
                        variant.url
                    ))),
                }
            }
        }
    }

    async fn fetch_segment(&self, segment: &SegmentDescriptor) -> Result<Bytes> {
        let mut request = self
            .client
            .get(segment.url.clone())
            .timeout(self.config.segment_timeout);
        if let Some(range) = &segment.byte_range {
            request = request.header(reqwest::header::RANGE, range.header_value());
        }

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(PrebufferError::http_status(
                status,
                segment.url.as_str(),
                "segment",
            ));
        }

        let body = response.bytes().await?;
        let body = match (&segment.byte_range, status) {
            (Some(range), StatusCode::OK) => slice_full_body(body, range, &segment.url)?,
            _ => body,
        };
        trace!(
            sequence = segment.sequence,
            size = body.len(),
            status = %status,
            "Fetched segment"
        );
        Ok(body)
    }
}
