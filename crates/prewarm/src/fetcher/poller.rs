// Per-channel ingest loop: refreshes the manifest on a fixed interval and copies new segments
// into the channel's buffer.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::{SegmentDescriptor, SegmentSource};
use crate::buffer::SegmentBuffer;
use crate::error::{PrebufferError, Result};

/// Outcome of one manifest refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Segments written into the buffer during this refresh
    pub ingested: usize,
    /// Segments dropped because they exceed the buffer capacity
    pub dropped: usize,
    /// The playlist carried `#EXT-X-ENDLIST`
    pub ended: bool,
}

pub struct ChannelIngest {
    channel_id: String,
    playlist_url: String,
    source: Arc<dyn SegmentSource>,
    buffer: Arc<SegmentBuffer>,
    poll_interval: Duration,
    initial_segments: Option<usize>,
    last_sequence: Option<u64>,
}

impl ChannelIngest {
    pub fn new(
        channel_id: impl Into<String>,
        playlist_url: impl Into<String>,
        source: Arc<dyn SegmentSource>,
        buffer: Arc<SegmentBuffer>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            playlist_url: playlist_url.into(),
            source,
            buffer,
            poll_interval,
            initial_segments: None,
            last_sequence: None,
        }
    }

    /// Limits the first refresh to the newest `count` segments.
    pub fn with_initial_segments(mut self, count: Option<usize>) -> Self {
        self.initial_segments = count;
        self
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Refreshes the manifest once and ingests every segment newer than the last one.
    ///
    /// A failed segment download ends this refresh early; it is retried on the next one.
    pub async fn poll_once(&mut self, token: &CancellationToken) -> Result<PollReport> {
        let playlist = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(PrebufferError::Cancelled),
            playlist = self.source.fetch_playlist(&self.playlist_url) => playlist?,
        };

        let mut pending: Vec<&SegmentDescriptor> =
            playlist.segments_after(self.last_sequence).collect();
        if self.last_sequence.is_none()
            && let Some(limit) = self.initial_segments
            && pending.len() > limit
        {
            pending.drain(..pending.len() - limit);
        }

        let mut report = PollReport {
            ended: playlist.end_list,
            ..Default::default()
        };

        for segment in pending {
            let bytes = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(PrebufferError::Cancelled),
                bytes = self.source.fetch_segment(segment) => bytes,
            };
            let bytes = match bytes {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(
                        sequence = segment.sequence,
                        error = %e,
                        "Segment fetch failed, retrying next refresh"
                    );
                    break;
                }
            };

            match self
                .buffer
                .write_segment(segment.id(), &bytes, Utc::now(), segment.duration)
            {
                Ok(()) => {
                    trace!(sequence = segment.sequence, size = bytes.len(), "Buffered segment");
                    self.last_sequence = Some(segment.sequence);
                    report.ingested += 1;
                }
                Err(e @ PrebufferError::SegmentTooLarge { .. }) => {
                    warn!(
                        sequence = segment.sequence,
                        error = %e,
                        "Dropping segment, pausing until next refresh"
                    );
                    self.last_sequence = Some(segment.sequence);
                    report.dropped += 1;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    /// Runs until cancelled or until the playlist ends.
    ///
    /// `on_ingest` is called with the number of new segments after every productive refresh.
    #[instrument(name = "channel_ingest", skip_all, fields(channel = %self.channel_id))]
    pub async fn run(mut self, token: CancellationToken, mut on_ingest: impl FnMut(usize) + Send) {
        info!(url = %self.playlist_url, "Starting channel ingest");
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.poll_once(&token).await {
                Ok(report) => {
                    if report.ingested > 0 {
                        debug!(
                            ingested = report.ingested,
                            buffered = self.buffer.len(),
                            last_sequence = ?self.last_sequence,
                            "Refreshed channel"
                        );
                        on_ingest(report.ingested);
                    }
                    if report.ended {
                        info!("Playlist ended, stopping channel ingest");
                        break;
                    }
                }
                Err(PrebufferError::Cancelled) => break,
                Err(e) => {
                    warn!(
                        error = %e,
                        retryable = e.is_retryable(),
                        "Playlist refresh failed, retrying next tick"
                    );
                }
            }
        }
        debug!("Channel ingest stopped");
    }
}
