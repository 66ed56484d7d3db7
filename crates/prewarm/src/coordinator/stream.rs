use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::buffer::SegmentBuffer;

/// A channel that is being pre-buffered in the background.
#[derive(Debug)]
pub struct CachedStream {
    channel_id: String,
    url: String,
    score: u32,
    buffer: Arc<SegmentBuffer>,
    live: AtomicBool,
    last_access: Mutex<Instant>,
    created_at: DateTime<Utc>,
    token: CancellationToken,
}

/// Point-in-time view of one cached stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStats {
    pub channel_id: String,
    pub url: String,
    pub score: u32,
    pub live: bool,
    pub buffered_bytes: usize,
    pub buffered_secs: f64,
    pub segments: usize,
    pub total_written: u64,
    pub idle_secs: u64,
    pub created_at: DateTime<Utc>,
}

impl CachedStream {
    pub fn new(
        channel_id: impl Into<String>,
        url: impl Into<String>,
        score: u32,
        buffer: Arc<SegmentBuffer>,
        token: CancellationToken,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            url: url.into(),
            score,
            buffer,
            live: AtomicBool::new(false),
            last_access: Mutex::new(Instant::now()),
            created_at: Utc::now(),
            token,
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Score the stream was admitted with.
    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn buffer(&self) -> &Arc<SegmentBuffer> {
        &self.buffer
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Set once the fetch task has buffered its first segment.
    pub fn mark_live(&self) {
        self.live.store(true, Ordering::Release);
    }

    /// Called when the fetch task exits: the stream stops being served and
    /// pending readers are released once the remaining bytes are drained.
    pub fn finish(&self) {
        self.live.store(false, Ordering::Release);
        self.token.cancel();
    }

    /// Live with unread bytes, i.e. worth handing to a player.
    pub fn is_servable(&self) -> bool {
        self.is_live() && !self.buffer.is_empty()
    }

    pub fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_access.lock().elapsed()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stops the fetch task at its next poll or network boundary.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Every unread byte, without consuming it.
    pub fn snapshot(&self) -> Bytes {
        self.touch();
        self.buffer.all_data()
    }

    /// Waits for buffered bytes and drains up to `max` of them.
    ///
    /// Returns `None` once the stream has been cancelled or has ended and
    /// everything buffered has been read.
    pub async fn next_chunk(&self, max: usize) -> Option<Bytes> {
        loop {
            if let Some(chunk) = self.buffer.read(max) {
                self.touch();
                return Some(chunk);
            }
            if self.token.is_cancelled() {
                return None;
            }
            tokio::select! {
                biased;
                _ = self.token.cancelled() => {}
                _ = self.buffer.wait_for_data() => {}
            }
        }
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            channel_id: self.channel_id.clone(),
            url: self.url.clone(),
            score: self.score,
            live: self.is_live(),
            buffered_bytes: self.buffer.len(),
            buffered_secs: self.buffer.buffered_duration().as_secs_f64(),
            segments: self.buffer.segment_count(),
            total_written: self.buffer.total_written(),
            idle_secs: self.idle_for().as_secs(),
            created_at: self.created_at,
        }
    }
}
