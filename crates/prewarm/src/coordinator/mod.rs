// Pre-buffer Coordinator: decides which channels are buffered, owns their fetch
// tasks and hands cached streams to the serving layer.

mod events;
mod scoring;
mod stream;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::SegmentBuffer;
use crate::client::create_client;
use crate::config::PrebufferConfig;
use crate::error::Result;
use crate::fetcher::{ChannelIngest, HlsFetcher, SegmentSource};
use crate::predictor::{ChannelPredictor, PredictorStats};
use crate::resolver::{AdjacentChannelResolver, StreamUrlResolver};

pub use events::{EvictionReason, PrebufferEvent};
pub use scoring::{
    ADJACENT_SCORE, CandidateSource, FAVORITE_BASE_SCORE, PREDICTED_SCORES, RECENT_BASE_SCORE,
    SCORE_STEP, ScoredChannel, ScoringInputs, score_candidates, select_targets,
};
pub use stream::{CachedStream, StreamStats};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot returned by [`PrebufferCoordinator::stats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrebufferStats {
    pub active_channel: Option<String>,
    pub recent_channels: Vec<String>,
    pub favorites: Vec<String>,
    /// Highest score first
    pub streams: Vec<StreamStats>,
    pub total_buffered_bytes: usize,
    pub predictor: PredictorStats,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    active: Option<String>,
    /// Most recent first, no duplicates
    recent: VecDeque<String>,
    favorites: Vec<String>,
    streams: HashMap<String, Arc<CachedStream>>,
}

struct Inner {
    config: PrebufferConfig,
    state: RwLock<CoordinatorState>,
    predictor: Arc<ChannelPredictor>,
    source: Arc<dyn SegmentSource>,
    url_resolver: Arc<dyn StreamUrlResolver>,
    adjacency: RwLock<Option<Arc<dyn AdjacentChannelResolver>>>,
    token: CancellationToken,
    started: AtomicBool,
    /// Serializes recomputations so two diffs never interleave.
    recompute_lock: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    event_tx: broadcast::Sender<PrebufferEvent>,
}

/// Keeps the most likely next channels buffered while a viewer watches another one.
///
/// Cloning is cheap; all clones drive the same coordinator.
#[derive(Clone)]
pub struct PrebufferCoordinator {
    inner: Arc<Inner>,
}

impl PrebufferCoordinator {
    pub fn new(
        config: PrebufferConfig,
        predictor: Arc<ChannelPredictor>,
        source: Arc<dyn SegmentSource>,
        url_resolver: Arc<dyn StreamUrlResolver>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.coordinator.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                state: RwLock::new(CoordinatorState::default()),
                predictor,
                source,
                url_resolver,
                adjacency: RwLock::new(None),
                token: CancellationToken::new(),
                started: AtomicBool::new(false),
                recompute_lock: tokio::sync::Mutex::new(()),
                tasks: Mutex::new(Vec::new()),
                event_tx,
            }),
        }
    }

    /// Builds the HTTP fetcher and restores the persisted prediction model.
    pub async fn from_config(
        config: PrebufferConfig,
        url_resolver: Arc<dyn StreamUrlResolver>,
    ) -> Result<Self> {
        let client = create_client(&config.fetcher)?;
        let source: Arc<dyn SegmentSource> =
            Arc::new(HlsFetcher::new(client, config.fetcher.clone()));
        let predictor = Arc::new(ChannelPredictor::open(config.predictor.clone()).await);
        Ok(Self::new(config, predictor, source, url_resolver))
    }

    pub fn set_adjacency(&self, resolver: Arc<dyn AdjacentChannelResolver>) {
        *self.inner.adjacency.write() = Some(resolver);
    }

    pub fn config(&self) -> &PrebufferConfig {
        &self.inner.config
    }

    pub fn predictor(&self) -> &Arc<ChannelPredictor> {
        &self.inner.predictor
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PrebufferEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Starts the idle-stream sweep and the model persistence task.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let persistence = self
            .inner
            .predictor
            .spawn_persistence(self.inner.token.child_token());
        let maintenance = self.spawn_maintenance();
        self.track(persistence);
        self.track(maintenance);
        info!(
            max_cached = self.inner.config.coordinator.max_cached,
            buffer_capacity = self.inner.config.buffer.capacity,
            "Pre-buffer coordinator started"
        );
    }

    /// Reports that the viewer switched to `channel_id`.
    ///
    /// Records the transition, updates the recent list and recomputes the
    /// buffering set in the background. Must be called within a tokio runtime.
    pub fn set_active_channel(&self, channel_id: &str) {
        if channel_id.is_empty() || self.inner.token.is_cancelled() {
            return;
        }

        let (previous, active_stream) = {
            let mut state = self.inner.state.write();
            if state.active.as_deref() == Some(channel_id) {
                return;
            }
            let previous = state.active.replace(channel_id.to_owned());
            state.recent.retain(|id| id != channel_id);
            state.recent.push_front(channel_id.to_owned());
            state
                .recent
                .truncate(self.inner.config.coordinator.recent_limit);
            (previous, state.streams.get(channel_id).cloned())
        };

        self.inner
            .predictor
            .record_switch(previous.as_deref().unwrap_or_default(), channel_id);
        if let Some(stream) = active_stream {
            stream.touch();
        }

        info!(
            previous = previous.as_deref().unwrap_or("-"),
            current = channel_id,
            "Active channel changed"
        );
        self.emit(PrebufferEvent::ActiveChannelChanged {
            previous,
            current: channel_id.to_owned(),
        });
        self.spawn_recompute();
    }

    pub fn active_channel(&self) -> Option<String> {
        self.inner.state.read().active.clone()
    }

    /// Replaces the favorites list and recomputes in the background.
    pub fn set_favorites(&self, channel_ids: Vec<String>) {
        {
            let mut state = self.inner.state.write();
            let mut seen = HashSet::new();
            state.favorites = channel_ids
                .into_iter()
                .filter(|id| !id.is_empty() && seen.insert(id.clone()))
                .collect();
            debug!(count = state.favorites.len(), "Favorites updated");
        }
        self.spawn_recompute();
    }

    /// Returns the cached stream for `channel_id` if it is live and has buffered data.
    pub fn get_cached_stream(&self, channel_id: &str) -> Option<Arc<CachedStream>> {
        let stream = self.inner.state.read().streams.get(channel_id).cloned()?;
        if !stream.is_servable() {
            debug!(
                channel = channel_id,
                live = stream.is_live(),
                buffered = stream.buffer().len(),
                "Cached stream not ready"
            );
            return None;
        }
        stream.touch();
        Some(stream)
    }

    /// Channel ids that currently have a cached stream, in no particular order.
    pub fn cached_channels(&self) -> Vec<String> {
        self.inner.state.read().streams.keys().cloned().collect()
    }

    /// Stops and discards the cached stream of `channel_id`. Absent channels are a no-op.
    pub fn evict(&self, channel_id: &str) -> bool {
        let removed = self.inner.state.write().streams.remove(channel_id);
        match removed {
            Some(stream) => {
                self.discard(&stream, EvictionReason::Requested);
                true
            }
            None => false,
        }
    }

    /// Re-scores every candidate and starts or stops fetch tasks to match.
    ///
    /// Returns the selected channels, highest score first.
    pub async fn recompute(&self) -> Vec<ScoredChannel> {
        let _guard = self.inner.recompute_lock.lock().await;
        if self.inner.token.is_cancelled() {
            return Vec::new();
        }

        let coordinator = &self.inner.config.coordinator;
        let (active, recent, favorites) = {
            let state = self.inner.state.read();
            (
                state.active.clone(),
                state.recent.iter().cloned().collect::<Vec<_>>(),
                state.favorites.clone(),
            )
        };

        let adjacency = self.inner.adjacency.read().clone();
        let adjacent = match (&adjacency, &active) {
            (Some(resolver), Some(active)) => resolver.adjacent(active),
            _ => Vec::new(),
        };
        let predictions = match &active {
            Some(active) => self
                .inner
                .predictor
                .predict_next(active, coordinator.predicted_candidates),
            None => self
                .inner
                .predictor
                .popular_channels(coordinator.predicted_candidates),
        };
        let predicted: Vec<String> = predictions.into_iter().map(|p| p.channel_id).collect();

        let selected = select_targets(
            &ScoringInputs {
                active: active.as_deref(),
                adjacent: &adjacent,
                predicted: &predicted,
                recent: &recent,
                favorites: &favorites,
            },
            coordinator.max_cached,
        );

        let wanted: HashSet<&str> = selected.iter().map(|s| s.channel_id.as_str()).collect();
        let (dropped, ended) = {
            let mut state = self.inner.state.write();
            let active = state.active.clone();
            let mut dropped = Vec::new();
            let mut ended = Vec::new();
            state.streams.retain(|id, stream| {
                if stream.is_cancelled() {
                    ended.push(Arc::clone(stream));
                    false
                } else if wanted.contains(id.as_str()) || active.as_deref() == Some(id.as_str()) {
                    true
                } else {
                    dropped.push(Arc::clone(stream));
                    false
                }
            });
            (dropped, ended)
        };
        for stream in &ended {
            self.discard(stream, EvictionReason::Ended);
        }
        for stream in &dropped {
            self.discard(stream, EvictionReason::NotSelected);
        }

        for target in &selected {
            if self.inner.state.read().streams.contains_key(&target.channel_id) {
                continue;
            }
            let url = match self.inner.url_resolver.resolve(&target.channel_id).await {
                Some(url) if !url.trim().is_empty() => url,
                _ => {
                    debug!(channel = %target.channel_id, "No stream URL, skipping");
                    continue;
                }
            };
            self.admit(target, url);
        }

        debug!(
            active = active.as_deref().unwrap_or("-"),
            selected = ?selected.iter().map(|s| (&s.channel_id, s.score)).collect::<Vec<_>>(),
            "Recomputed buffering set"
        );
        selected
    }

    pub fn stats(&self) -> PrebufferStats {
        let state = self.inner.state.read();
        let mut streams: Vec<StreamStats> = state.streams.values().map(|s| s.stats()).collect();
        streams.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.channel_id.cmp(&b.channel_id))
        });
        PrebufferStats {
            active_channel: state.active.clone(),
            recent_channels: state.recent.iter().cloned().collect(),
            favorites: state.favorites.clone(),
            total_buffered_bytes: streams.iter().map(|s| s.buffered_bytes).sum(),
            streams,
            predictor: self.inner.predictor.stats(),
        }
    }

    /// Cancels every task, clears the cache and persists the prediction model.
    pub async fn stop(&self) {
        if self.inner.token.is_cancelled() {
            return;
        }
        info!("Stopping pre-buffer coordinator");
        self.inner.token.cancel();

        let streams: Vec<_> = {
            let mut state = self.inner.state.write();
            state.streams.drain().map(|(_, stream)| stream).collect()
        };
        for stream in &streams {
            self.discard(stream, EvictionReason::Shutdown);
        }

        let handles = std::mem::take(&mut *self.inner.tasks.lock());
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!("Timed out waiting for pre-buffer tasks to exit");
        }

        if let Err(e) = self.inner.predictor.save().await {
            warn!(error = %e, "Failed to persist prediction model on shutdown");
        }
        info!("Pre-buffer coordinator stopped");
    }

    fn admit(&self, target: &ScoredChannel, url: String) {
        let config = &self.inner.config;
        let token = self.inner.token.child_token();
        let buffer = Arc::new(SegmentBuffer::with_config(&config.buffer));
        let stream = Arc::new(CachedStream::new(
            target.channel_id.clone(),
            url.clone(),
            target.score,
            Arc::clone(&buffer),
            token.clone(),
        ));

        {
            let mut state = self.inner.state.write();
            // The viewer may have switched or the coordinator stopped while the URL resolved.
            if self.inner.token.is_cancelled()
                || state.active.as_deref() == Some(target.channel_id.as_str())
                || state.streams.contains_key(&target.channel_id)
            {
                return;
            }
            state
                .streams
                .insert(target.channel_id.clone(), Arc::clone(&stream));
        }

        let ingest = ChannelIngest::new(
            target.channel_id.clone(),
            url.clone(),
            Arc::clone(&self.inner.source),
            buffer,
            config.fetcher.poll_interval,
        )
        .with_initial_segments(config.fetcher.initial_segments);

        let handle = tokio::spawn(async move {
            ingest.run(token, |_| stream.mark_live()).await;
            stream.finish();
        });
        self.track(handle);

        info!(
            channel = %target.channel_id,
            score = target.score,
            source = ?target.source,
            url = %url,
            "Started pre-buffering"
        );
        self.emit(PrebufferEvent::StreamStarted {
            channel_id: target.channel_id.clone(),
            url,
            score: target.score,
        });
    }

    fn discard(&self, stream: &CachedStream, reason: EvictionReason) {
        stream.cancel();
        stream.buffer().clear();
        info!(channel = %stream.channel_id(), reason = %reason, "Evicted cached stream");
        self.emit(PrebufferEvent::StreamEvicted {
            channel_id: stream.channel_id().to_owned(),
            reason,
        });
    }

    fn spawn_recompute(&self) {
        let coordinator = self.clone();
        let handle = tokio::spawn(async move {
            coordinator.recompute().await;
        });
        self.track(handle);
    }

    fn spawn_maintenance(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        let token = self.inner.token.child_token();
        let period = self.inner.config.coordinator.maintenance_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        coordinator.evict_idle();
                    }
                }
            }
            debug!("Pre-buffer maintenance task finished");
        })
    }

    /// Evicts non-active streams not accessed within the idle timeout, and
    /// streams whose fetch task has ended.
    fn evict_idle(&self) -> usize {
        let idle_timeout = self.inner.config.coordinator.idle_timeout;
        let evicted: Vec<_> = {
            let mut state = self.inner.state.write();
            let active = state.active.clone();
            let mut evicted = Vec::new();
            state.streams.retain(|id, stream| {
                if active.as_deref() == Some(id.as_str()) {
                    return true;
                }
                let reason = if stream.is_cancelled() {
                    EvictionReason::Ended
                } else if stream.idle_for() > idle_timeout {
                    EvictionReason::Idle
                } else {
                    return true;
                };
                evicted.push((Arc::clone(stream), reason));
                false
            });
            evicted
        };
        for (stream, reason) in &evicted {
            self.discard(stream, *reason);
        }
        evicted.len()
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.inner.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    fn emit(&self, event: PrebufferEvent) {
        // No subscribers is fine.
        let _ = self.inner.event_tx.send(event);
    }
}
