// Channel Predictor: learns which channels a viewer switches to and ranks likely next channels.
//
// Two signals are learned online: direct channel-to-channel transitions and
// per-hour-of-day viewing popularity. Weights decay slowly and every map is
// size-capped so the model stays bounded over long uptimes.

mod store;

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Local, Timelike, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PredictorConfig;
use crate::error::Result;

pub use store::{MODEL_FILE_NAME, ModelStore};

const TRANSITION_WEIGHT: f64 = 100.0;
const CURRENT_HOUR_WEIGHT: f64 = 30.0;
const ADJACENT_HOUR_WEIGHT: f64 = 10.0;

/// Learned switching behaviour.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionModel {
    /// from channel -> (to channel -> weight)
    pub transitions: HashMap<String, HashMap<String, f64>>,
    /// hour of day (0-23) -> (channel -> weight)
    pub hourly_popularity: BTreeMap<u32, HashMap<String, f64>>,
}

impl TransitionModel {
    fn hour_share(&self, hour: u32, channel: &str) -> f64 {
        let Some(counts) = self.hourly_popularity.get(&hour) else {
            return 0.0;
        };
        let total: f64 = counts.values().sum();
        if total <= 0.0 {
            return 0.0;
        }
        counts.get(channel).copied().unwrap_or(0.0) / total
    }

    fn hour_weight(&self, hour: u32, channel: &str) -> f64 {
        self.hourly_popularity
            .get(&hour)
            .and_then(|counts| counts.get(channel))
            .copied()
            .unwrap_or(0.0)
    }
}

/// A ranked candidate channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub channel_id: String,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PredictorStats {
    pub source_channels: usize,
    pub transitions: usize,
    pub hourly_entries: usize,
    pub last_loaded: Option<DateTime<Utc>>,
}

pub fn current_hour() -> u32 {
    Local::now().hour()
}

fn previous_hour(hour: u32) -> u32 {
    (hour + 23) % 24
}

fn next_hour(hour: u32) -> u32 {
    (hour + 1) % 24
}

fn rank(mut scored: Vec<Prediction>, n: usize) -> Vec<Prediction> {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(CmpOrdering::Equal)
            .then_with(|| a.channel_id.cmp(&b.channel_id))
    });
    scored.truncate(n);
    scored
}

/// Increments `key` in `counts`, evicting the lightest other entry once `cap` is exceeded.
fn bump(counts: &mut HashMap<String, f64>, key: &str, cap: usize) {
    *counts.entry(key.to_owned()).or_insert(0.0) += 1.0;
    if counts.len() > cap.max(1) {
        let lightest = counts
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(CmpOrdering::Equal))
            .map(|(k, _)| k.clone());
        if let Some(lightest) = lightest {
            counts.remove(&lightest);
        }
    }
}

fn decay_counts(counts: &mut HashMap<String, f64>, factor: f64, floor: f64) {
    counts.retain(|_, weight| {
        *weight *= factor;
        *weight >= floor
    });
}

/// Online-learned ranking of likely next channels.
pub struct ChannelPredictor {
    config: PredictorConfig,
    model: RwLock<TransitionModel>,
    store: Option<ModelStore>,
    dirty: AtomicBool,
    last_loaded: RwLock<Option<DateTime<Utc>>>,
}

impl ChannelPredictor {
    /// Creates an empty predictor. Call [`load`](Self::load) to restore a persisted model.
    pub fn new(config: PredictorConfig) -> Self {
        let store = config.data_dir.as_ref().map(ModelStore::new);
        Self {
            config,
            model: RwLock::new(TransitionModel::default()),
            store,
            dirty: AtomicBool::new(false),
            last_loaded: RwLock::new(None),
        }
    }

    /// Creates a predictor and restores the persisted model if one exists.
    pub async fn open(config: PredictorConfig) -> Self {
        let predictor = Self::new(config);
        predictor.load().await;
        predictor
    }

    pub fn record_switch(&self, from: &str, to: &str) {
        self.record_switch_at(from, to, current_hour());
    }

    /// Records a switch as if it happened during `hour`.
    ///
    /// An empty `from` only counts towards popularity. Self-switches are counted like any
    /// other transition; [`predict_next`](Self::predict_next) never ranks the current channel.
    pub fn record_switch_at(&self, from: &str, to: &str, hour: u32) {
        if to.is_empty() {
            return;
        }
        let hour = hour % 24;

        {
            let mut model = self.model.write();
            if !from.is_empty() {
                let targets = model.transitions.entry(from.to_owned()).or_default();
                bump(targets, to, self.config.max_targets_per_channel);
            }
            let popularity = model.hourly_popularity.entry(hour).or_default();
            bump(popularity, to, self.config.max_channels_per_hour);
        }
        self.dirty.store(true, Ordering::Relaxed);
        debug!(from = from, to = to, hour = hour, "Recorded channel switch");
    }

    pub fn predict_next(&self, current: &str, n: usize) -> Vec<Prediction> {
        self.predict_next_at(current, n, current_hour())
    }

    /// Ranks up to `n` channels likely to follow `current`, highest score first.
    ///
    /// score = 100 * P(to | current) + 30 * share(hour) + 10 * share(hour - 1) + 10 * share(hour + 1)
    pub fn predict_next_at(&self, current: &str, n: usize, hour: u32) -> Vec<Prediction> {
        if n == 0 {
            return Vec::new();
        }
        let hour = hour % 24;
        let (prev, next) = (previous_hour(hour), next_hour(hour));
        let model = self.model.read();

        let transitions = model.transitions.get(current);
        let total_from: f64 = transitions.map(|t| t.values().sum()).unwrap_or(0.0);

        let mut candidates: HashSet<&str> = HashSet::new();
        if let Some(targets) = transitions {
            candidates.extend(targets.keys().map(String::as_str));
        }
        for h in [prev, hour, next] {
            if let Some(counts) = model.hourly_popularity.get(&h) {
                candidates.extend(counts.keys().map(String::as_str));
            }
        }
        candidates.remove(current);

        let scored = candidates
            .into_iter()
            .map(|channel| {
                let mut score = 0.0;
                if total_from > 0.0
                    && let Some(count) = transitions.and_then(|t| t.get(channel))
                {
                    score += TRANSITION_WEIGHT * count / total_from;
                }
                score += CURRENT_HOUR_WEIGHT * model.hour_share(hour, channel);
                score += ADJACENT_HOUR_WEIGHT * model.hour_share(prev, channel);
                score += ADJACENT_HOUR_WEIGHT * model.hour_share(next, channel);
                Prediction {
                    channel_id: channel.to_owned(),
                    score,
                }
            })
            .filter(|p| p.score > 0.0)
            .collect();

        rank(scored, n)
    }

    pub fn popular_channels(&self, n: usize) -> Vec<Prediction> {
        self.popular_channels_at(n, current_hour())
    }

    /// Ranks channels by viewing weight around `hour` (previous : current : next = 1 : 3 : 1).
    pub fn popular_channels_at(&self, n: usize, hour: u32) -> Vec<Prediction> {
        let hour = hour % 24;
        let (prev, next) = (previous_hour(hour), next_hour(hour));
        let model = self.model.read();

        let mut candidates: HashSet<&str> = HashSet::new();
        for h in [prev, hour, next] {
            if let Some(counts) = model.hourly_popularity.get(&h) {
                candidates.extend(counts.keys().map(String::as_str));
            }
        }

        let scored = candidates
            .into_iter()
            .map(|channel| Prediction {
                channel_id: channel.to_owned(),
                score: 3.0 * model.hour_weight(hour, channel)
                    + model.hour_weight(prev, channel)
                    + model.hour_weight(next, channel),
            })
            .collect();

        rank(scored, n)
    }

    /// Empirical P(to | from); 0 when `from` was never observed.
    pub fn transition_probability(&self, from: &str, to: &str) -> f64 {
        let model = self.model.read();
        let Some(targets) = model.transitions.get(from) else {
            return 0.0;
        };
        let total: f64 = targets.values().sum();
        if total <= 0.0 {
            return 0.0;
        }
        targets.get(to).copied().unwrap_or(0.0) / total
    }

    /// Multiplies every weight by the configured factor and drops negligible entries.
    ///
    /// Returns whether the model changed.
    pub fn decay(&self) -> bool {
        let factor = self.config.decay_factor;
        if !(0.0..1.0).contains(&factor) {
            return false;
        }
        let floor = self.config.min_weight;

        let mut model = self.model.write();
        if model.transitions.is_empty() && model.hourly_popularity.is_empty() {
            return false;
        }
        for targets in model.transitions.values_mut() {
            decay_counts(targets, factor, floor);
        }
        model.transitions.retain(|_, targets| !targets.is_empty());
        for counts in model.hourly_popularity.values_mut() {
            decay_counts(counts, factor, floor);
        }
        model.hourly_popularity.retain(|_, counts| !counts.is_empty());
        drop(model);

        self.dirty.store(true, Ordering::Relaxed);
        true
    }

    pub fn snapshot(&self) -> TransitionModel {
        self.model.read().clone()
    }

    pub fn stats(&self) -> PredictorStats {
        let model = self.model.read();
        PredictorStats {
            source_channels: model.transitions.len(),
            transitions: model.transitions.values().map(HashMap::len).sum(),
            hourly_entries: model.hourly_popularity.values().map(HashMap::len).sum(),
            last_loaded: *self.last_loaded.read(),
        }
    }

    /// Persists the model. A predictor without a data directory saves nothing.
    pub async fn save(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        self.dirty.store(false, Ordering::Relaxed);
        let snapshot = self.snapshot();
        if let Err(e) = store.save(&snapshot).await {
            self.dirty.store(true, Ordering::Relaxed);
            return Err(e);
        }
        Ok(())
    }

    /// Restores the persisted model. Missing or unreadable documents leave an empty model.
    ///
    /// Returns whether a model was loaded.
    pub async fn load(&self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match store.load().await {
            Ok(Some((model, last_updated))) => {
                *self.model.write() = model;
                *self.last_loaded.write() = Some(last_updated);
                self.dirty.store(false, Ordering::Relaxed);
                info!(
                    path = %store.path().display(),
                    last_updated = %last_updated,
                    "Restored channel prediction model"
                );
                true
            }
            Ok(None) => {
                debug!(path = %store.path().display(), "No persisted prediction model");
                false
            }
            Err(e) => {
                warn!(
                    path = %store.path().display(),
                    error = %e,
                    "Failed to load prediction model, starting empty"
                );
                false
            }
        }
    }

    /// Resets the in-memory model and deletes the persisted document.
    pub async fn clear(&self) -> Result<()> {
        *self.model.write() = TransitionModel::default();
        *self.last_loaded.write() = None;
        self.dirty.store(false, Ordering::Relaxed);
        if let Some(store) = &self.store {
            store.remove().await?;
        }
        Ok(())
    }

    /// Spawns the periodic decay + save task. A final save runs on cancellation.
    ///
    /// Ticks without a recorded switch since the last save leave the model and its
    /// document untouched.
    pub fn spawn_persistence(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let predictor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(predictor.config.save_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if predictor.dirty.load(Ordering::Relaxed) {
                            predictor.decay();
                            predictor.save_if_dirty().await;
                        }
                    }
                }
            }

            predictor.save_if_dirty().await;
            debug!("Prediction persistence task finished");
        })
    }

    async fn save_if_dirty(&self) {
        if !self.dirty.load(Ordering::Relaxed) {
            return;
        }
        if let Err(e) = self.save().await {
            warn!(error = %e, "Failed to persist prediction model");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn predictor() -> ChannelPredictor {
        ChannelPredictor::new(PredictorConfig::default())
    }

    fn ids(predictions: &[Prediction]) -> Vec<&str> {
        predictions.iter().map(|p| p.channel_id.as_str()).collect()
    }

    #[test]
    fn most_frequent_transition_ranks_first() {
        let p = predictor();
        for _ in 0..3 {
            p.record_switch_at("A", "B", 20);
        }
        p.record_switch_at("A", "C", 20);

        let next = p.predict_next_at("A", 2, 20);
        assert_eq!(ids(&next), vec!["B", "C"]);
        assert!(next[0].score > next[1].score);
    }

    #[test]
    fn predictions_exclude_current_and_respect_limit() {
        let p = predictor();
        p.record_switch_at("B", "A", 9);
        p.record_switch_at("A", "B", 9);
        p.record_switch_at("A", "C", 9);
        p.record_switch_at("A", "D", 9);

        let next = p.predict_next_at("A", 2, 9);
        assert_eq!(next.len(), 2);
        assert!(next.iter().all(|p| p.channel_id != "A"));
        assert!(p.predict_next_at("A", 0, 9).is_empty());
    }

    #[test]
    fn score_combines_transition_and_hourly_signals() {
        let p = predictor();
        p.record_switch_at("A", "B", 10);
        // Popularity only, in the adjacent hour.
        p.record_switch_at("", "Z", 11);

        let next = p.predict_next_at("A", 5, 10);
        // B: 100 * 1/1 + 30 * 1/1
        assert_eq!(next[0].channel_id, "B");
        assert!((next[0].score - 130.0).abs() < 1e-9);
        // Z: 10 * 1/1 from hour 11
        assert_eq!(next[1].channel_id, "Z");
        assert!((next[1].score - 10.0).abs() < 1e-9);
    }

    #[test]
    fn hour_wraps_around_midnight() {
        let p = predictor();
        p.record_switch_at("", "late", 23);
        let next = p.predict_next_at("A", 3, 0);
        assert_eq!(ids(&next), vec!["late"]);
    }

    #[test]
    fn unobserved_transition_probability_is_zero() {
        let p = predictor();
        assert_eq!(p.transition_probability("X", "Y"), 0.0);
        p.record_switch_at("X", "Y", 1);
        assert_eq!(p.transition_probability("X", "Z"), 0.0);
        assert_eq!(p.transition_probability("X", "Y"), 1.0);
    }

    #[test]
    fn self_switches_count_towards_probability() {
        let p = predictor();
        p.record_switch_at("A", "A", 1);
        p.record_switch_at("A", "A", 1);
        p.record_switch_at("A", "B", 1);

        assert!((p.transition_probability("A", "B") - 1.0 / 3.0).abs() < 1e-9);
        assert!((p.transition_probability("A", "A") - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(ids(&p.predict_next_at("A", 5, 1)), vec!["B"]);
    }

    #[test]
    fn popular_channels_weight_current_hour_triple() {
        let p = predictor();
        // "cur" seen once at hour 12, "side" seen twice at hour 11.
        p.record_switch_at("", "cur", 12);
        p.record_switch_at("", "side", 11);
        p.record_switch_at("", "side", 11);
        p.record_switch_at("", "far", 3);

        let popular = p.popular_channels_at(5, 12);
        assert_eq!(ids(&popular), vec!["cur", "side"]);
        assert_eq!(popular[0].score, 3.0);
        assert_eq!(popular[1].score, 2.0);
    }

    #[test]
    fn targets_per_channel_are_capped() {
        let config = PredictorConfig {
            max_targets_per_channel: 2,
            ..Default::default()
        };
        let p = ChannelPredictor::new(config);
        p.record_switch_at("A", "B", 1);
        p.record_switch_at("A", "B", 1);
        p.record_switch_at("A", "C", 1);
        p.record_switch_at("A", "D", 1);

        let model = p.snapshot();
        let targets = &model.transitions["A"];
        assert_eq!(targets.len(), 2);
        assert!(targets.contains_key("B"));
        assert!(targets.contains_key("D"));
    }

    #[test]
    fn decay_shrinks_and_prunes_weights() {
        let config = PredictorConfig {
            decay_factor: 0.5,
            min_weight: 0.3,
            ..Default::default()
        };
        let p = ChannelPredictor::new(config);
        p.record_switch_at("A", "B", 1);
        p.record_switch_at("A", "B", 1);
        p.record_switch_at("A", "C", 1);

        p.decay();
        let model = p.snapshot();
        assert_eq!(model.transitions["A"]["B"], 1.0);
        assert_eq!(model.transitions["A"]["C"], 0.5);

        p.decay();
        let model = p.snapshot();
        assert!(!model.transitions["A"].contains_key("C"));
        assert_eq!(model.transitions["A"]["B"], 0.5);

        p.decay();
        let model = p.snapshot();
        assert!(model.transitions.is_empty());
        assert!(model.hourly_popularity.is_empty());
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = PredictorConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let p = ChannelPredictor::new(config.clone());
        p.record_switch_at("1", "2", 7);
        p.record_switch_at("1", "3", 7);
        p.save().await.unwrap();

        let restored = ChannelPredictor::open(config).await;
        assert_eq!(restored.snapshot(), p.snapshot());
        assert_eq!(restored.transition_probability("1", "2"), 0.5);
        assert!(restored.stats().last_loaded.is_some());
    }

    #[tokio::test]
    async fn corrupt_document_degrades_to_empty_model() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(MODEL_FILE_NAME), b"\x00garbage")
            .await
            .unwrap();
        let config = PredictorConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let p = ChannelPredictor::new(config);
        assert!(!p.load().await);
        assert_eq!(p.stats().source_channels, 0);

        // The model keeps learning and can overwrite the corrupt file.
        p.record_switch_at("a", "b", 0);
        p.save().await.unwrap();
        assert!(p.load().await);
    }

    #[tokio::test]
    async fn clear_removes_document() {
        let dir = tempfile::tempdir().unwrap();
        let config = PredictorConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let p = ChannelPredictor::new(config);
        p.record_switch_at("a", "b", 0);
        p.save().await.unwrap();
        assert!(dir.path().join(MODEL_FILE_NAME).exists());

        p.clear().await.unwrap();
        assert!(!dir.path().join(MODEL_FILE_NAME).exists());
        assert_eq!(p.transition_probability("a", "b"), 0.0);
    }

    #[tokio::test]
    async fn persistence_task_saves_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let config = PredictorConfig {
            data_dir: Some(dir.path().to_path_buf()),
            save_interval: std::time::Duration::from_secs(3600),
            ..Default::default()
        };
        let p = Arc::new(ChannelPredictor::new(config));
        let token = CancellationToken::new();
        let handle = p.spawn_persistence(token.clone());

        p.record_switch_at("x", "y", 5);
        token.cancel();
        handle.await.unwrap();

        assert!(dir.path().join(MODEL_FILE_NAME).exists());
    }

    #[test]
    fn decay_of_empty_model_is_not_a_change() {
        let p = predictor();
        assert!(!p.decay());
        assert!(!p.dirty.load(Ordering::Relaxed));

        p.record_switch_at("a", "b", 3);
        assert!(p.decay());
    }

    #[tokio::test]
    async fn unchanged_model_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let config = PredictorConfig {
            data_dir: Some(dir.path().to_path_buf()),
            save_interval: std::time::Duration::from_millis(10),
            ..Default::default()
        };
        let path = dir.path().join(MODEL_FILE_NAME);
        let p = Arc::new(ChannelPredictor::new(config));
        let token = CancellationToken::new();
        let handle = p.spawn_persistence(token.clone());

        p.record_switch_at("x", "y", 5);
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !path.exists() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("model should be saved after a recorded switch");

        // Let the in-flight save finish, then check idle ticks leave the document alone.
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        tokio::fs::remove_file(&path).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        assert!(!path.exists());

        token.cancel();
        handle.await.unwrap();
        assert!(!path.exists());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// The reported probability always equals the observed from->to share.
        #[test]
        fn prop_transition_probability_matches_counts(
            switches in prop::collection::vec((0u8..4, 0u8..4), 0..60),
        ) {
            let p = predictor();
            let mut counts: HashMap<(u8, u8), f64> = HashMap::new();
            for (from, to) in &switches {
                p.record_switch_at(&from.to_string(), &to.to_string(), 12);
                *counts.entry((*from, *to)).or_default() += 1.0;
            }

            for from in 0u8..4 {
                let total: f64 = counts.iter().filter(|((f, _), _)| *f == from).map(|(_, c)| c).sum();
                for to in 0u8..4 {
                    let expected = if total == 0.0 {
                        0.0
                    } else {
                        counts.get(&(from, to)).copied().unwrap_or(0.0) / total
                    };
                    let actual = p.transition_probability(&from.to_string(), &to.to_string());
                    prop_assert!((actual - expected).abs() < 1e-9);
                }
            }
        }

        /// Predictions never contain the current channel, are bounded, and sorted.
        #[test]
        fn prop_predictions_sorted_and_bounded(
            switches in prop::collection::vec((0u8..6, 0u8..6, 0u32..24), 0..80),
            current in 0u8..6,
            n in 0usize..8,
            hour in 0u32..24,
        ) {
            let p = predictor();
            for (from, to, h) in &switches {
                p.record_switch_at(&from.to_string(), &to.to_string(), *h);
            }
            let current = current.to_string();
            let next = p.predict_next_at(&current, n, hour);
            prop_assert!(next.len() <= n);
            prop_assert!(next.iter().all(|p| p.channel_id != current));
            prop_assert!(next.windows(2).all(|w| w[0].score >= w[1].score));
        }
    }
}
