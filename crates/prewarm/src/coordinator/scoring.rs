// Candidate scoring for the buffering set.
//
// Pure: the coordinator gathers its inputs under the state lock, releases it and
// then calls into here, so selection can be tested without any fetch task.

use std::collections::HashSet;

use serde::Serialize;

pub const ADJACENT_SCORE: u32 = 100;
pub const PREDICTED_SCORES: [u32; 3] = [80, 70, 60];
pub const RECENT_BASE_SCORE: u32 = 60;
pub const FAVORITE_BASE_SCORE: u32 = 40;
pub const SCORE_STEP: u32 = 5;

/// Category a candidate qualified under. Earlier variants take priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    Adjacent,
    Predicted,
    Recent,
    Favorite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoredChannel {
    pub channel_id: String,
    pub score: u32,
    pub source: CandidateSource,
}

/// Everything the selection depends on.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoringInputs<'a> {
    pub active: Option<&'a str>,
    pub adjacent: &'a [String],
    /// Ranked predictor output, best first
    pub predicted: &'a [String],
    /// Most recent first
    pub recent: &'a [String],
    pub favorites: &'a [String],
}

fn predicted_score(rank: usize) -> u32 {
    PREDICTED_SCORES.get(rank).copied().unwrap_or_else(|| {
        let last = PREDICTED_SCORES[PREDICTED_SCORES.len() - 1];
        last.saturating_sub(10 * (rank + 1 - PREDICTED_SCORES.len()) as u32)
    })
}

fn stepped_score(base: u32, rank: usize) -> u32 {
    base.saturating_sub(SCORE_STEP.saturating_mul(rank as u32))
}

/// Scores every candidate, highest first. Ties keep category then list order.
pub fn score_candidates<'a>(inputs: &ScoringInputs<'a>) -> Vec<ScoredChannel> {
    let mut seen: HashSet<&'a str> = HashSet::new();
    if let Some(active) = inputs.active {
        seen.insert(active);
    }

    let mut scored = Vec::new();
    let mut push = |id: &'a str, score: u32, source: CandidateSource| {
        if id.is_empty() || !seen.insert(id) {
            return;
        }
        scored.push(ScoredChannel {
            channel_id: id.to_owned(),
            score,
            source,
        });
    };

    for id in inputs.adjacent {
        push(id.as_str(), ADJACENT_SCORE, CandidateSource::Adjacent);
    }
    for (rank, id) in inputs.predicted.iter().enumerate() {
        push(id.as_str(), predicted_score(rank), CandidateSource::Predicted);
    }
    // Rank among non-active entries so the first other channel scores the base.
    for (rank, id) in inputs
        .recent
        .iter()
        .filter(|id| Some(id.as_str()) != inputs.active)
        .enumerate()
    {
        push(id.as_str(), stepped_score(RECENT_BASE_SCORE, rank), CandidateSource::Recent);
    }
    for (rank, id) in inputs.favorites.iter().enumerate() {
        push(id.as_str(), stepped_score(FAVORITE_BASE_SCORE, rank), CandidateSource::Favorite);
    }

    // Stable sort keeps insertion order among equal scores.
    scored.sort_by(|a, b| b.score.cmp(&a.score));
    scored
}

/// The `max_cached` highest scored channels that should be buffered.
pub fn select_targets(inputs: &ScoringInputs<'_>, max_cached: usize) -> Vec<ScoredChannel> {
    let mut scored = score_candidates(inputs);
    scored.truncate(max_cached);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn ids(scored: &[ScoredChannel]) -> Vec<&str> {
        scored.iter().map(|s| s.channel_id.as_str()).collect()
    }

    #[test]
    fn adjacency_wins_over_prediction() {
        let adjacent = strings(&["X", "Y"]);
        let predicted = strings(&["Y", "Z"]);
        let inputs = ScoringInputs {
            active: Some("A"),
            adjacent: &adjacent,
            predicted: &predicted,
            ..Default::default()
        };

        let selected = select_targets(&inputs, 2);
        assert_eq!(ids(&selected), vec!["X", "Y"]);
        assert!(selected.iter().all(|s| s.score == ADJACENT_SCORE));
        assert_eq!(selected[1].source, CandidateSource::Adjacent);

        let all = score_candidates(&inputs);
        let z = all.iter().find(|s| s.channel_id == "Z").unwrap();
        assert_eq!(z.score, 70);
        assert_eq!(z.source, CandidateSource::Predicted);
    }

    #[test]
    fn active_channel_is_never_selected() {
        let adjacent = strings(&["A", "B"]);
        let recent = strings(&["A", "C"]);
        let favorites = strings(&["A"]);
        let inputs = ScoringInputs {
            active: Some("A"),
            adjacent: &adjacent,
            recent: &recent,
            favorites: &favorites,
            ..Default::default()
        };

        let selected = select_targets(&inputs, 10);
        assert_eq!(ids(&selected), vec!["B", "C"]);
        // The first non-active recent channel gets the full recent score.
        assert_eq!(selected[1].score, RECENT_BASE_SCORE);
    }

    #[test]
    fn category_scores_step_down() {
        let predicted = strings(&["p1", "p2", "p3"]);
        let recent = strings(&["r1", "r2", "r3"]);
        let favorites = strings(&["f1", "f2"]);
        let inputs = ScoringInputs {
            active: None,
            predicted: &predicted,
            recent: &recent,
            favorites: &favorites,
            ..Default::default()
        };

        let scored: Vec<_> = score_candidates(&inputs)
            .into_iter()
            .map(|s| (s.channel_id, s.score))
            .collect();
        assert_eq!(
            scored,
            vec![
                ("p1".to_string(), 80),
                ("p2".to_string(), 70),
                ("p3".to_string(), 60),
                ("r1".to_string(), 60),
                ("r2".to_string(), 55),
                ("r3".to_string(), 50),
                ("f1".to_string(), 40),
                ("f2".to_string(), 35),
            ]
        );
    }

    #[test]
    fn first_category_keeps_its_score() {
        let recent = strings(&["B"]);
        let favorites = strings(&["B", "C"]);
        let inputs = ScoringInputs {
            recent: &recent,
            favorites: &favorites,
            ..Default::default()
        };

        let scored = score_candidates(&inputs);
        assert_eq!(scored.len(), 2);
        assert_eq!(scored[0].source, CandidateSource::Recent);
        assert_eq!(scored[0].score, 60);
        // C is the second favorite even though B was claimed by recent.
        assert_eq!(scored[1].score, 35);
    }

    #[test]
    fn empty_ids_and_zero_capacity() {
        let adjacent = strings(&["", "B"]);
        let inputs = ScoringInputs {
            adjacent: &adjacent,
            ..Default::default()
        };
        assert_eq!(ids(&score_candidates(&inputs)), vec!["B"]);
        assert!(select_targets(&inputs, 0).is_empty());
    }

    #[test]
    fn extra_predictions_keep_descending() {
        assert_eq!(predicted_score(0), 80);
        assert_eq!(predicted_score(2), 60);
        assert_eq!(predicted_score(3), 50);
        assert_eq!(stepped_score(40, 20), 0);
    }
}
