// Host-supplied collaborators: channel id -> manifest URL, channel id -> neighbours.

use std::collections::HashMap;

use async_trait::async_trait;

/// Resolves a channel id to its current playable manifest URL.
#[async_trait]
pub trait StreamUrlResolver: Send + Sync {
    /// `None` (or an empty string) means the channel should not be buffered now.
    async fn resolve(&self, channel_id: &str) -> Option<String>;
}

/// Channel-number neighbours used to prioritise likely next channels.
pub trait AdjacentChannelResolver: Send + Sync {
    fn adjacent(&self, channel_id: &str) -> Vec<String>;
}

impl<F> AdjacentChannelResolver for F
where
    F: Fn(&str) -> Vec<String> + Send + Sync,
{
    fn adjacent(&self, channel_id: &str) -> Vec<String> {
        self(channel_id)
    }
}

/// Fixed channel id -> URL table.
#[derive(Debug, Clone, Default)]
pub struct StaticUrlResolver {
    urls: HashMap<String, String>,
}

impl StaticUrlResolver {
    pub fn new(urls: HashMap<String, String>) -> Self {
        Self { urls }
    }

    pub fn insert(&mut self, channel_id: impl Into<String>, url: impl Into<String>) {
        self.urls.insert(channel_id.into(), url.into());
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

impl FromIterator<(String, String)> for StaticUrlResolver {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[async_trait]
impl StreamUrlResolver for StaticUrlResolver {
    async fn resolve(&self, channel_id: &str) -> Option<String> {
        self.urls
            .get(channel_id)
            .filter(|url| !url.trim().is_empty())
            .cloned()
    }
}

/// Neighbours within `radius` positions of a channel in a fixed lineup,
/// nearest first (`+1, -1, +2, -2, ...`).
#[derive(Debug, Clone)]
pub struct NumericAdjacency {
    lineup: Vec<String>,
    radius: usize,
    wrap: bool,
}

impl NumericAdjacency {
    /// Uses `lineup` in the given order.
    pub fn new(lineup: Vec<String>, radius: usize) -> Self {
        Self {
            lineup,
            radius,
            wrap: false,
        }
    }

    /// Orders `channels` by channel number. Non-numeric ids sort after numeric ones.
    pub fn sorted(channels: impl IntoIterator<Item = String>, radius: usize) -> Self {
        let mut lineup: Vec<String> = channels.into_iter().collect();
        lineup.sort_by(|a, b| match (a.parse::<u64>(), b.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            (Ok(_), Err(_)) => std::cmp::Ordering::Less,
            (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
            (Err(_), Err(_)) => a.cmp(b),
        });
        lineup.dedup();
        Self::new(lineup, radius)
    }

    /// Channel up from the last channel lands on the first one.
    pub fn with_wrap(mut self, wrap: bool) -> Self {
        self.wrap = wrap;
        self
    }

    pub fn lineup(&self) -> &[String] {
        &self.lineup
    }
}

impl AdjacentChannelResolver for NumericAdjacency {
    fn adjacent(&self, channel_id: &str) -> Vec<String> {
        let Some(position) = self.lineup.iter().position(|id| id == channel_id) else {
            return Vec::new();
        };
        let len = self.lineup.len() as isize;
        let position = position as isize;

        let mut neighbours = Vec::with_capacity(self.radius * 2);
        for distance in 1..=self.radius as isize {
            for index in [position + distance, position - distance] {
                let index = if self.wrap {
                    index.rem_euclid(len)
                } else if (0..len).contains(&index) {
                    index
                } else {
                    continue;
                };
                let id = &self.lineup[index as usize];
                if id != channel_id && !neighbours.contains(id) {
                    neighbours.push(id.clone());
                }
            }
        }
        neighbours
    }
}
