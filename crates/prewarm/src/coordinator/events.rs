use serde::Serialize;

/// Why a cached stream was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// No longer among the highest scored candidates
    NotSelected,
    /// Not accessed within the idle timeout
    Idle,
    /// The fetch task stopped on its own (playlist ended)
    Ended,
    /// Removed through [`PrebufferCoordinator::evict`](super::PrebufferCoordinator::evict)
    Requested,
    /// The coordinator is shutting down
    Shutdown,
}

impl EvictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotSelected => "not_selected",
            Self::Idle => "idle",
            Self::Ended => "ended",
            Self::Requested => "requested",
            Self::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle notifications broadcast by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PrebufferEvent {
    /// A fetch task was started for a channel.
    StreamStarted {
        channel_id: String,
        url: String,
        score: u32,
    },
    /// A cached stream was cancelled and its buffer discarded.
    StreamEvicted {
        channel_id: String,
        reason: EvictionReason,
    },
    /// The viewer switched channels.
    ActiveChannelChanged {
        previous: Option<String>,
        current: String,
    },
}

impl PrebufferEvent {
    pub fn channel_id(&self) -> &str {
        match self {
            Self::StreamStarted { channel_id, .. } | Self::StreamEvicted { channel_id, .. } => {
                channel_id
            }
            Self::ActiveChannelChanged { current, .. } => current,
        }
    }
}
