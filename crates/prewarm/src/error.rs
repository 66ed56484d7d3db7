use reqwest::StatusCode;

pub type Result<T, E = PrebufferError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum PrebufferError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("playlist error: {reason}")]
    Playlist { reason: String },

    #[error("response of {received} bytes from {url} does not cover byte range ending at {end}")]
    IncompleteBody {
        url: String,
        end: u64,
        received: usize,
    },

    #[error("segment of {size} bytes exceeds buffer capacity of {capacity} bytes")]
    SegmentTooLarge { size: usize, capacity: usize },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("persistence error: {reason}")]
    Persistence { reason: String },
}

impl PrebufferError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn playlist(reason: impl Into<String>) -> Self {
        Self::Playlist {
            reason: reason.into(),
        }
    }

    pub fn persistence(reason: impl Into<String>) -> Self {
        Self::Persistence {
            reason: reason.into(),
        }
    }

    /// Whether the failing operation is worth repeating on the next poll tick.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled
            | Self::InvalidUrl { .. }
            | Self::Serialization { .. } => false,
            Self::HttpStatus { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::NOT_FOUND
            }
            Self::Network { .. }
            | Self::Playlist { .. }
            | Self::IncompleteBody { .. }
            | Self::SegmentTooLarge { .. }
            | Self::Io { .. }
            | Self::Persistence { .. } => true,
        }
    }
}
