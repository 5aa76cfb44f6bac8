//! Error types for feed fetching.

use thiserror::Error;

pub type FeedResult<T> = Result<T, FeedError>;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("invalid feed url {url:?}: {detail}")]
    InvalidUrl { url: String, detail: String },

    #[error("unsupported scheme {0:?}; only http is fetched")]
    UnsupportedScheme(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("feed returned status {0}")]
    Status(u16),

    #[error("feed request timed out")]
    Timeout,

    #[error("feed body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("feed body is not a number: {0:?}")]
    Parse(String),

    #[error("state store error: {0}")]
    State(#[from] recluster_state::StateError),
}
