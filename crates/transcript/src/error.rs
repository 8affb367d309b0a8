use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranscriptError {
    #[error("transcript contains no tokens")]
    EmptyStream,

    #[error(
        "timestamp regression at token {index}: start {start} precedes {previous} beyond tolerance {tolerance}"
    )]
    NonMonotonicTimestamps {
        index: usize,
        start: f64,
        previous: f64,
        tolerance: f64,
    },

    #[error(
        "inverted span at token {index}: end {end} precedes start {start} beyond tolerance {tolerance}"
    )]
    InvertedTokenSpan {
        index: usize,
        start: f64,
        end: f64,
        tolerance: f64,
    },

    #[error("overlap ({overlap}) must be smaller than chunk size ({size})")]
    OverlapExceedsSize { size: usize, overlap: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TranscriptError>;
