//! Merging of per-chunk extractions into one time-ordered result.
//!
//! The aggregator never revisits the raw token stream; it works only from the
//! structured per-chunk outputs and their known overlap spans.

pub mod merge;
pub mod similarity;

pub use merge::{Aggregator, ChunkOutcome, DedupConfig, MergedItem, MergedResult};
pub use similarity::{normalize, similarity};
