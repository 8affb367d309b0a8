//! Per-chunk structured extraction against an external reasoning capability.
//!
//! The `StageProcessor` builds a background/focus prompt for one chunk,
//! invokes the capability with a required JSON schema, retries per failure
//! class, and hands a bounded rolling summary to the next chunk.

pub mod capability;
pub mod prompt;
pub mod schema;
pub mod stage;

pub use capability::{
    CapabilityError, CapabilityRequest, ChatCompletionsClient, ReasoningCapability,
};
pub use schema::{ChunkExtraction, ExtractedItem, ExtractionPayload, ItemKind};
pub use stage::{RetryConfig, StageConfig, StageError, StageProcessor, SummaryBaton};
