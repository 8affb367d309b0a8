//! Timestamped transcript model and overlap chunking.
//!
//! A `TokenStream` is the validated, immutable input contract; the `Chunker`
//! splits it into overlap-padded windows whose core ranges partition the
//! stream exactly.

pub mod chunk;
pub mod chunker;
pub mod error;
pub mod reader;
pub mod token;

pub use chunk::Chunk;
pub use chunker::{Chunker, ChunkingConfig};
pub use error::{Result, TranscriptError};
pub use reader::{load_whisper_json, WhisperSegment, WhisperTranscript, WhisperWord};
pub use token::{format_timestamp, TimeRange, Token, TokenStream};
