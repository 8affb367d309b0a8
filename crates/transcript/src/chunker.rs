use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::chunk::Chunk;
use crate::error::{Result, TranscriptError};
use crate::token::TokenStream;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target window size in tokens (S).
    pub chunk_size: usize,
    /// Tokens shared between adjacent windows (O). Must be smaller than
    /// `chunk_size`.
    pub overlap: usize,
    /// Silence between consecutive tokens, in seconds, that counts as an
    /// utterance boundary for context-edge snapping.
    pub boundary_snap_gap: f64,
    /// Allowed start-time regression before the stream is rejected.
    pub timestamp_tolerance: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            overlap: 100,
            boundary_snap_gap: 0.75,
            timestamp_tolerance: TokenStream::DEFAULT_TOLERANCE,
        }
    }
}

pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Split the stream into overlapping chunks. Core ranges advance in steps
    /// of `chunk_size - overlap` and partition the stream exactly: adjacent,
    /// non-overlapping, covering every token. Context ranges extend half the
    /// overlap to each side, clipped at the stream ends and snapped to the
    /// nearest utterance boundary inside the margin.
    pub fn chunk(&self, stream: Arc<TokenStream>) -> Result<Vec<Chunk>> {
        let size = self.config.chunk_size;
        let overlap = self.config.overlap;
        if overlap >= size {
            return Err(TranscriptError::OverlapExceedsSize { size, overlap });
        }

        let total = stream.len();
        if total <= size {
            // Whole stream fits in one window: single chunk, no overlap.
            return Ok(vec![Chunk::new(0, stream, (0, total), (0, total))]);
        }

        let step = size - overlap;
        let margin = overlap / 2;
        let mut chunks = Vec::new();
        let mut cursor = 0;

        while cursor < total {
            let core_end = (cursor + step).min(total);
            let context_start = self.snap_left(&stream, cursor.saturating_sub(margin), cursor);
            let context_end = self.snap_right(&stream, core_end, (core_end + margin).min(total));
            chunks.push(Chunk::new(
                chunks.len(),
                stream.clone(),
                (cursor, core_end),
                (context_start, context_end),
            ));
            cursor = core_end;
        }

        debug!(
            chunks = chunks.len(),
            tokens = total,
            step,
            margin,
            "chunked token stream"
        );
        Ok(chunks)
    }

    /// Pick the left context edge within `[preferred, core_start]`: the
    /// utterance boundary closest to `preferred` if one exists, otherwise
    /// `preferred` itself. Never cuts into less context than the margin allows.
    fn snap_left(&self, stream: &TokenStream, preferred: usize, core_start: usize) -> usize {
        self.nearest_boundary(stream, preferred, core_start)
            .unwrap_or(preferred)
    }

    /// Pick the right context edge within `[core_end, preferred]`.
    fn snap_right(&self, stream: &TokenStream, core_end: usize, preferred: usize) -> usize {
        self.nearest_boundary(stream, core_end, preferred)
            .map(|b| b.max(core_end))
            .unwrap_or(preferred)
    }

    /// Earliest utterance boundary (token index preceded by enough silence)
    /// in `[lo, hi]`. On the left this keeps the most context while starting
    /// at an utterance; on the right it ends the context at the first
    /// utterance break past the core.
    fn nearest_boundary(&self, stream: &TokenStream, lo: usize, hi: usize) -> Option<usize> {
        let mut best: Option<usize> = None;
        for index in lo.max(1)..=hi.min(stream.len().saturating_sub(1)) {
            if stream.gap_before(index) >= self.config.boundary_snap_gap {
                best = match best {
                    Some(current) if current <= index => Some(current),
                    _ => Some(index),
                };
            }
        }
        best
    }
}
