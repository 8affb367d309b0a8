use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::token::{TimeRange, Token, TokenStream};

/// One overlap-padded window over the token stream, submitted as a single
/// extraction request. `core_range` marks the tokens this chunk is the
/// authoritative source for; `context_range` adds the left/right overlap.
/// Both are half-open index ranges into the shared stream.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: usize,
    pub core_range: (usize, usize),
    pub context_range: (usize, usize),
    pub digest: String,
    stream: Arc<TokenStream>,
}

impl Chunk {
    pub fn new(
        id: usize,
        stream: Arc<TokenStream>,
        core_range: (usize, usize),
        context_range: (usize, usize),
    ) -> Self {
        let digest = Self::generate_digest(&stream, core_range, context_range);
        Self {
            id,
            core_range,
            context_range,
            digest,
            stream,
        }
    }

    /// Stable content digest, usable as a cache key across runs.
    fn generate_digest(
        stream: &TokenStream,
        core_range: (usize, usize),
        context_range: (usize, usize),
    ) -> String {
        let mut hasher = Sha256::new();
        for token in stream.slice(context_range) {
            hasher.update(token.text.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(core_range.0.to_le_bytes());
        hasher.update(core_range.1.to_le_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }

    pub fn core_tokens(&self) -> &[Token] {
        self.stream.slice(self.core_range)
    }

    pub fn context_tokens(&self) -> &[Token] {
        self.stream.slice(self.context_range)
    }

    /// Tokens in the left overlap margin, before the core begins.
    pub fn leading_context_tokens(&self) -> &[Token] {
        self.stream.slice((self.context_range.0, self.core_range.0))
    }

    /// Tokens in the right overlap margin, after the core ends.
    pub fn trailing_context_tokens(&self) -> &[Token] {
        self.stream.slice((self.core_range.1, self.context_range.1))
    }

    pub fn core_span(&self) -> TimeRange {
        self.stream.span(self.core_range)
    }

    pub fn context_span(&self) -> TimeRange {
        self.stream.span(self.context_range)
    }
}
