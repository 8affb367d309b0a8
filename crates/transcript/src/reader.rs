use serde::Deserialize;
use std::path::Path;
use tokio::fs;

use crate::error::Result;
use crate::token::TokenStream;

/// Whisper-style transcript JSON: segments with optional word-level timing.
#[derive(Debug, Deserialize)]
pub struct WhisperTranscript {
    #[serde(default)]
    pub text: String,
    pub segments: Vec<WhisperSegment>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WhisperSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default)]
    pub words: Vec<WhisperWord>,
}

#[derive(Debug, Deserialize)]
pub struct WhisperWord {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

impl WhisperTranscript {
    /// Flatten into a validated token stream. Word-level timing is used when
    /// present; segments without words degrade to one token per whitespace
    /// word with the segment's span.
    pub fn into_stream(self, tolerance: f64) -> Result<TokenStream> {
        let mut words = Vec::new();

        for segment in self.segments {
            if segment.words.is_empty() {
                for word in segment.text.split_whitespace() {
                    words.push((word.to_string(), segment.start, segment.end));
                }
            } else {
                for word in segment.words {
                    words.push((word.word.trim().to_string(), word.start, word.end));
                }
            }
        }

        TokenStream::from_words(words, tolerance)
    }
}

/// Load a whisper-style transcript file into a token stream.
pub async fn load_whisper_json(path: &Path, tolerance: f64) -> Result<TokenStream> {
    let content = fs::read_to_string(path).await?;
    let transcript: WhisperTranscript = serde_json::from_str(&content)?;
    transcript.into_stream(tolerance)
}
