use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, TranscriptError};

/// Smallest timestamped unit of the transcript, typically one word.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub index: usize,
}

/// Half-open span of transcript time in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    pub fn intersects(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &TimeRange) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    /// Overlap length as a fraction of the shorter span. Point spans count as
    /// fully overlapping when they intersect at all.
    pub fn overlap_fraction(&self, other: &TimeRange) -> f64 {
        let overlap = self.end.min(other.end) - self.start.max(other.start);
        if overlap <= 0.0 {
            return 0.0;
        }
        let shorter = self.duration().min(other.duration());
        if shorter <= f64::EPSILON {
            return 1.0;
        }
        (overlap / shorter).min(1.0)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            format_timestamp(self.start),
            format_timestamp(self.end)
        )
    }
}

/// Convert seconds to MM:SS or H:MM:SS display form.
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let (hours, rem) = (total / 3600, total % 3600);
    let (mins, secs) = (rem / 60, rem % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{}:{:02}", mins, secs)
    }
}

/// Immutable ordered sequence of timestamped tokens. Validated once on
/// construction; chunks hold cheap read-only views into it.
#[derive(Debug)]
pub struct TokenStream {
    tokens: Vec<Token>,
}

impl TokenStream {
    /// Slack allowed before a start-time regression is rejected. Upstream
    /// transcription rounds word boundaries, so exact monotonicity is too strict.
    pub const DEFAULT_TOLERANCE: f64 = 0.05;

    /// Build a validated stream from `(text, start, end)` records. Indices are
    /// assigned in arrival order. Fails fast on an empty input, a start-time
    /// regression beyond `tolerance`, or a token whose end precedes its start
    /// beyond `tolerance`.
    pub fn from_words<I>(words: I, tolerance: f64) -> Result<Self>
    where
        I: IntoIterator<Item = (String, f64, f64)>,
    {
        let mut tokens = Vec::new();
        let mut previous = f64::NEG_INFINITY;

        for (index, (text, start, end)) in words.into_iter().enumerate() {
            if start < previous - tolerance {
                return Err(TranscriptError::NonMonotonicTimestamps {
                    index,
                    start,
                    previous,
                    tolerance,
                });
            }
            if end < start - tolerance {
                return Err(TranscriptError::InvertedTokenSpan {
                    index,
                    start,
                    end,
                    tolerance,
                });
            }
            previous = previous.max(start);
            tokens.push(Token {
                text,
                start,
                end,
                index,
            });
        }

        if tokens.is_empty() {
            return Err(TranscriptError::EmptyStream);
        }

        Ok(Self { tokens })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Tokens in the half-open index range `[start, end)`.
    pub fn slice(&self, range: (usize, usize)) -> &[Token] {
        &self.tokens[range.0..range.1]
    }

    /// Time span covered by an index range. Timestamp jitter within the
    /// construction tolerance never produces an inverted span.
    pub fn span(&self, range: (usize, usize)) -> TimeRange {
        let slice = self.slice(range);
        match (slice.first(), slice.last()) {
            (Some(first), Some(last)) => {
                TimeRange::new(first.start, last.end.max(first.start))
            }
            _ => TimeRange::new(0.0, 0.0),
        }
    }

    pub fn duration(&self) -> f64 {
        self.tokens.last().map(|t| t.end).unwrap_or(0.0)
    }

    /// Silence before token `index`, in seconds. Zero for the first token.
    pub fn gap_before(&self, index: usize) -> f64 {
        if index == 0 || index >= self.tokens.len() {
            return 0.0;
        }
        (self.tokens[index].start - self.tokens[index - 1].end).max(0.0)
    }
}
