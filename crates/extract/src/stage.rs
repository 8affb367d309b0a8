use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use transcript::{format_timestamp, Chunk, TimeRange, Token};

use crate::capability::{CapabilityError, CapabilityRequest, ReasoningCapability};
use crate::prompt;
use crate::schema::{ChunkExtraction, ExtractedItem, ExtractionPayload, ItemKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Immediate retries after a transport failure.
    pub max_transport_retries: usize,
    /// Corrective reprompts after a schema failure.
    pub max_schema_retries: usize,
    /// Backoff retries after a rate-limit response.
    pub max_rate_limit_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_transport_retries: 3,
            max_schema_retries: 2,
            max_rate_limit_retries: 5,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub extraction_goal: String,
    pub retry: RetryConfig,
    /// Upper bound on the rolling summary carried between chunks, in chars.
    pub max_summary_chars: usize,
}

impl StageConfig {
    pub fn new(extraction_goal: impl Into<String>) -> Self {
        Self {
            extraction_goal: extraction_goal.into(),
            retry: RetryConfig::default(),
            max_summary_chars: 600,
        }
    }
}

/// Bounded carryover state seeding the next chunk's extraction with narrative
/// continuity. Single-owner: moved from one stage call to the next, never
/// shared.
#[derive(Debug, Default)]
pub struct SummaryBaton(Option<String>);

impl SummaryBaton {
    pub fn carry(summary: &str, max_chars: usize) -> Self {
        let trimmed = summary.trim();
        if trimmed.is_empty() {
            return Self(None);
        }
        Self(Some(trimmed.chars().take(max_chars).collect()))
    }

    pub fn text(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

/// Permanent per-chunk failure, surfaced after the relevant retry budget is
/// spent. The variant records which failure class exhausted it.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("chunk {chunk_id}: transport retries exhausted after {attempts} attempts: {reason}")]
    TransportExhausted {
        chunk_id: usize,
        attempts: usize,
        reason: String,
    },

    #[error("chunk {chunk_id}: response never matched the schema after {attempts} attempts: {reason}")]
    SchemaExhausted {
        chunk_id: usize,
        attempts: usize,
        reason: String,
    },

    #[error("chunk {chunk_id}: rate-limit retries exhausted after {attempts} attempts")]
    RateLimitExhausted { chunk_id: usize, attempts: usize },
}

impl StageError {
    pub fn chunk_id(&self) -> usize {
        match self {
            Self::TransportExhausted { chunk_id, .. }
            | Self::SchemaExhausted { chunk_id, .. }
            | Self::RateLimitExhausted { chunk_id, .. } => *chunk_id,
        }
    }

    /// Schema exhaustion on the very first chunk usually means the prompt or
    /// model configuration is broken, not the content.
    pub fn is_schema(&self) -> bool {
        matches!(self, Self::SchemaExhausted { .. })
    }
}

/// Drives one extraction call per chunk, handling retries, schema validation
/// and the rolling-summary baton.
pub struct StageProcessor {
    capability: Arc<dyn ReasoningCapability>,
    config: StageConfig,
}

impl StageProcessor {
    pub fn new(capability: Arc<dyn ReasoningCapability>, config: StageConfig) -> Self {
        Self { capability, config }
    }

    pub async fn process(
        &self,
        chunk: &Chunk,
        baton: SummaryBaton,
    ) -> Result<(ChunkExtraction, SummaryBaton), StageError> {
        let mut request = self.build_request(chunk, &baton);
        let retry = &self.config.retry;
        let mut transport_attempts = 0usize;
        let mut schema_attempts = 0usize;
        let mut rate_attempts = 0usize;
        let mut backoff = Duration::from_millis(retry.initial_backoff_ms);

        loop {
            match self.capability.extract(&request).await {
                Ok(value) => match self.accept(chunk, value) {
                    Ok(extraction) => {
                        if transport_attempts + schema_attempts + rate_attempts > 0 {
                            info!(chunk = chunk.id, "extraction succeeded after retries");
                        }
                        let next =
                            SummaryBaton::carry(&extraction.summary, self.config.max_summary_chars);
                        return Ok((extraction, next));
                    }
                    Err(reason) => {
                        schema_attempts += 1;
                        if schema_attempts > retry.max_schema_retries {
                            return Err(StageError::SchemaExhausted {
                                chunk_id: chunk.id,
                                attempts: schema_attempts,
                                reason,
                            });
                        }
                        warn!(
                            chunk = chunk.id,
                            attempt = schema_attempts,
                            reason = %reason,
                            "payload failed validation, reprompting"
                        );
                        request.corrective_note =
                            Some(prompt::build_schema_retry_note(&reason, ""));
                    }
                },
                Err(CapabilityError::Schema { reason, raw }) => {
                    schema_attempts += 1;
                    if schema_attempts > retry.max_schema_retries {
                        return Err(StageError::SchemaExhausted {
                            chunk_id: chunk.id,
                            attempts: schema_attempts,
                            reason,
                        });
                    }
                    warn!(
                        chunk = chunk.id,
                        attempt = schema_attempts,
                        reason = %reason,
                        "response violated schema, reprompting"
                    );
                    request.corrective_note = Some(prompt::build_schema_retry_note(&reason, &raw));
                }
                Err(CapabilityError::Transport { reason }) => {
                    transport_attempts += 1;
                    if transport_attempts > retry.max_transport_retries {
                        return Err(StageError::TransportExhausted {
                            chunk_id: chunk.id,
                            attempts: transport_attempts,
                            reason,
                        });
                    }
                    warn!(
                        chunk = chunk.id,
                        attempt = transport_attempts,
                        reason = %reason,
                        "transport failure, retrying"
                    );
                }
                Err(CapabilityError::RateLimited { retry_after }) => {
                    rate_attempts += 1;
                    if rate_attempts > retry.max_rate_limit_retries {
                        return Err(StageError::RateLimitExhausted {
                            chunk_id: chunk.id,
                            attempts: rate_attempts,
                        });
                    }
                    let wait = retry_after.unwrap_or(backoff);
                    warn!(
                        chunk = chunk.id,
                        attempt = rate_attempts,
                        wait_ms = wait.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    sleep(wait).await;
                    backoff = (backoff * 2).min(Duration::from_millis(retry.max_backoff_ms));
                }
            }
        }
    }

    fn build_request(&self, chunk: &Chunk, baton: &SummaryBaton) -> CapabilityRequest {
        CapabilityRequest {
            extraction_goal: self.config.extraction_goal.clone(),
            context_before: render_with_timestamps(chunk.leading_context_tokens()),
            core_text: render_with_timestamps(chunk.core_tokens()),
            context_after: render_with_timestamps(chunk.trailing_context_tokens()),
            rolling_summary: baton.text().map(str::to_string),
            corrective_note: None,
        }
    }

    /// Validate a capability payload and anchor it to the chunk. Spans are
    /// clamped into the chunk's context window; quote starts are refined
    /// against word-level timestamps when the quoted words can be located.
    fn accept(&self, chunk: &Chunk, value: serde_json::Value) -> Result<ChunkExtraction, String> {
        let payload = ExtractionPayload::from_value(value)?;
        let context_span = chunk.context_span();

        let items = payload
            .items
            .into_iter()
            .map(|item| {
                let start = item.start_seconds.clamp(context_span.start, context_span.end);
                let end = item.end_seconds.clamp(start, context_span.end);
                let mut span = TimeRange::new(start, end);
                if item.kind == ItemKind::Quote {
                    if let Some(refined) = locate_quote_start(chunk.context_tokens(), &item.content)
                    {
                        span.start = refined;
                        span.end = span.end.max(refined);
                    }
                }
                ExtractedItem {
                    kind: item.kind,
                    content: item.content,
                    span,
                    confidence: item.confidence.clamp(0.0, 1.0),
                }
            })
            .collect();

        Ok(ChunkExtraction {
            chunk_id: chunk.id,
            core_span: chunk.core_span(),
            context_span,
            items,
            summary: payload.summary,
        })
    }
}

/// Interval between inline timestamp markers, in tokens.
const MARKER_STRIDE: usize = 25;

/// Render tokens as text with periodic `[MM:SS]` markers so the model can
/// report timestamps for its findings.
fn render_with_timestamps(tokens: &[Token]) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i % MARKER_STRIDE == 0 {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&format!("[{}]", format_timestamp(token.start)));
        }
        out.push(' ');
        out.push_str(&token.text);
    }
    out
}

fn normalize_word(word: &str) -> String {
    word.chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Find where a verbatim quote begins inside the chunk by matching its first
/// few words against the token sequence.
fn locate_quote_start(tokens: &[Token], content: &str) -> Option<f64> {
    let reference: Vec<String> = content
        .split_whitespace()
        .map(normalize_word)
        .filter(|w| !w.is_empty())
        .take(3)
        .collect();
    if reference.is_empty() {
        return None;
    }

    let normalized: Vec<String> = tokens.iter().map(|t| normalize_word(&t.text)).collect();
    'outer: for i in 0..normalized.len() {
        for (j, want) in reference.iter().enumerate() {
            match normalized.get(i + j) {
                Some(have) if have == want => {}
                _ => continue 'outer,
            }
        }
        return Some(tokens[i].start);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use transcript::{Chunker, ChunkingConfig, TokenStream};

    struct Scripted {
        responses: Mutex<VecDeque<Result<Value, CapabilityError>>>,
        requests: Mutex<Vec<CapabilityRequest>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<Value, CapabilityError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn request(&self, i: usize) -> CapabilityRequest {
            self.requests.lock().unwrap()[i].clone()
        }
    }

    #[async_trait]
    impl ReasoningCapability for Scripted {
        async fn extract(
            &self,
            request: &CapabilityRequest,
        ) -> Result<Value, CapabilityError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("script exhausted")
        }
    }

    fn chunk() -> Chunk {
        let phrase = [
            "you", "should", "read", "every", "day", "because", "it", "compounds",
        ];
        let words = (0..40)
            .map(|i| {
                let start = i as f64 * 0.5;
                (phrase[i % phrase.len()].to_string(), start, start + 0.4)
            })
            .collect::<Vec<_>>();
        let stream = Arc::new(TokenStream::from_words(words, 0.05).unwrap());
        let cfg = ChunkingConfig {
            chunk_size: 30,
            overlap: 10,
            boundary_snap_gap: 10.0,
            ..ChunkingConfig::default()
        };
        Chunker::new(cfg).chunk(stream).unwrap().remove(1)
    }

    fn good_payload() -> Value {
        json!({
            "items": [
                {"kind": "insight", "content": "reading compounds over time",
                 "start_seconds": 11.0, "end_seconds": 13.0, "confidence": 0.8}
            ],
            "summary": "talks about daily reading"
        })
    }

    fn processor(capability: Arc<dyn ReasoningCapability>) -> StageProcessor {
        let mut config = StageConfig::new("find reading advice");
        config.retry.initial_backoff_ms = 1;
        config.retry.max_backoff_ms = 4;
        StageProcessor::new(capability, config)
    }

    #[tokio::test]
    async fn test_success_first_try_carries_summary() {
        let capability = Scripted::new(vec![Ok(good_payload())]);
        let stage = processor(capability.clone());
        let (extraction, baton) = stage.process(&chunk(), SummaryBaton::default()).await.unwrap();
        assert_eq!(extraction.items.len(), 1);
        assert_eq!(extraction.chunk_id, 1);
        assert_eq!(baton.text(), Some("talks about daily reading"));
        // first request has no rolling summary
        assert!(capability.request(0).rolling_summary.is_none());
    }

    #[tokio::test]
    async fn test_baton_threaded_into_request() {
        let capability = Scripted::new(vec![Ok(good_payload())]);
        let stage = processor(capability.clone());
        let baton = SummaryBaton::carry("previous chunk was about sleep", 600);
        stage.process(&chunk(), baton).await.unwrap();
        assert_eq!(
            capability.request(0).rolling_summary.as_deref(),
            Some("previous chunk was about sleep")
        );
    }

    #[tokio::test]
    async fn test_summary_truncated_to_bound() {
        let capability = Scripted::new(vec![Ok(json!({
            "items": [],
            "summary": "x".repeat(5000)
        }))]);
        let mut config = StageConfig::new("goal");
        config.max_summary_chars = 100;
        let stage = StageProcessor::new(capability, config);
        let (_, baton) = stage.process(&chunk(), SummaryBaton::default()).await.unwrap();
        assert_eq!(baton.text().unwrap().chars().count(), 100);
    }

    #[tokio::test]
    async fn test_schema_failure_triggers_corrective_reprompt() {
        let bad = json!({"items": [{"kind": "haiku", "content": "x",
            "start_seconds": 0.0, "end_seconds": 1.0}]});
        let capability = Scripted::new(vec![Ok(bad), Ok(good_payload())]);
        let stage = processor(capability.clone());
        let (extraction, _) = stage.process(&chunk(), SummaryBaton::default()).await.unwrap();
        assert_eq!(extraction.items.len(), 1);
        assert!(capability.request(0).corrective_note.is_none());
        assert!(capability.request(1).corrective_note.is_some());
    }

    #[tokio::test]
    async fn test_schema_retries_exhausted() {
        let bad = || {
            Ok(json!({"items": [{"kind": "haiku", "content": "x",
                "start_seconds": 0.0, "end_seconds": 1.0}]}))
        };
        let capability = Scripted::new(vec![bad(), bad(), bad()]);
        let stage = processor(capability);
        let err = stage
            .process(&chunk(), SummaryBaton::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::SchemaExhausted { attempts: 3, .. }));
        assert!(err.is_schema());
    }

    #[tokio::test]
    async fn test_transport_failure_retried_then_succeeds() {
        let capability = Scripted::new(vec![
            Err(CapabilityError::Transport {
                reason: "connection reset".to_string(),
            }),
            Ok(good_payload()),
        ]);
        let stage = processor(capability);
        assert!(stage.process(&chunk(), SummaryBaton::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_transport_retries_exhausted() {
        let fail = || {
            Err(CapabilityError::Transport {
                reason: "down".to_string(),
            })
        };
        let capability = Scripted::new(vec![fail(), fail(), fail(), fail()]);
        let stage = processor(capability);
        let err = stage
            .process(&chunk(), SummaryBaton::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StageError::TransportExhausted { chunk_id: 1, attempts: 4, .. }
        ));
    }

    #[tokio::test]
    async fn test_rate_limit_backs_off_then_succeeds() {
        let capability = Scripted::new(vec![
            Err(CapabilityError::RateLimited {
                retry_after: Some(Duration::from_millis(1)),
            }),
            Err(CapabilityError::RateLimited { retry_after: None }),
            Ok(good_payload()),
        ]);
        let stage = processor(capability);
        assert!(stage.process(&chunk(), SummaryBaton::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_spans_clamped_to_context_window() {
        let capability = Scripted::new(vec![Ok(json!({
            "items": [{"kind": "insight", "content": "out of window",
                "start_seconds": 0.0, "end_seconds": 9999.0}],
            "summary": ""
        }))]);
        let stage = processor(capability);
        let (extraction, _) = stage.process(&chunk(), SummaryBaton::default()).await.unwrap();
        let span = extraction.items[0].span;
        let window = extraction.context_span;
        assert!(span.start >= window.start && span.end <= window.end);
    }

    #[tokio::test]
    async fn test_quote_start_refined_to_word_timestamps() {
        // "read every day" appears at token indices 2, 10, 18... within the
        // chunk's context window; the first in-window occurrence wins.
        let capability = Scripted::new(vec![Ok(json!({
            "items": [{"kind": "quote", "content": "Read every day!",
                "start_seconds": 14.0, "end_seconds": 15.0}],
            "summary": ""
        }))]);
        let stage = processor(capability);
        let target = chunk();
        let expected = target
            .context_tokens()
            .windows(3)
            .find(|w| w[0].text == "read" && w[1].text == "every" && w[2].text == "day")
            .map(|w| w[0].start)
            .unwrap();
        let (extraction, _) = stage.process(&target, SummaryBaton::default()).await.unwrap();
        assert_eq!(extraction.items[0].span.start, expected);
    }

    #[test]
    fn test_render_with_timestamps_inserts_markers() {
        let words = (0..60)
            .map(|i| (format!("w{}", i), i as f64, i as f64 + 0.5))
            .collect::<Vec<_>>();
        let stream = TokenStream::from_words(words, 0.05).unwrap();
        let text = render_with_timestamps(stream.tokens());
        assert!(text.starts_with("[0:00] w0"));
        assert!(text.contains("[0:25] w25"));
        assert!(text.contains("[0:50] w50"));
    }

    #[test]
    fn test_empty_baton_from_blank_summary() {
        assert!(SummaryBaton::carry("   ", 100).text().is_none());
    }
}
