//! Pipeline controller: chunk a transcript, drive per-chunk extraction, and
//! aggregate the outcomes into one merged result.
//!
//! This is the single entry point external collaborators call. Everything it
//! needs arrives through [`PipelineConfig`] and the injected
//! [`ReasoningCapability`]; nothing is read from ambient global state.

pub mod config;
pub mod metrics;

pub use config::{ConcurrencyConfig, PipelineConfig};
pub use metrics::{MetricsSnapshot, PipelineMetrics};

use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use aggregate::{Aggregator, ChunkOutcome, MergedResult};
use extract::{ReasoningCapability, StageError, StageProcessor, SummaryBaton};
use transcript::{Chunk, Chunker, TokenStream, TranscriptError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Transcript(#[from] TranscriptError),

    /// The run stopped early on a fatal chunk failure. Outcomes for chunks
    /// that completed before the abort are preserved in `partial`; everything
    /// else is accounted for as unprocessed ranges.
    #[error("run aborted: {reason}")]
    Aborted {
        reason: String,
        partial: MergedResult,
    },
}

pub struct Pipeline {
    capability: Arc<dyn ReasoningCapability>,
    config: PipelineConfig,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    pub fn new(capability: Arc<dyn ReasoningCapability>, config: PipelineConfig) -> Self {
        Self {
            capability,
            config,
            metrics: PipelineMetrics::new(),
        }
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Run the full extraction over a validated token stream.
    pub async fn run(&self, stream: Arc<TokenStream>) -> Result<MergedResult, PipelineError> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        info!(
            %run_id,
            tokens = stream.len(),
            duration_secs = stream.duration(),
            goal = %self.config.extraction_goal,
            "starting extraction run"
        );

        let timer = Instant::now();
        let chunks = Chunker::new(self.config.chunking.clone()).chunk(stream)?;
        self.metrics.record_chunking(timer.elapsed(), chunks.len());

        let stage = StageProcessor::new(self.capability.clone(), self.config.stage_config());
        let (outcomes, abort) = if self.config.concurrency.carry_context {
            self.run_sequential(&stage, &chunks).await
        } else {
            self.run_concurrent(Arc::new(stage), &chunks).await
        };

        let timer = Instant::now();
        let merged = Aggregator::new(self.config.dedup.clone()).aggregate(&outcomes);
        self.metrics
            .record_aggregation(timer.elapsed(), merged.items.len());

        match abort {
            Some(reason) => {
                warn!(%run_id, reason = %reason, "run aborted, returning partial result");
                Err(PipelineError::Aborted {
                    reason,
                    partial: merged,
                })
            }
            None => {
                info!(
                    %run_id,
                    items = merged.items.len(),
                    unprocessed = merged.unprocessed.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "extraction run complete"
                );
                Ok(merged)
            }
        }
    }

    /// Convenience entry: load a whisper-style transcript file and run.
    pub async fn run_whisper_file(&self, path: &Path) -> anyhow::Result<MergedResult> {
        let stream =
            transcript::load_whisper_json(path, self.config.chunking.timestamp_tolerance)
                .await
                .with_context(|| format!("failed to load transcript {}", path.display()))?;
        self.run(Arc::new(stream)).await.map_err(Into::into)
    }

    /// A first-chunk schema exhaustion suggests broken prompt or model
    /// configuration rather than difficult content.
    fn is_fatal(&self, error: &StageError) -> bool {
        self.config.fail_fast || (error.chunk_id() == 0 && error.is_schema())
    }

    /// Strict stream-order processing: each chunk seeds the next through the
    /// summary baton, moved from call to call.
    async fn run_sequential(
        &self,
        stage: &StageProcessor,
        chunks: &[Chunk],
    ) -> (Vec<ChunkOutcome>, Option<String>) {
        let mut outcomes = Vec::with_capacity(chunks.len());
        let mut baton = SummaryBaton::default();

        for (position, chunk) in chunks.iter().enumerate() {
            let timer = Instant::now();
            match stage.process(chunk, std::mem::take(&mut baton)).await {
                Ok((extraction, next)) => {
                    self.metrics.record_extraction(timer.elapsed(), true);
                    baton = next;
                    outcomes.push(ChunkOutcome::Extracted(extraction));
                }
                Err(error) => {
                    self.metrics.record_extraction(timer.elapsed(), false);
                    let fatal = self.is_fatal(&error);
                    let reason = error.to_string();
                    outcomes.push(ChunkOutcome::Failed {
                        chunk_id: chunk.id,
                        core_span: chunk.core_span(),
                        reason: reason.clone(),
                    });
                    // the failed chunk produced no summary; the next starts cold
                    baton = SummaryBaton::default();
                    if fatal {
                        for remaining in &chunks[position + 1..] {
                            outcomes.push(ChunkOutcome::Failed {
                                chunk_id: remaining.id,
                                core_span: remaining.core_span(),
                                reason: "aborted before dispatch".to_string(),
                            });
                        }
                        return (outcomes, Some(reason));
                    }
                }
            }
        }

        (outcomes, None)
    }

    /// Bounded fan-out when carryover is disabled. Results are reassembled
    /// into chunk order before the aggregator sees them.
    async fn run_concurrent(
        &self,
        stage: Arc<StageProcessor>,
        chunks: &[Chunk],
    ) -> (Vec<ChunkOutcome>, Option<String>) {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max_concurrent.max(1)));
        let mut join_set = JoinSet::new();

        for chunk in chunks.iter().cloned() {
            let stage = stage.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                // the semaphore only closes when the run is tearing down
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return None;
                };
                let timer = Instant::now();
                let core_span = chunk.core_span();
                let result = stage.process(&chunk, SummaryBaton::default()).await;
                Some((
                    chunk.id,
                    core_span,
                    result.map(|(extraction, _)| extraction),
                    timer.elapsed(),
                ))
            });
        }

        let mut slots: Vec<Option<ChunkOutcome>> = chunks.iter().map(|_| None).collect();
        let mut abort: Option<String> = None;

        while let Some(joined) = join_set.join_next().await {
            let Ok(Some((chunk_id, core_span, result, elapsed))) = joined else {
                // cancelled before completion; its slot is filled in below
                continue;
            };
            match result {
                Ok(extraction) => {
                    self.metrics.record_extraction(elapsed, true);
                    slots[chunk_id] = Some(ChunkOutcome::Extracted(extraction));
                }
                Err(error) => {
                    self.metrics.record_extraction(elapsed, false);
                    let fatal = self.is_fatal(&error);
                    let reason = error.to_string();
                    slots[chunk_id] = Some(ChunkOutcome::Failed {
                        chunk_id,
                        core_span,
                        reason: reason.clone(),
                    });
                    if fatal && abort.is_none() {
                        abort = Some(reason);
                        join_set.abort_all();
                    }
                }
            }
        }

        let outcomes = slots
            .into_iter()
            .enumerate()
            .map(|(id, slot)| {
                slot.unwrap_or_else(|| ChunkOutcome::Failed {
                    chunk_id: id,
                    core_span: chunks[id].core_span(),
                    reason: "aborted before completion".to_string(),
                })
            })
            .collect();

        (outcomes, abort)
    }
}
