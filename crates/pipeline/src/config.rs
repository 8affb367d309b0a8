use serde::{Deserialize, Serialize};

use aggregate::DedupConfig;
use extract::{RetryConfig, StageConfig};
use transcript::ChunkingConfig;

/// Full configuration surface for one extraction run. Always threaded in
/// explicitly; nothing is read from ambient environment state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// What to look for, e.g. "extract book recommendations".
    pub extraction_goal: String,
    pub chunking: ChunkingConfig,
    pub retry: RetryConfig,
    pub concurrency: ConcurrencyConfig,
    pub dedup: DedupConfig,
    /// Upper bound on the rolling summary carried between chunks, in chars.
    pub max_summary_chars: usize,
    /// Abort the whole run on the first permanently failed chunk.
    pub fail_fast: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Carry the rolling summary between chunks. Forces strictly sequential
    /// processing; disabling it allows concurrent dispatch.
    pub carry_context: bool,
    /// Fan-out limit when carryover is disabled.
    pub max_concurrent: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            carry_context: true,
            max_concurrent: 4,
        }
    }
}

impl PipelineConfig {
    pub fn new(extraction_goal: impl Into<String>) -> Self {
        Self {
            extraction_goal: extraction_goal.into(),
            chunking: ChunkingConfig::default(),
            retry: RetryConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            dedup: DedupConfig::default(),
            max_summary_chars: 600,
            fail_fast: false,
        }
    }

    /// Throughput over continuity: no cross-chunk carryover, wide fan-out,
    /// smaller retry budget.
    pub fn fast(extraction_goal: impl Into<String>) -> Self {
        Self {
            retry: RetryConfig {
                max_transport_retries: 2,
                max_schema_retries: 1,
                max_rate_limit_retries: 3,
                initial_backoff_ms: 500,
                max_backoff_ms: 5000,
            },
            concurrency: ConcurrencyConfig {
                carry_context: false,
                max_concurrent: 8,
            },
            ..Self::new(extraction_goal)
        }
    }

    /// Continuity over throughput: sequential with carryover and a generous
    /// retry budget.
    pub fn thorough(extraction_goal: impl Into<String>) -> Self {
        Self {
            retry: RetryConfig {
                max_transport_retries: 5,
                max_schema_retries: 3,
                max_rate_limit_retries: 8,
                initial_backoff_ms: 2000,
                max_backoff_ms: 20000,
            },
            ..Self::new(extraction_goal)
        }
    }

    pub(crate) fn stage_config(&self) -> StageConfig {
        StageConfig {
            extraction_goal: self.extraction_goal.clone(),
            retry: self.retry.clone(),
            max_summary_chars: self.max_summary_chars,
        }
    }
}
