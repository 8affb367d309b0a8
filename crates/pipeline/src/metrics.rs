use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Run-level counters shared across pipeline phases.
pub struct PipelineMetrics {
    chunks_planned: AtomicUsize,
    chunks_extracted: AtomicUsize,
    chunks_failed: AtomicUsize,
    items_merged: AtomicUsize,

    // Timing (in microseconds)
    chunking_time_us: AtomicU64,
    extraction_time_us: AtomicU64,
    aggregation_time_us: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            chunks_planned: AtomicUsize::new(0),
            chunks_extracted: AtomicUsize::new(0),
            chunks_failed: AtomicUsize::new(0),
            items_merged: AtomicUsize::new(0),
            chunking_time_us: AtomicU64::new(0),
            extraction_time_us: AtomicU64::new(0),
            aggregation_time_us: AtomicU64::new(0),
        })
    }

    pub fn record_chunking(&self, duration: Duration, chunks: usize) {
        self.chunking_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.chunks_planned.fetch_add(chunks, Ordering::Relaxed);
    }

    pub fn record_extraction(&self, duration: Duration, success: bool) {
        self.extraction_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        if success {
            self.chunks_extracted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.chunks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_aggregation(&self, duration: Duration, items: usize) {
        self.aggregation_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.items_merged.fetch_add(items, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            chunks_planned: self.chunks_planned.load(Ordering::Relaxed),
            chunks_extracted: self.chunks_extracted.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            items_merged: self.items_merged.load(Ordering::Relaxed),
            chunking_time_ms: self.chunking_time_us.load(Ordering::Relaxed) as f64 / 1000.0,
            extraction_time_ms: self.extraction_time_us.load(Ordering::Relaxed) as f64 / 1000.0,
            aggregation_time_ms: self.aggregation_time_us.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub chunks_planned: usize,
    pub chunks_extracted: usize,
    pub chunks_failed: usize,
    pub items_merged: usize,
    pub chunking_time_ms: f64,
    pub extraction_time_ms: f64,
    pub aggregation_time_ms: f64,
}
