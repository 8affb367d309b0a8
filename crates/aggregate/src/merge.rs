use serde::{Deserialize, Serialize};
use tracing::warn;

use extract::{ChunkExtraction, ItemKind};
use transcript::TimeRange;

use crate::similarity::similarity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Minimum time-overlap fraction (of the shorter span) before two items
    /// from adjacent chunks can be the same finding.
    pub min_time_overlap: f64,
    /// Minimum textual similarity for an identity match.
    pub min_text_similarity: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            min_time_overlap: 0.5,
            min_text_similarity: 0.7,
        }
    }
}

/// What one chunk contributed: a structured extraction, or a permanent
/// failure covering its core time span.
#[derive(Debug, Clone)]
pub enum ChunkOutcome {
    Extracted(ChunkExtraction),
    Failed {
        chunk_id: usize,
        core_span: TimeRange,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedItem {
    pub kind: ItemKind,
    pub content: String,
    pub span: TimeRange,
    pub confidence: f64,
    /// Chunks this item was observed in; more than one after a cross-boundary
    /// merge.
    pub source_chunks: Vec<usize>,
}

/// Final deduplicated, time-ordered extraction spanning the whole stream.
/// `unprocessed` accounts for the core spans of chunks that failed
/// permanently, so the result covers the entire input duration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedResult {
    pub items: Vec<MergedItem>,
    pub unprocessed: Vec<TimeRange>,
}

struct Slot {
    item: MergedItem,
    chunk_id: usize,
    order: usize,
    depth: f64,
}

pub struct Aggregator {
    config: DedupConfig,
}

impl Aggregator {
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    /// Merge per-chunk outcomes, given in chunk order, into one result.
    /// Deterministic: the same input always yields an identical result.
    pub fn aggregate(&self, outcomes: &[ChunkOutcome]) -> MergedResult {
        let mut slots: Vec<Slot> = Vec::new();
        let mut unprocessed: Vec<TimeRange> = Vec::new();
        // Context window of the previous successfully extracted chunk; items
        // intersecting it are dedup candidates.
        let mut previous: Option<(usize, TimeRange)> = None;

        for outcome in outcomes {
            match outcome {
                ChunkOutcome::Failed {
                    chunk_id,
                    core_span,
                    reason,
                } => {
                    warn!(
                        chunk = chunk_id,
                        span = %core_span,
                        reason = %reason,
                        "chunk failed permanently, recording unprocessed range"
                    );
                    unprocessed.push(*core_span);
                    previous = None;
                }
                ChunkOutcome::Extracted(extraction) => {
                    for (order, item) in extraction.items.iter().enumerate() {
                        let slot = Slot {
                            item: MergedItem {
                                kind: item.kind,
                                content: item.content.clone(),
                                span: item.span,
                                confidence: item.confidence,
                                source_chunks: vec![extraction.chunk_id],
                            },
                            chunk_id: extraction.chunk_id,
                            order,
                            depth: core_depth(&extraction.core_span, &item.span),
                        };

                        let in_shared_window = previous
                            .filter(|(id, _)| id + 1 == extraction.chunk_id)
                            .is_some_and(|(_, window)| item.span.intersects(&window));
                        if in_shared_window {
                            self.reconcile(&mut slots, slot);
                        } else {
                            slots.push(slot);
                        }
                    }
                    previous = Some((extraction.chunk_id, extraction.context_span));
                }
            }
        }

        // Ties broken by original chunk order, then extraction order in chunk.
        slots.sort_by(|a, b| {
            a.item
                .span
                .start
                .total_cmp(&b.item.span.start)
                .then(a.chunk_id.cmp(&b.chunk_id))
                .then(a.order.cmp(&b.order))
        });

        MergedResult {
            items: slots.into_iter().map(|s| s.item).collect(),
            unprocessed,
        }
    }

    /// Match an overlap-region item against what the previous chunk already
    /// contributed; merge on a match, keep both otherwise.
    fn reconcile(&self, slots: &mut Vec<Slot>, candidate: Slot) {
        let matches: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                slot.chunk_id + 1 == candidate.chunk_id
                    && slot.item.kind == candidate.item.kind
                    && slot.item.span.overlap_fraction(&candidate.item.span)
                        > self.config.min_time_overlap
                    && similarity(&slot.item.content, &candidate.item.content)
                        >= self.config.min_text_similarity
            })
            .map(|(i, _)| i)
            .collect();

        let Some(&first) = matches.first() else {
            slots.push(candidate);
            return;
        };

        if matches.len() > 1 {
            warn!(
                chunk = candidate.chunk_id,
                candidates = matches.len(),
                "ambiguous overlap match, keeping deepest-in-core item"
            );
        }

        // Deterministic pick among multi-way matches: deepest in its own
        // core, then earliest extraction order.
        let best = matches
            .into_iter()
            .skip(1)
            .fold(first, |best, i| {
                let better = slots[i].depth > slots[best].depth
                    || (slots[i].depth == slots[best].depth && slots[i].order < slots[best].order);
                if better { i } else { best }
            });

        let existing = &mut slots[best];
        let mut sources = existing.item.source_chunks.clone();
        sources.extend(&candidate.item.source_chunks);
        sources.sort_unstable();
        sources.dedup();

        // Prefer the version extracted with more surrounding context.
        if candidate.depth > existing.depth {
            let mut item = candidate.item;
            item.source_chunks = sources;
            existing.item = item;
            existing.chunk_id = candidate.chunk_id;
            existing.order = candidate.order;
            existing.depth = candidate.depth;
        } else {
            existing.item.source_chunks = sources;
        }
    }
}

/// How deep a span's midpoint sits inside a chunk's core. Negative when the
/// midpoint falls in the overlap margin.
fn core_depth(core: &TimeRange, span: &TimeRange) -> f64 {
    let mid = (span.start + span.end) / 2.0;
    (mid - core.start).min(core.end - mid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::ExtractedItem;

    fn extraction(
        chunk_id: usize,
        core: (f64, f64),
        context: (f64, f64),
        items: Vec<(ItemKind, &str, f64, f64)>,
    ) -> ChunkOutcome {
        ChunkOutcome::Extracted(ChunkExtraction {
            chunk_id,
            core_span: TimeRange::new(core.0, core.1),
            context_span: TimeRange::new(context.0, context.1),
            items: items
                .into_iter()
                .map(|(kind, content, start, end)| ExtractedItem {
                    kind,
                    content: content.to_string(),
                    span: TimeRange::new(start, end),
                    confidence: 0.8,
                })
                .collect(),
            summary: String::new(),
        })
    }

    fn failed(chunk_id: usize, core: (f64, f64)) -> ChunkOutcome {
        ChunkOutcome::Failed {
            chunk_id,
            core_span: TimeRange::new(core.0, core.1),
            reason: "transport retries exhausted".to_string(),
        }
    }

    fn aggregator() -> Aggregator {
        Aggregator::new(DedupConfig::default())
    }

    #[test]
    fn test_core_items_kept_and_sorted_by_start() {
        let outcomes = vec![
            extraction(
                0,
                (0.0, 100.0),
                (0.0, 110.0),
                vec![
                    (ItemKind::Insight, "second finding", 50.0, 60.0),
                    (ItemKind::Insight, "first finding", 10.0, 20.0),
                ],
            ),
            extraction(
                1,
                (100.0, 200.0),
                (90.0, 200.0),
                vec![(ItemKind::Insight, "third finding", 150.0, 160.0)],
            ),
        ];
        let result = aggregator().aggregate(&outcomes);
        let contents: Vec<_> = result.items.iter().map(|i| i.content.as_str()).collect();
        assert_eq!(contents, vec!["first finding", "second finding", "third finding"]);
        assert!(result.unprocessed.is_empty());
    }

    #[test]
    fn test_identical_overlap_item_merged_once() {
        let outcomes = vec![
            extraction(
                0,
                (0.0, 100.0),
                (0.0, 110.0),
                vec![(ItemKind::Quote, "read every day", 102.0, 106.0)],
            ),
            extraction(
                1,
                (100.0, 200.0),
                (90.0, 200.0),
                vec![(ItemKind::Quote, "read every day", 102.0, 106.0)],
            ),
        ];
        let result = aggregator().aggregate(&outcomes);
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].source_chunks, vec![0, 1]);
    }

    #[test]
    fn test_deeper_core_version_preferred() {
        // Chunk 0 saw the finding in its trailing margin; chunk 1 saw it well
        // inside its core with fuller phrasing. Chunk 1's version wins.
        let outcomes = vec![
            extraction(
                0,
                (0.0, 100.0),
                (0.0, 110.0),
                vec![(ItemKind::Insight, "compounding matters", 103.0, 107.0)],
            ),
            extraction(
                1,
                (100.0, 200.0),
                (90.0, 200.0),
                vec![(
                    ItemKind::Insight,
                    "compounding matters more than timing",
                    103.0,
                    107.0,
                )],
            ),
        ];
        let result = aggregator().aggregate(&outcomes);
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].content, "compounding matters more than timing");
        assert_eq!(result.items[0].source_chunks, vec![0, 1]);
    }

    #[test]
    fn test_dissimilar_overlap_items_both_kept() {
        let outcomes = vec![
            extraction(
                0,
                (0.0, 100.0),
                (0.0, 110.0),
                vec![(ItemKind::Insight, "buy index funds", 102.0, 106.0)],
            ),
            extraction(
                1,
                (100.0, 200.0),
                (90.0, 200.0),
                vec![(ItemKind::Insight, "stretch before running", 102.0, 106.0)],
            ),
        ];
        let result = aggregator().aggregate(&outcomes);
        assert_eq!(result.items.len(), 2);
    }

    #[test]
    fn test_kind_mismatch_never_merges() {
        let outcomes = vec![
            extraction(
                0,
                (0.0, 100.0),
                (0.0, 110.0),
                vec![(ItemKind::Quote, "read every day", 102.0, 106.0)],
            ),
            extraction(
                1,
                (100.0, 200.0),
                (90.0, 200.0),
                vec![(ItemKind::Insight, "read every day", 102.0, 106.0)],
            ),
        ];
        let result = aggregator().aggregate(&outcomes);
        assert_eq!(result.items.len(), 2);
    }

    #[test]
    fn test_failed_chunk_recorded_as_unprocessed_range() {
        let outcomes = vec![
            extraction(0, (0.0, 100.0), (0.0, 110.0), vec![]),
            failed(1, (100.0, 200.0)),
            extraction(2, (200.0, 300.0), (190.0, 300.0), vec![]),
        ];
        let result = aggregator().aggregate(&outcomes);
        assert_eq!(result.unprocessed, vec![TimeRange::new(100.0, 200.0)]);
    }

    #[test]
    fn test_no_dedup_across_failed_chunk() {
        // Chunks 0 and 2 are not adjacent; identical items stay separate.
        let outcomes = vec![
            extraction(
                0,
                (0.0, 100.0),
                (0.0, 110.0),
                vec![(ItemKind::Insight, "same finding", 95.0, 99.0)],
            ),
            failed(1, (100.0, 200.0)),
            extraction(
                2,
                (200.0, 300.0),
                (90.0, 300.0),
                vec![(ItemKind::Insight, "same finding", 95.0, 99.0)],
            ),
        ];
        let result = aggregator().aggregate(&outcomes);
        assert_eq!(result.items.len(), 2);
    }

    #[test]
    fn test_idempotent_byte_identical() {
        let outcomes = vec![
            extraction(
                0,
                (0.0, 100.0),
                (0.0, 110.0),
                vec![
                    (ItemKind::Insight, "alpha", 10.0, 20.0),
                    (ItemKind::Quote, "read every day", 102.0, 106.0),
                ],
            ),
            failed(1, (100.0, 200.0)),
        ];
        let agg = aggregator();
        let a = serde_json::to_string(&agg.aggregate(&outcomes)).unwrap();
        let b = serde_json::to_string(&agg.aggregate(&outcomes)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_ambiguous_multiway_match_resolved_deterministically() {
        // Two near-identical findings from chunk 0 both match the candidate;
        // the deeper-in-core one absorbs it.
        let outcomes = vec![
            extraction(
                0,
                (0.0, 100.0),
                (0.0, 110.0),
                vec![
                    (ItemKind::Insight, "sleep eight hours", 80.0, 106.0),
                    (ItemKind::Insight, "sleep eight hours nightly", 101.0, 107.0),
                ],
            ),
            extraction(
                1,
                (100.0, 200.0),
                (90.0, 200.0),
                vec![(ItemKind::Insight, "sleep eight hours", 101.0, 106.0)],
            ),
        ];
        let agg = aggregator();
        let first = agg.aggregate(&outcomes);
        let second = agg.aggregate(&outcomes);
        assert_eq!(first, second);
        assert_eq!(first.items.len(), 2);
        // the midpoint of the 80-106 span sits deeper in chunk 0's core
        let merged = first
            .items
            .iter()
            .find(|i| i.source_chunks == vec![0, 1])
            .unwrap();
        assert_eq!(merged.span.start, 80.0);
    }

    #[test]
    fn test_ties_broken_by_chunk_then_item_order() {
        let outcomes = vec![
            extraction(
                0,
                (0.0, 100.0),
                (0.0, 110.0),
                vec![
                    (ItemKind::Insight, "from chunk zero first", 50.0, 60.0),
                    (ItemKind::Insight, "from chunk zero second", 50.0, 60.0),
                ],
            ),
            extraction(
                1,
                (100.0, 200.0),
                (90.0, 200.0),
                vec![(ItemKind::ActionItem, "from chunk one", 50.0, 60.0)],
            ),
        ];
        let result = aggregator().aggregate(&outcomes);
        let contents: Vec<_> = result.items.iter().map(|i| i.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["from chunk zero first", "from chunk zero second", "from chunk one"]
        );
    }
}
