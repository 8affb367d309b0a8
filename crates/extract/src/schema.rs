use serde::{Deserialize, Serialize};

use transcript::TimeRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Insight,
    ActionItem,
    Quote,
}

/// One extracted finding, annotated with its originating time range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedItem {
    pub kind: ItemKind,
    pub content: String,
    pub span: TimeRange,
    pub confidence: f64,
}

/// Structured output of one chunk's extraction call, tagged with the chunk it
/// came from so findings stay traceable to source time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkExtraction {
    pub chunk_id: usize,
    pub core_span: TimeRange,
    pub context_span: TimeRange,
    pub items: Vec<ExtractedItem>,
    pub summary: String,
}

/// Raw payload shape the capability must return. Kept separate from
/// `ChunkExtraction` so schema checking stays a typed parse step, not an
/// exception path.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionPayload {
    #[serde(default)]
    pub items: Vec<PayloadItem>,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayloadItem {
    pub kind: ItemKind,
    pub content: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

impl ExtractionPayload {
    /// Parse and semantically validate a capability response. Returns a
    /// human-readable violation suitable for a corrective reprompt.
    pub fn from_value(value: serde_json::Value) -> Result<Self, String> {
        let payload: ExtractionPayload =
            serde_json::from_value(value).map_err(|e| format!("payload shape: {}", e))?;

        for (i, item) in payload.items.iter().enumerate() {
            if item.content.trim().is_empty() {
                return Err(format!("item {} has empty content", i));
            }
            if item.end_seconds < item.start_seconds {
                return Err(format!(
                    "item {} has end_seconds {} before start_seconds {}",
                    i, item.end_seconds, item.start_seconds
                ));
            }
        }
        Ok(payload)
    }
}
