use crate::capability::CapabilityRequest;

pub fn build_system_prompt(extraction_goal: &str) -> String {
    format!(
        r#"You are an expert content analyst extracting findings from a timestamped transcript window.

GOAL:
{}

INSTRUCTIONS:
1. Extract findings ONLY from the FOCUS region. The BACKGROUND regions exist so you can resolve references; never extract from them.
2. Use the [MM:SS] markers embedded in the text to report start_seconds and end_seconds for every finding.
3. Output ONLY valid JSON, nothing else.

SCHEMA:
{{
  "items": [
    {{"kind": "insight|action_item|quote", "content": "the finding", "start_seconds": 0.0, "end_seconds": 0.0, "confidence": 0.0}}
  ],
  "summary": "2-3 sentences summarizing what the FOCUS region covered"
}}

RULES:
- kind must be one of: insight, action_item, quote
- content for a quote must be the speaker's words verbatim
- start_seconds/end_seconds must fall inside the window's time span
- confidence is 0.0-1.0
- If nothing relevant to the goal appears, return an empty items list but still write the summary
- Output ONLY the JSON object, no markdown, no explanations"#,
        extraction_goal
    )
}

pub fn build_user_prompt(request: &CapabilityRequest) -> String {
    let mut prompt = String::new();

    if let Some(summary) = &request.rolling_summary {
        prompt.push_str("PRIOR CONTEXT (summary of the transcript so far):\n");
        prompt.push_str(summary);
        prompt.push_str("\n\n");
    }

    if !request.context_before.is_empty() {
        prompt.push_str("BACKGROUND (before focus, do not extract):\n");
        prompt.push_str(&request.context_before);
        prompt.push_str("\n\n");
    }

    prompt.push_str("FOCUS (extract from this span only):\n");
    prompt.push_str(&request.core_text);
    prompt.push_str("\n\n");

    if !request.context_after.is_empty() {
        prompt.push_str("BACKGROUND (after focus, do not extract):\n");
        prompt.push_str(&request.context_after);
        prompt.push_str("\n\n");
    }

    if let Some(note) = &request.corrective_note {
        prompt.push_str("CORRECTION:\n");
        prompt.push_str(note);
        prompt.push('\n');
    }

    prompt
}

/// Follow-up note after a response failed schema validation. The raw response
/// is arbitrary model output, so the excerpt is cut on a char boundary.
pub fn build_schema_retry_note(reason: &str, raw: &str) -> String {
    let truncated: String = raw.chars().take(500).collect();
    format!(
        "Your previous response was rejected: {}. It began:\n{}\nRespond again with ONLY a valid JSON object matching the schema, no markdown, no code blocks.",
        reason, truncated
    )
}
