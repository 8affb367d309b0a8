use regex::Regex;
use std::sync::OnceLock;

fn punctuation() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[.,!?;:'"]"#).expect("static regex"))
}

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// Normalize text for identity matching: lowercase, strip punctuation,
/// collapse whitespace.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = punctuation().replace_all(&lowered, "");
    whitespace()
        .replace_all(stripped.trim(), " ")
        .into_owned()
}

/// Textual similarity in [0, 1]. Exact match and containment after
/// normalization count as identical; otherwise the shared-word ratio over the
/// longer text decides.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b || a.contains(&b) || b.contains(&a) {
        return 1.0;
    }

    let words_a: Vec<&str> = a.split_whitespace().collect();
    let words_b: Vec<&str> = b.split_whitespace().collect();
    let common = words_a.iter().filter(|w| words_b.contains(w)).count();
    let total = words_a.len().max(words_b.len());
    common as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_punctuation_and_case() {
        assert_eq!(normalize("Read  'Atomic Habits'!"), "read atomic habits");
    }

    #[test]
    fn test_identical_after_normalization() {
        assert_eq!(similarity("Read every day.", "read every day"), 1.0);
    }

    #[test]
    fn test_containment_counts_as_match() {
        assert_eq!(
            similarity("read atomic habits", "you should read atomic habits"),
            1.0
        );
    }

    #[test]
    fn test_partial_word_overlap() {
        let score = similarity("read books every morning", "read magazines every morning");
        assert!(score > 0.7 && score < 1.0);
    }

    #[test]
    fn test_disjoint_texts() {
        assert!(similarity("buy index funds", "stretch before running") < 0.1);
    }

    #[test]
    fn test_empty_never_matches() {
        assert_eq!(similarity("", "anything"), 0.0);
    }
}
