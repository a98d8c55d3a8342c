/// Canonical key for fuzzy-matching free text across entities: lowercase,
/// alphanumerics and single spaces only. Every dedupe pass and every
/// holding/symbol match in this crate goes through this one function.
pub fn normalize_text_key(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;
    for ch in input.trim().chars() {
        let ch = ch.to_ascii_lowercase();
        if ch.is_ascii_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(ch);
        } else if ch.is_whitespace() {
            pending_space = true;
        }
        // Punctuation is dropped without acting as a separator.
    }
    out
}

/// Node-key slug for a causal-effect description: normalized key truncated
/// to 80 chars, with a fixed fallback for descriptions that normalize away
/// to nothing.
pub fn node_key_from_description(description: &str) -> String {
    let key = normalize_text_key(description);
    let truncated: String = key.chars().take(80).collect();
    if truncated.is_empty() {
        "macro-node".to_string()
    } else {
        truncated
    }
}

/// Exposure-factor column key a node shock is matched against. Universe
/// headers normalize to `[a-z0-9_]` while node keys keep spaces, so spaces
/// become underscores here. Matching is best-effort: an LLM-authored
/// description is not guaranteed to collapse onto any factor the universe
/// defines, and a miss simply contributes zero.
pub fn exposure_factor_key(node_key: &str) -> String {
    format!("exp_{}", node_key.replace(' ', "_"))
}

/// Collapse internal whitespace and hard-truncate to `max` chars. Applied to
/// every free-text field of the reasoning output before validation.
pub fn clamp_text(value: &str, max: usize) -> String {
    let compact = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.chars().count() <= max {
        return compact;
    }
    let cut: String = compact.chars().take(max.saturating_sub(1)).collect();
    cut.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_punctuation_and_collapses_whitespace() {
        assert_eq!(normalize_text_key("  Rates,  UP!  "), "rates up");
        assert_eq!(normalize_text_key("A"), normalize_text_key("A!"));
    }

    #[test]
    fn punctuation_is_not_a_separator() {
        assert_eq!(normalize_text_key("semi-conductor"), "semiconductor");
    }

    #[test]
    fn node_key_truncates_and_falls_back() {
        let long = "x".repeat(200);
        assert_eq!(node_key_from_description(&long).chars().count(), 80);
        assert_eq!(node_key_from_description("!!!"), "macro-node");
        assert_eq!(node_key_from_description(""), "macro-node");
    }

    #[test]
    fn factor_key_uses_underscores() {
        assert_eq!(exposure_factor_key("rates up"), "exp_rates_up");
    }

    #[test]
    fn clamp_text_truncates_hard() {
        assert_eq!(clamp_text("  a   b  c ", 100), "a b c");
        let clamped = clamp_text(&"word ".repeat(50), 20);
        assert!(clamped.chars().count() < 20);
        assert!(!clamped.ends_with(' '));
    }
}
