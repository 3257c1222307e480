//! Fact extraction prompt and response parsing.

/// Temperature for fact extraction calls.
pub const FACT_EXTRACTION_TEMPERATURE: f32 = 0.1;

/// Upper bound on facts kept from a single reply.
pub const MAX_FACTS: usize = 10;

pub const FACT_EXTRACTION_PROMPT: &str = r#"Extract the key facts from the text below.

Return ONLY a JSON array of short strings. Each string must be a single,
self-contained factual sentence that makes sense without the surrounding text.
Skip greetings, opinions, questions and filler. Return [] if there are no facts.

Example: ["The user's name is Ada.", "The user prefers dark mode."]"#;

/// Parse a model reply into a list of facts.
///
/// The reply is expected to be a JSON array of strings, possibly wrapped in a
/// code fence. Anything else is split into lines with list markers stripped.
pub fn parse_facts(reply: &str) -> Vec<String> {
    let body = strip_code_fence(reply.trim());

    let facts = match serde_json::from_str::<Vec<serde_json::Value>>(body) {
        Ok(values) => values
            .into_iter()
            .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
            .collect::<Vec<_>>(),
        Err(_) => {
            tracing::debug!("Fact reply is not a JSON array, falling back to line splitting");
            body.lines().map(strip_list_marker).map(str::to_string).collect()
        }
    };

    facts
        .into_iter()
        .filter(|f| !f.is_empty() && f != "[]")
        .take(MAX_FACTS)
        .collect()
}

/// Remove a surrounding ``` fence (with or without a language tag).
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    for marker in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return rest.trim();
        }
    }
    // Numbered lists: "1. fact" or "1) fact"
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return rest.trim();
        }
    }
    line
}
