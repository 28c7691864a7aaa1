//! Helpers for pulling JSON out of free-form LLM replies

use serde_json::Value;

/// Strip Markdown code fences (```json ... ```), including a lone opening or closing fence.
pub fn clean_response(content: &str) -> String {
    let mut content = content.trim();

    if let Some(rest) = content.strip_prefix("```") {
        // Drop the info string ("json", "python", ...) on the opening fence line
        content = match rest.find('\n') {
            Some(pos) if !rest[..pos].contains(['{', '[']) => &rest[pos + 1..],
            _ => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
        };
    }
    if let Some(rest) = content.trim_end().strip_suffix("```") {
        content = rest;
    }

    content.trim().to_string()
}

/// Parse the reply as JSON, falling back to the last balanced object/array embedded in prose.
pub fn parse_lenient(content: &str) -> Option<Value> {
    let cleaned = clean_response(content);
    if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
        return Some(value);
    }

    extract_json_candidates(&cleaned)
        .iter()
        .rev()
        .find_map(|candidate| serde_json::from_str::<Value>(candidate).ok())
}

/// Top-level `{...}` and `[...]` spans, string-literal aware.
pub fn extract_json_candidates(text: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    let mut depth: u32 = 0;
    let mut start: Option<usize> = None;
    let mut in_string = false;
    let mut escape = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' if depth > 0 => in_string = true,
            '{' | '[' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' | ']' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0
                        && let Some(s) = start.take()
                    {
                        candidates.push(text[s..idx + 1].to_string());
                    }
                }
            }
            _ => {}
        }
    }

    candidates
}

pub fn truncate_chars(input: &str, max: usize) -> String {
    let mut out = String::new();
    for (idx, ch) in input.chars().enumerate() {
        if idx >= max {
            out.push_str("...");
            break;
        }
        out.push(ch);
    }
    out
}
