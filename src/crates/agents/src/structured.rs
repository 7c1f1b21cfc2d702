//! Structured-output parsing and repair.
//!
//! Models are asked for JSON (or a single XML tag for the router); what they
//! send back is often *almost* that. The helpers here pull the parseable
//! core out of surrounding prose and code fences; the fixing loop in the
//! runtime re-asks with [`repair_prompt`] when even that fails.

use serde_json::Value;

/// Extract the first JSON object or array embedded in `text`.
///
/// Tries, in order: the whole string, a ```json fenced block, and the first
/// balanced `{...}` span.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }

    if let Some(fenced) = extract_fenced(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(fenced.trim()) {
            return Some(v);
        }
    }

    let start = trimmed.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in trimmed[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &trimmed[start..start + offset + ch.len_utf8()];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

fn extract_fenced(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

/// Extract the inner text of the first `<tag>...</tag>` occurrence.
pub fn extract_tag(text: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    Some(text[start..end].trim().to_string())
}

/// Prompt for the fixing stream: same schema, the broken attempt, one job.
pub fn repair_prompt(schema_hint: &str, bad_output: &str) -> String {
    format!(
        "Your previous reply could not be parsed.\n\
         Reply again with ONLY valid JSON matching this schema, no prose:\n\
         {schema_hint}\n\n\
         Previous reply:\n{bad_output}"
    )
}
