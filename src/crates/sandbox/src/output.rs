//! Output shaping for LLM consumption.

/// Head+tail truncation: keep the first `limit/2` and last `limit - limit/2`
/// characters around a marker noting the original length. Payloads at or
/// under the limit pass through untouched.
///
/// For any input longer than `limit`, the result is exactly
/// `limit + marker.len()` characters.
pub fn shape_output(payload: &str, limit: usize) -> String {
    let chars: Vec<char> = payload.chars().collect();
    if chars.len() <= limit {
        return payload.to_string();
    }
    let head_len = limit / 2;
    let tail_len = limit - head_len;
    let head: String = chars[..head_len].iter().collect();
    let tail: String = chars[chars.len() - tail_len..].iter().collect();
    let marker = truncation_marker(chars.len());
    format!("{head}{marker}{tail}")
}

pub fn truncation_marker(original_len: usize) -> String {
    format!("\n...[truncated, {original_len} chars total]...\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_payload_untouched() {
        assert_eq!(shape_output("hello", 1000), "hello");
    }

    #[test]
    fn exact_limit_untouched() {
        let s = "x".repeat(1000);
        assert_eq!(shape_output(&s, 1000), s);
    }

    #[test]
    fn long_payload_has_exact_length() {
        let s = "a".repeat(5000);
        let shaped = shape_output(&s, 1000);
        let marker = truncation_marker(5000);
        assert_eq!(shaped.chars().count(), 1000 + marker.chars().count());
        assert!(shaped.contains("5000 chars total"));
    }

    #[test]
    fn head_and_tail_survive() {
        let mut s = String::from("HEAD");
        s.push_str(&"-".repeat(2000));
        s.push_str("TAIL");
        let shaped = shape_output(&s, 100);
        assert!(shaped.starts_with("HEAD"));
        assert!(shaped.ends_with("TAIL"));
    }

    #[test]
    fn odd_limit_splits_floor_head() {
        let s = "ab".repeat(600); // 1200 chars
        let shaped = shape_output(&s, 101);
        let marker = truncation_marker(1200);
        assert_eq!(shaped.chars().count(), 101 + marker.chars().count());
        // head gets floor(101/2) = 50, tail gets 51
        let head: String = shaped.chars().take(50).collect();
        assert_eq!(head, s.chars().take(50).collect::<String>());
    }
}
