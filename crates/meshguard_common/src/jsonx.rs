//! Best-effort JSON extraction from free-form LLM text.
//!
//! Contract: return the first balanced `{...}` or `[...]` substring of the
//! input, honoring JSON string literals and escapes. LLM output is not
//! guaranteed to be pure JSON; callers must always have a fallback when this
//! returns `None` or the extracted text fails to parse.

/// Extract the first balanced bracketed substring from `text`.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let bytes = text.as_bytes();

    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => stack.push(b'}'),
            b'[' => stack.push(b']'),
            b'}' | b']' => {
                if stack.pop() != Some(b) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }

    None
}
