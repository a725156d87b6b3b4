//! Minimal `*`-wildcard glob matching.
//!
//! Generalizes a literal resource check (`rule.resource == "*" ||
//! rule.resource == request.resource`) to patterns with any number of `*`
//! segments, used for both `resourceExpression` permission matching and
//! the `Match` condition built-in.

/// Returns true if `pattern` matches the whole of `s`. `*` matches any
/// run of characters (including none); there is no escaping and no other
/// wildcard character, matching the PDL's glob dialect.
pub fn matches(pattern: &str, s: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == s;
    }

    let mut rest = s;

    // First segment must be a literal prefix (unless pattern starts with '*').
    if let Some(first) = segments.first() {
        if !first.is_empty() {
            if !rest.starts_with(first) {
                return false;
            }
            rest = &rest[first.len()..];
        }
    }

    // Last segment must be a literal suffix (unless pattern ends with '*').
    let last = segments.last().unwrap();
    if !last.is_empty() {
        if !rest.ends_with(last) {
            return false;
        }
        rest = &rest[..rest.len() - last.len()];
    }

    // Middle segments must appear in order, non-overlapping.
    for seg in &segments[1..segments.len() - 1] {
        if seg.is_empty() {
            continue;
        }
        match rest.find(seg) {
            Some(idx) => rest = &rest[idx + seg.len()..],
            None => return false,
        }
    }

    true
}
