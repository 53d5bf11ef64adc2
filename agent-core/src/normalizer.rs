//! `ArgumentsNormalizer` (spec §4.3): repairs the free-form argument strings
//! LLMs sometimes return into strict JSON so the registry's schema
//! validation can proceed.
//!
//! A JSON retraction: the output is always either syntactically valid JSON
//! or exactly the input (spec §8). Every step below only ever edits toward
//! validity — none of them can turn valid JSON into something else, which
//! is what keeps the function idempotent on its own output.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static BAREWORD_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)(\s*:)"#).unwrap());
static LEADING_NULL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*null\b\s*").unwrap());
static TRAILING_NULL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bnull\s*$").unwrap());
static BAREWORD_CSV: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+(\s*,\s*[A-Za-z0-9_.\-]+)+$").unwrap());

/// Normalizes a raw tool-call `arguments` string into valid JSON.
///
/// Short-circuits when `input` is already strictly valid JSON: parses fully
/// with no trailing tokens, and isn't a JSON string whose own content looks
/// like a JSON object/array (that case still needs the unescape-one-layer
/// step below).
pub fn normalize(input: &str) -> String {
    if is_strict_json_already(input) {
        return input.to_string();
    }

    let mut s = input.to_string();
    s = strip_prefix_nulls(&s);
    s = strip_suffix_nulls_and_peel(&s);
    s = unescape_one_layer_if_quoted(&s);
    s = escape_within_string_values(&s);
    s = quote_bareword_keys(&s);
    s = rebalance_brackets(&s);
    s = drop_illegal_escapes(&s);
    s = wrap_bareword_csv(&s);

    if serde_json::from_str::<Value>(&s).is_ok() {
        s
    } else {
        input.to_string()
    }
}

fn is_strict_json_already(input: &str) -> bool {
    match serde_json::from_str::<Value>(input) {
        Ok(Value::String(text)) => !looks_like_json_text(&text),
        Ok(_) => true,
        Err(_) => false,
    }
}

fn looks_like_json_text(text: &str) -> bool {
    let trimmed = text.trim();
    (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<Value>(trimmed).is_ok()
}

/// Step 1: strip ALL consecutive leading `null` tokens, then require the
/// final remainder to begin with `{`, `[`, or a string literal — reverting
/// to the pre-strip string if it doesn't (so a lone `null 5` is left alone
/// rather than silently losing its `null`).
fn strip_prefix_nulls(input: &str) -> String {
    let original = input.trim_start().to_string();
    let mut rest = original.clone();
    let mut stripped_any = false;
    loop {
        let Some(m) = LEADING_NULL.find(&rest) else {
            break;
        };
        rest = rest[m.end()..].trim_start().to_string();
        stripped_any = true;
    }
    if !stripped_any {
        return rest;
    }
    if rest.starts_with('{') || rest.starts_with('[') || rest.starts_with('"') {
        rest
    } else {
        original
    }
}

/// Step 2: strip trailing `null` tokens, then peel quoted wrappers whose
/// inner content itself ends in `null`, then peel dangling unmatched quote
/// terminators that leave a balanced object/array behind.
fn strip_suffix_nulls_and_peel(input: &str) -> String {
    let mut rest = input.trim_end().to_string();

    loop {
        let trimmed = rest.trim_end().to_string();
        if let Some(m) = TRAILING_NULL.find(&trimmed) {
            if m.end() == trimmed.len() {
                rest = trimmed[..m.start()].trim_end().to_string();
                continue;
            }
        }
        break;
    }

    loop {
        if let Some(inner) = as_quoted_string_contents(&rest) {
            let inner_trimmed = inner.trim_end();
            if let Some(m) = TRAILING_NULL.find(inner_trimmed) {
                if m.end() == inner_trimmed.len() {
                    rest = inner_trimmed[..m.start()].trim_end().to_string();
                    continue;
                }
            }
        }
        break;
    }

    peel_dangling_quote_terminators(&rest)
}

/// If `s` is a single JSON string literal (`"..."`, possibly with escapes),
/// returns its decoded contents.
fn as_quoted_string_contents(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.len() < 2 || !trimmed.starts_with('"') || !trimmed.ends_with('"') {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::String(text)) => Some(text),
        _ => None,
    }
}

/// Drops a trailing stray `"` or `\"` when doing so leaves brace/bracket
/// nesting balanced (e.g. the common `{"a":1}"` artifact).
fn peel_dangling_quote_terminators(s: &str) -> String {
    let mut rest = s.to_string();
    loop {
        let trimmed = rest.trim_end();
        let stripped = if let Some(stripped) = trimmed.strip_suffix("\\\"") {
            Some(stripped)
        } else {
            trimmed.strip_suffix('"')
        };
        let Some(candidate) = stripped else { break };
        if brackets_balanced(candidate) && !brackets_balanced(trimmed) {
            rest = candidate.to_string();
        } else {
            break;
        }
    }
    rest
}

fn brackets_balanced(s: &str) -> bool {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for c in s.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return false;
        }
    }
    depth == 0 && !in_string
}

/// Step 3: if the whole value is a quoted, escaped JSON object/array, peel
/// one layer of quoting/escaping to expose the underlying JSON text.
fn unescape_one_layer_if_quoted(s: &str) -> String {
    if let Some(inner) = as_quoted_string_contents(s) {
        let trimmed = inner.trim();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            return inner;
        }
    }
    s.to_string()
}

/// Step 4: within string values (after a colon, outside the quotes), escape
/// raw control characters and backslashes that would otherwise break
/// parsing. Scans char-by-char tracking whether we're inside a string value.
fn escape_within_string_values(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if !in_string {
            out.push(c);
            if c == '"' {
                in_string = true;
            }
            continue;
        }

        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }

        match c {
            '\\' => {
                out.push(c);
                escaped = true;
            }
            '"' => {
                // Ambiguous: could be the closing quote or a raw quote that
                // needs escaping. Treat it as closing only if what follows
                // (ignoring whitespace) is a structural character.
                let next_structural = chars
                    .peek()
                    .copied()
                    .map(|n| matches!(n, ',' | '}' | ']' | ':') || n.is_whitespace())
                    .unwrap_or(true);
                if next_structural {
                    in_string = false;
                    out.push(c);
                } else {
                    out.push('\\');
                    out.push(c);
                }
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

/// Step 5: quote bareword object keys.
fn quote_bareword_keys(s: &str) -> String {
    BAREWORD_KEY
        .replace_all(s, "$1\"$2\"$3")
        .into_owned()
}

/// Step 6: append missing closers; drop leading excess openers if closers
/// outnumber openers.
fn rebalance_brackets(s: &str) -> String {
    let (mut curly, mut square) = (0i32, 0i32);
    let mut in_string = false;
    let mut escaped = false;
    let mut order = Vec::new();

    for c in s.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => {
                curly += 1;
                order.push('{');
            }
            '[' => {
                square += 1;
                order.push('[');
            }
            '}' => curly -= 1,
            ']' => square -= 1,
            _ => {}
        }
    }

    let mut result = s.to_string();

    if curly < 0 || square < 0 {
        let excess = (-curly).max(0) + (-square).max(0);
        let mut dropped = 0;
        let mut kept = String::with_capacity(result.len());
        for c in result.chars() {
            if dropped < excess && matches!(c, '{' | '[') {
                dropped += 1;
                continue;
            }
            kept.push(c);
        }
        result = kept;
        return rebalance_brackets(&result);
    }

    for opener in order.iter().rev() {
        match opener {
            '{' if curly > 0 => {
                result.push('}');
                curly -= 1;
            }
            '[' if square > 0 => {
                result.push(']');
                square -= 1;
            }
            _ => {}
        }
    }
    result
}

/// Step 7: drop illegal escape backslashes inside strings, keeping only the
/// JSON-legal escape set.
fn drop_illegal_escapes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if c == '"' && (out.is_empty() || !out.ends_with('\\')) {
            in_string = !in_string;
            out.push(c);
            continue;
        }
        if in_string && c == '\\' {
            if let Some(&next) = chars.peek() {
                if matches!(next, '"' | '\'' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') {
                    out.push(c);
                } // else: drop this backslash, keep following char as-is
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// Step 8: if the value has no object/array/string framing but is a
/// comma-separated list of bareword tokens, wrap it as a JSON array.
/// Bareword items are left unquoted (spec §9 open question, resolved here:
/// consistent with treating them as already-JSON-like identifiers rather
/// than inventing string quoting the source never specified).
fn wrap_bareword_csv(s: &str) -> String {
    let trimmed = s.trim();
    if BAREWORD_CSV.is_match(trimmed) {
        format!("[{trimmed}]")
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_valid_json_is_unchanged() {
        let input = r#"{"command":"ls","timeout":10}"#;
        assert_eq!(normalize(input), input);
    }

    #[test]
    fn scenario_1_quoted_escaped_object_with_trailing_null() {
        let input = "\"{\\\"command\\\": \\\"mvn -version\\\", \\\"timeout\\\": 10}\"null";
        let output = normalize(input);
        let value: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["command"], "mvn -version");
        assert_eq!(value["timeout"], 10);
    }

    #[test]
    fn scenario_2_null_prefix_rescue() {
        let input = "null null {\"a\":1}";
        assert_eq!(normalize(input), r#"{"a":1}"#);
    }

    #[test]
    fn scenario_3_unclosed_braces() {
        let input = "{\"a\":1,\"b\":{\"c\":2";
        let output = normalize(input);
        assert_eq!(output, "{\"a\":1,\"b\":{\"c\":2}}");
        assert!(serde_json::from_str::<Value>(&output).is_ok());
    }

    #[test]
    fn bareword_keys_get_quoted() {
        let input = "{command: \"ls\", timeout: 10}";
        let output = normalize(input);
        let value: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["command"], "ls");
    }

    #[test]
    fn bareword_csv_wraps_as_array() {
        assert_eq!(normalize("a, b, c"), "[a, b, c]");
    }

    #[test]
    fn unrepairable_input_is_returned_unchanged() {
        let input = "not json at all {{{";
        assert_eq!(normalize(input), input);
    }

    #[test]
    fn is_idempotent_on_its_own_output() {
        let input = "null {\"a\":1,\"b\":{\"c\":2";
        let once = normalize(input);
        let twice = normalize(&once);
        assert_eq!(once, twice);
    }
}
