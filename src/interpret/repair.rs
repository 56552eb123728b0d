//! Pure text-to-text repairs for JSON produced by text-completion models.
//!
//! Every function here takes the text as-is and returns a rewritten copy.
//! None of them guarantee the result parses; the interpreter feeds each
//! output to a strict parser and keeps the first one that succeeds.

use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Return the body of the first fenced code block (optionally tagged
/// `json`), or the input unchanged when there is no complete fence.
pub fn strip_code_fence(text: &str) -> &str {
    static FENCE_RE: OnceLock<Regex> = OnceLock::new();
    let fence_re = FENCE_RE.get_or_init(|| {
        Regex::new(r"(?s)```[ \t]*(?:json|JSON)?[ \t]*\r?\n?(.*?)```").expect("fence regex")
    });

    fence_re
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|body| body.as_str().trim())
        .unwrap_or(text)
}

/// Replace curly quotation marks with their ASCII counterparts.
pub fn normalize_quotes(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}' => '"',
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' => '\'',
            other => other,
        })
        .collect()
}

pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

pub fn normalize(text: &str) -> String {
    normalize_line_endings(&normalize_quotes(text))
}

/// The span from the first `{` to the last `}` inclusive, if the first
/// precedes the last.
pub fn object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Double-quoted string literal, escapes included. Matched first by both
/// rewrites so nothing inside a valid string is touched.
const STRING_LITERAL: &str = r#""(?:[^"\\]|\\.)*""#;

/// Rewrite bare (`key:`) and single-quoted (`'key':`) object keys as
/// double-quoted keys. String literals are copied through unchanged.
pub fn quote_keys(text: &str) -> String {
    static KEY_RE: OnceLock<Regex> = OnceLock::new();
    let key_re = KEY_RE.get_or_init(|| {
        Regex::new(&format!(
            r#"{STRING_LITERAL}|'(?:[^'\\\n]|\\.)*'|([{{,]\s*)(?:'([^'\\\n]*)'|([A-Za-z_$][A-Za-z0-9_$\-]*))\s*:"#
        ))
        .expect("key regex")
    });

    key_re
        .replace_all(text, |caps: &Captures| {
            let Some(prefix) = caps.get(1) else {
                return caps[0].to_string();
            };
            let key = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            format!("{}\"{}\":", prefix.as_str(), key.replace('"', "\\\""))
        })
        .into_owned()
}

/// Rewrite single-quoted string values (after `:`, or as array elements)
/// as double-quoted strings, escaping any embedded double quotes.
/// String literals are copied through unchanged.
pub fn quote_single_values(text: &str) -> String {
    static VALUE_RE: OnceLock<Regex> = OnceLock::new();
    let value_re = VALUE_RE.get_or_init(|| {
        Regex::new(&format!(r#"{STRING_LITERAL}|([:\[,]\s*)'((?:[^'\\\n]|\\.)*)'"#))
            .expect("value regex")
    });

    value_re
        .replace_all(text, |caps: &Captures| {
            let Some(prefix) = caps.get(1) else {
                return caps[0].to_string();
            };
            let inner = caps[2].replace("\\'", "'").replace('"', "\\\"");
            format!("{}\"{}\"", prefix.as_str(), inner)
        })
        .into_owned()
}

/// Repair candidates tried, in order, against the `{ ... }` span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repair {
    Raw,
    QuotedKeys,
    QuotedKeysAndValues,
}

impl Repair {
    pub const ORDER: [Repair; 3] = [Repair::Raw, Repair::QuotedKeys, Repair::QuotedKeysAndValues];

    pub fn name(&self) -> &'static str {
        match self {
            Repair::Raw => "raw",
            Repair::QuotedKeys => "quoted_keys",
            Repair::QuotedKeysAndValues => "quoted_keys_and_values",
        }
    }

    pub fn apply(&self, span: &str) -> String {
        match self {
            Repair::Raw => span.to_string(),
            Repair::QuotedKeys => quote_keys(span),
            Repair::QuotedKeysAndValues => quote_single_values(&quote_keys(span)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tagged_fence() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nThanks";
        assert_eq!(strip_code_fence(text), "{\"a\": 1}");
    }

    #[test]
    fn strips_untagged_fence() {
        assert_eq!(strip_code_fence("```\n[1, 2]\n```"), "[1, 2]");
    }

    #[test]
    fn unterminated_fence_is_left_alone() {
        let text = "```json\n{\"a\": 1}";
        assert_eq!(strip_code_fence(text), text);
    }

    #[test]
    fn normalizes_smart_quotes() {
        assert_eq!(
            normalize_quotes("{\u{201C}a\u{201D}: \u{2018}b\u{2019}}"),
            "{\"a\": 'b'}"
        );
    }

    #[test]
    fn normalizes_line_endings() {
        assert_eq!(normalize_line_endings("a\r\nb\rc\n"), "a\nb\nc\n");
    }

    #[test]
    fn object_span_requires_ordered_braces() {
        assert_eq!(object_span("noise {\"a\": {}} tail"), Some("{\"a\": {}}"));
        assert_eq!(object_span("} backwards {"), None);
        assert_eq!(object_span("no braces"), None);
    }

    #[test]
    fn quotes_bare_and_single_quoted_keys() {
        assert_eq!(
            quote_keys("{name: \"x\", 'cost_per_kg': 2, \"ok\": true}"),
            "{\"name\": \"x\", \"cost_per_kg\": 2, \"ok\": true}"
        );
    }

    #[test]
    fn quotes_nested_keys() {
        assert_eq!(
            quote_keys("{outer: {inner: 1}}"),
            "{\"outer\": {\"inner\": 1}}"
        );
    }

    #[test]
    fn quotes_single_quoted_values_and_escapes() {
        assert_eq!(
            quote_single_values("{\"a\": 'say \"hi\"', \"b\": ['x', 'y']}"),
            "{\"a\": \"say \\\"hi\\\"\", \"b\": [\"x\", \"y\"]}"
        );
    }

    #[test]
    fn unescapes_single_quotes_in_values() {
        assert_eq!(
            quote_single_values("{\"a\": 'it\\'s'}"),
            "{\"a\": \"it's\"}"
        );
    }

    #[test]
    fn leaves_key_lookalikes_inside_strings_alone() {
        assert_eq!(
            quote_keys("{name: \"Oats, note: toasted\", count: 2}"),
            "{\"name\": \"Oats, note: toasted\", \"count\": 2}"
        );
        assert_eq!(
            quote_keys("{tip: 'stir, then: rest', n: 1}"),
            "{\"tip\": 'stir, then: rest', \"n\": 1}"
        );
    }

    #[test]
    fn leaves_single_quotes_inside_strings_alone() {
        assert_eq!(
            quote_single_values("{\"a\": \"x, 'y'\", \"b\": 'z'}"),
            "{\"a\": \"x, 'y'\", \"b\": \"z\"}"
        );
    }

    #[test]
    fn repair_order_is_fixed() {
        let names: Vec<_> = Repair::ORDER.iter().map(Repair::name).collect();
        assert_eq!(names, ["raw", "quoted_keys", "quoted_keys_and_values"]);
        assert_eq!(
            Repair::QuotedKeysAndValues.apply("{a: 'b'}"),
            "{\"a\": \"b\"}"
        );
    }
}
