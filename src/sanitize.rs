use regex::Regex;
use std::sync::OnceLock;

/// Backend error bodies are cut to this many characters before they are logged.
pub const LOG_BODY_LIMIT: usize = 512;

pub fn allow_raw_output() -> bool {
    std::env::var("FORMULATE_ALLOW_RAW_OUTPUT")
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

pub fn strip_ansi(input: &str) -> String {
    // Remove common ANSI CSI sequences (e.g., ESC[...m)
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == 0x1b && i + 1 < bytes.len() && bytes[i + 1] == b'[' {
            i += 2;
            while i < bytes.len() {
                let b = bytes[i];
                i += 1;
                if (0x40..=0x7e).contains(&b) {
                    break;
                }
            }
            continue;
        }

        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).to_string()
}

/// Strip escape sequences and redact credentials from text that came back
/// from a remote service before it reaches a log line or the console.
pub fn sanitize_for_log(input: &str) -> String {
    if allow_raw_output() {
        return input.to_string();
    }

    redact(&strip_ansi(input))
}

pub fn sanitize_preview(input: &str, max_chars: usize) -> String {
    truncate_chars(&sanitize_for_log(input), max_chars)
}

pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    let total = s.chars().count();
    if total <= max_chars {
        return s.to_string();
    }

    let truncated: String = s.chars().take(max_chars).collect();
    format!(
        "{truncated}... [truncated {} chars]",
        total.saturating_sub(max_chars)
    )
}

fn redact(input: &str) -> String {
    static BEARER_RE: OnceLock<Regex> = OnceLock::new();
    static SK_RE: OnceLock<Regex> = OnceLock::new();
    static URL_CREDS_RE: OnceLock<Regex> = OnceLock::new();
    static KV_RE: OnceLock<Regex> = OnceLock::new();

    let bearer_re = BEARER_RE
        .get_or_init(|| Regex::new(r"(?i)\b(bearer)\s+[A-Za-z0-9._\-~+/]+=*").expect("bearer regex"));
    let sk_re = SK_RE.get_or_init(|| Regex::new(r"\bsk-[A-Za-z0-9_\-]{10,}\b").expect("sk regex"));
    let url_creds_re = URL_CREDS_RE.get_or_init(|| {
        Regex::new(r"(https?://)([^/\s:@]+):([^/\s@]+)@").expect("url creds regex")
    });
    let kv_re = KV_RE.get_or_init(|| {
        Regex::new(
            r#"(?i)(api[_-]?key|access[_-]?token|token|secret|password)(["']?\s*[:=]\s*["']?)([^\s"'\r\n,}]+)"#,
        )
        .expect("kv regex")
    });

    let mut s = input.to_string();
    s = bearer_re.replace_all(&s, "$1 [REDACTED]").to_string();
    s = url_creds_re.replace_all(&s, "$1$2:[REDACTED]@").to_string();
    s = sk_re.replace_all(&s, "sk-[REDACTED]").to_string();
    s = kv_re.replace_all(&s, "$1$2[REDACTED]").to_string();

    s
}
