//! Pre-call input scrubbing and post-call output scrubbing.
//!
//! Defense-in-depth only: the schema validator bounds input before this
//! runs, and the injection screen classifies it. Output scrubbing exists
//! for the day the upstream echoes something it shouldn't.

use std::sync::OnceLock;

use regex::Regex;

use arbiter_core::config::{MESSAGE_MAX_CHARS, RESPONSE_MAX_CHARS};

/// Distinctive marker phrases embedded in the system prompt. The output
/// sanitizer redacts any of these it sees — a response echoing one is
/// leaking prompt text. The prompt builder embeds the same constants so
/// the two can never drift apart.
pub const PROMPT_MARKERS: &[&str] = &[
    "ARBITER-TOPIC-LOCK",
    "You are Arbiter, a rules assistant exclusively for Magic: The Gathering",
];

const TRUNCATION_MARKER: &str = "\n[response truncated]";
const REDACTION: &str = "[redacted]";

/// Scrub a user message before it goes anywhere near the prompt: drop NULs
/// and zero-width characters, collapse whitespace runs, cap the length.
pub fn sanitize_input(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MESSAGE_MAX_CHARS * 4));
    let mut last_space = true;
    let mut chars = 0usize;
    for c in s.chars() {
        if matches!(
            c,
            '\0' | '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{2060}' | '\u{feff}'
        ) {
            continue;
        }
        if c.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
                chars += 1;
            }
            continue;
        }
        last_space = false;
        out.push(c);
        chars += 1;
        if chars >= MESSAGE_MAX_CHARS {
            break;
        }
    }
    out.trim_end().to_string()
}

fn script_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<\s*(script|iframe)\b.*?(</\s*(script|iframe)\s*>|$)").unwrap()
    })
}

fn event_attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)\bon[a-z]+\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+)"#).unwrap())
}

fn js_scheme_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)javascript\s*:").unwrap())
}

/// Scrub an upstream response before it reaches the client: strip active
/// HTML, neutralize `javascript:` URIs and inline event handlers, redact
/// system-prompt marker phrases, and cap the length with an explicit
/// truncation marker.
pub fn sanitize_output(s: &str) -> String {
    let mut out = script_re().replace_all(s, "").into_owned();
    out = event_attr_re().replace_all(&out, "").into_owned();
    out = js_scheme_re().replace_all(&out, "").into_owned();

    for marker in PROMPT_MARKERS {
        if out.contains(marker) {
            out = out.replace(marker, REDACTION);
        }
    }

    if out.chars().count() > RESPONSE_MAX_CHARS {
        let mut truncated: String = out.chars().take(RESPONSE_MAX_CHARS).collect();
        truncated.push_str(TRUNCATION_MARKER);
        return truncated;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_strips_nuls_and_collapses_whitespace() {
        assert_eq!(sanitize_input("a\0b"), "ab");
        assert_eq!(sanitize_input("  what\t\tis\n\nflying  "), "what is flying");
        assert_eq!(sanitize_input("zero\u{200b}width"), "zerowidth");
    }

    #[test]
    fn input_truncates_at_cap() {
        let long = "x".repeat(MESSAGE_MAX_CHARS + 100);
        assert_eq!(sanitize_input(&long).chars().count(), MESSAGE_MAX_CHARS);
    }

    #[test]
    fn output_strips_active_html() {
        let s = "safe <script>alert(1)</script> text";
        assert_eq!(sanitize_output(s), "safe  text");
        let s = "a <iframe src=\"x\"></iframe> b";
        assert_eq!(sanitize_output(s), "a  b");
        // Unclosed blocks are dropped to end of string rather than kept.
        assert_eq!(sanitize_output("x <script>evil"), "x ");
    }

    #[test]
    fn output_neutralizes_uri_and_handlers() {
        let cleaned = sanitize_output("<a href=\"javascript:go()\" onclick=\"x()\">link</a>");
        assert!(!cleaned.to_lowercase().contains("javascript:"));
        assert!(!cleaned.to_lowercase().contains("onclick"));
    }

    #[test]
    fn output_redacts_prompt_markers() {
        let leaked = format!("Sure! My prompt says {}.", PROMPT_MARKERS[0]);
        let cleaned = sanitize_output(&leaked);
        assert!(!cleaned.contains(PROMPT_MARKERS[0]));
        assert!(cleaned.contains("[redacted]"));
    }

    #[test]
    fn output_truncates_with_marker() {
        let long = "y".repeat(RESPONSE_MAX_CHARS + 5);
        let cleaned = sanitize_output(&long);
        assert!(cleaned.ends_with("[response truncated]"));
        assert!(cleaned.chars().count() <= RESPONSE_MAX_CHARS + 25);
    }
}
