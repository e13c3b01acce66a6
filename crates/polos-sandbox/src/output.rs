//! Output post-processing, grounded in
//! `examples/original_source/sdk/python/polos/execution/output.py`.

use regex::Regex;
use std::sync::LazyLock;

use crate::types::GrepMatch;

const DEFAULT_MAX_CHARS: usize = 100_000;
const HEAD_RATIO: f64 = 0.2;

static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]").unwrap());
static GREP_LINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.+?):(\d+):(.*)$").unwrap());

/// Keeps the first 20% and last 80% of `max_chars`, with a marker line in
/// between. Returns `(text, was_truncated)`.
pub fn truncate_output(output: &str, max_chars: Option<usize>) -> (String, bool) {
    let max_c = max_chars.unwrap_or(DEFAULT_MAX_CHARS);
    if output.chars().count() <= max_c {
        return (output.to_string(), false);
    }

    let chars: Vec<char> = output.chars().collect();
    let head_size = (max_c as f64 * HEAD_RATIO) as usize;
    let tail_size = max_c - head_size;
    let omitted = chars.len() - head_size - tail_size;

    let head: String = chars[..head_size].iter().collect();
    let tail: String = chars[chars.len() - tail_size..].iter().collect();
    let text = format!("{head}\n\n--- truncated {omitted} characters ---\n\n{tail}");
    (text, true)
}

/// Detects binary content by checking for a null byte in the first 8KB.
pub fn is_binary(data: &[u8]) -> bool {
    let check_len = data.len().min(8192);
    data[..check_len].contains(&0)
}

pub fn strip_ansi(text: &str) -> String {
    ANSI_RE.replace_all(text, "").into_owned()
}

/// Parses `grep -rn` output (`path:line:text`) into structured matches.
pub fn parse_grep_output(output: &str) -> Vec<GrepMatch> {
    output
        .lines()
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let caps = GREP_LINE_RE.captures(line)?;
            Some(GrepMatch {
                path: caps[1].to_string(),
                line: caps[2].parse().ok()?,
                text: caps[3].to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_is_not_truncated() {
        let (text, truncated) = truncate_output("hello", Some(100));
        assert_eq!(text, "hello");
        assert!(!truncated);
    }

    #[test]
    fn long_output_keeps_head_and_tail() {
        let input = "a".repeat(50) + &"b".repeat(50);
        let (text, truncated) = truncate_output(&input, Some(40));
        assert!(truncated);
        assert!(text.starts_with("aaaa"));
        assert!(text.ends_with("bbbb"));
        assert!(text.contains("truncated"));
    }

    #[test]
    fn ansi_codes_are_stripped() {
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m"), "red");
    }

    #[test]
    fn grep_output_parses_path_line_text() {
        let matches = parse_grep_output("src/lib.rs:12:fn main() {}\njunk line\n");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, "src/lib.rs");
        assert_eq!(matches[0].line, 12);
    }

    #[test]
    fn binary_detection_checks_for_null_bytes() {
        assert!(is_binary(&[0x00, 0x01]));
        assert!(!is_binary(b"plain text"));
    }
}
