//! Command allowlisting and path-restriction checks, grounded in
//! `examples/original_source/sdk/python/polos/execution/security.py`.

use std::path::{Path, PathBuf};

/// Matches `text` against a glob pattern where `*` matches any run of
/// characters; every other character is literal.
pub fn match_glob(text: &str, pattern: &str) -> bool {
    let mut regex_str = String::from("^");
    for ch in pattern.chars() {
        if ch == '*' {
            regex_str.push_str(".*");
        } else if ".+?^${}()|[]\\".contains(ch) {
            regex_str.push('\\');
            regex_str.push(ch);
        } else {
            regex_str.push(ch);
        }
    }
    regex_str.push('$');
    regex::Regex::new(&regex_str).map(|re| re.is_match(text)).unwrap_or(false)
}

/// Whether `command` matches any glob pattern in `patterns`, after trimming.
pub fn evaluate_allowlist(command: &str, patterns: &[String]) -> bool {
    let trimmed = command.trim();
    patterns.iter().any(|pattern| match_glob(trimmed, pattern))
}

pub fn is_within_restriction(resolved_path: &Path, restriction: &Path) -> bool {
    resolved_path == restriction || resolved_path.starts_with(restriction)
}

/// Resolves `file_path` relative to `restriction` and errors if it escapes.
pub fn assert_safe_path(file_path: &str, restriction: &Path) -> Result<PathBuf, String> {
    let resolved = restriction.join(file_path);
    let resolved = normalize(&resolved);
    if !is_within_restriction(&resolved, restriction) {
        return Err(format!("Path traversal detected: \"{file_path}\" resolves outside of \"{}\"", restriction.display()));
    }
    Ok(resolved)
}

/// Lexical `..`/`.` normalization without touching the filesystem, since the
/// path may not exist yet (e.g. a `write` target).
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_wildcard_matches_any_suffix() {
        assert!(match_glob("npm install lodash", "npm *"));
        assert!(match_glob("anything at all", "*"));
        assert!(!match_glob("rm -rf /", "npm *"));
    }

    #[test]
    fn allowlist_trims_before_matching() {
        let patterns = vec!["git *".to_string()];
        assert!(evaluate_allowlist("  git status  ", &patterns));
        assert!(!evaluate_allowlist("curl evil.com", &patterns));
    }

    #[test]
    fn path_traversal_outside_restriction_is_rejected() {
        let restriction = PathBuf::from("/workspace");
        assert!(assert_safe_path("../etc/passwd", &restriction).is_err());
        assert!(assert_safe_path("src/lib.rs", &restriction).is_ok());
    }
}
