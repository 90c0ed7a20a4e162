//! Glob-style matching over FileSet keys.
//!
//! Patterns are compiled once into an anchored regex and never touch the
//! filesystem:
//!
//! | Token | Matches |
//! |-------|---------|
//! | `*` | any run of characters within one segment |
//! | `?` | exactly one character within one segment |
//! | `**` | zero or more whole segments (must be a segment of its own) |
//! | `:name` | one non-empty segment part, captured as `name` |
//!
//! ```text
//! guide/:section/*.md   guide/getting-started/intro.md   section = "getting-started"
//! **/*.md               reference/firmware.md
//! ```

use regex::Regex;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PatternError {
    #[error("empty path pattern")]
    Empty,
    #[error("invalid pattern `{pattern}`: {source}")]
    Invalid {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Captured `:name` segments, by name.
pub type Captures = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct PathMatcher {
    pattern: String,
    regex: Regex,
    names: Vec<String>,
}

impl PathMatcher {
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        let normalized = pattern.trim_start_matches("./").trim_start_matches('/');
        if normalized.is_empty() {
            return Err(PatternError::Empty);
        }
        let (source, names) = compile(normalized);
        let regex = Regex::new(&source).map_err(|source| PatternError::Invalid {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
            names,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Capture names in the order they appear in the pattern.
    pub fn capture_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_captures(&self) -> bool {
        !self.names.is_empty()
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Match and return captured segments; `None` when the path doesn't match.
    pub fn captures(&self, path: &str) -> Option<Captures> {
        let caps = self.regex.captures(path)?;
        Some(
            self.names
                .iter()
                .filter_map(|name| caps.name(name).map(|m| (name.clone(), m.as_str().to_string())))
                .collect(),
        )
    }

    /// Captured values joined in pattern order, used as a grouping key.
    pub fn group_key(&self, captures: &Captures) -> Option<String> {
        if self.names.is_empty() {
            return None;
        }
        let parts: Vec<&str> = self
            .names
            .iter()
            .filter_map(|n| captures.get(n).map(String::as_str))
            .collect();
        Some(parts.join("/"))
    }
}

/// One-shot match without keeping the compiled pattern.
pub fn matches(pattern: &str, path: &str) -> Result<bool, PatternError> {
    Ok(PathMatcher::new(pattern)?.is_match(path))
}

fn compile(pattern: &str) -> (String, Vec<String>) {
    let mut segments: Vec<&str> = pattern.split('/').collect();
    // `a/**/**/b` means the same as `a/**/b`
    segments.dedup_by(|next, prev| *next == "**" && *prev == "**");
    let last = segments.len() - 1;
    let mut out = String::from("^");
    let mut names = Vec::new();
    let mut after_globstar = false;

    for (i, segment) in segments.iter().enumerate() {
        if *segment == "**" {
            out.push_str(match (i == 0, i == last) {
                (true, true) => ".*",
                (true, false) => "(?:[^/]+/)*",
                (false, true) => "(?:/[^/]+)*",
                (false, false) => "(?:/[^/]+)*/",
            });
            after_globstar = true;
            continue;
        }
        if i > 0 && !after_globstar {
            out.push('/');
        }
        after_globstar = false;
        compile_segment(segment, &mut out, &mut names);
    }

    out.push('$');
    (out, names)
}

fn compile_segment(segment: &str, out: &mut String, names: &mut Vec<String>) {
    let chars: Vec<char> = segment.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            ':' if chars
                .get(i + 1)
                .is_some_and(|c| c.is_ascii_alphabetic() || *c == '_') =>
            {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                out.push_str(&format!("(?P<{name}>[^/]+?)"));
                names.push(name);
                i = end;
                continue;
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
}
