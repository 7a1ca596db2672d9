//! `.clawkerignore` parsing and matching
//!
//! Gitignore-style patterns consulted when populating a snapshot volume
//! from the source tree. Supported: blank lines and `#` comments, `*` and
//! `?` wildcards, `**` for any depth, trailing `/` for directory-only
//! patterns, and leading `/` to anchor at the workspace root. Negation
//! (`!pattern`) is not supported and such lines are skipped.
//!
//! File-level patterns are only enforceable in snapshot mode; bind mode
//! can mask matching directories with empty overlays but cannot hide
//! individual files of a live mount.

use std::path::Path;
use tracing::warn;

/// A single parsed ignore pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Pattern {
    /// Slash-separated segments, each a glob
    segments: Vec<String>,
    /// Trailing `/`: matches directories only
    dir_only: bool,
    /// Leading `/`: anchored at the root rather than matching at any depth
    anchored: bool,
}

/// A parsed ignore file.
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    patterns: Vec<Pattern>,
}

impl IgnoreSet {
    /// Load `.clawkerignore` from a directory; missing file yields an
    /// empty set.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(crate::paths::ignore_file());
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::from_lines(&text),
            Err(_) => Self::default(),
        }
    }

    /// Parse ignore patterns from text.
    pub fn from_lines(text: &str) -> Self {
        let mut patterns = Vec::new();
        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('!') {
                warn!(pattern = line, "Negation patterns are not supported; skipping");
                continue;
            }
            let dir_only = line.ends_with('/');
            let anchored = line.starts_with('/');
            let trimmed = line.trim_start_matches('/').trim_end_matches('/');
            if trimmed.is_empty() {
                continue;
            }
            patterns.push(Pattern {
                segments: trimmed.split('/').map(str::to_string).collect(),
                dir_only,
                anchored,
            });
        }
        Self { patterns }
    }

    /// Whether any patterns were parsed.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether a file at this workspace-relative path is ignored.
    pub fn matches_file(&self, rel_path: &str) -> bool {
        self.matches(rel_path, false)
    }

    /// Whether a directory at this workspace-relative path is ignored
    /// (its whole subtree is excluded).
    pub fn matches_dir(&self, rel_path: &str) -> bool {
        self.matches(rel_path, true)
    }

    fn matches(&self, rel_path: &str, is_dir: bool) -> bool {
        let rel_path = rel_path.trim_matches('/');
        if rel_path.is_empty() {
            return false;
        }
        let parts: Vec<&str> = rel_path.split('/').collect();
        self.patterns.iter().any(|pattern| {
            if pattern.dir_only && !is_dir {
                return false;
            }
            if pattern.anchored || pattern.segments.len() > 1 {
                match_segments(&pattern.segments, &parts)
            } else {
                // Bare patterns match the basename at any depth.
                parts
                    .last()
                    .is_some_and(|base| glob_match(&pattern.segments[0], base))
            }
        })
    }
}

/// Match pattern segments against path segments, with `**` spanning any
/// number of them.
fn match_segments(pattern: &[String], path: &[&str]) -> bool {
    match (pattern.first(), path.first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some(seg), _) if seg == "**" => {
            if match_segments(&pattern[1..], path) {
                return true;
            }
            match path.first() {
                Some(_) => match_segments(pattern, &path[1..]),
                None => false,
            }
        }
        (Some(_), None) => false,
        (Some(seg), Some(part)) => {
            glob_match(seg, part) && match_segments(&pattern[1..], &path[1..])
        }
    }
}

/// Single-segment glob: `*` matches any run, `?` matches one character.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_match_at(&pattern, &text)
}

fn glob_match_at(pattern: &[char], text: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('*') => {
            (0..=text.len()).any(|skip| glob_match_at(&pattern[1..], &text[skip..]))
        }
        Some('?') => !text.is_empty() && glob_match_at(&pattern[1..], &text[1..]),
        Some(c) => text.first() == Some(c) && glob_match_at(&pattern[1..], &text[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_patterns_match_any_depth() {
        let set = IgnoreSet::from_lines("*.env\n");
        assert!(set.matches_file("secret.env"));
        assert!(set.matches_file("deep/nested/prod.env"));
        assert!(!set.matches_file("env.txt"));
    }

    #[test]
    fn dir_only_patterns_skip_files() {
        let set = IgnoreSet::from_lines("node_modules/\n");
        assert!(set.matches_dir("node_modules"));
        assert!(set.matches_dir("packages/node_modules"));
        assert!(!set.matches_file("node_modules"));
    }

    #[test]
    fn anchored_patterns_match_from_root_only() {
        let set = IgnoreSet::from_lines("/target\n");
        assert!(set.matches_dir("target"));
        assert!(set.matches_file("target"));
        assert!(!set.matches_dir("crates/target"));
    }

    #[test]
    fn multi_segment_patterns_are_anchored() {
        let set = IgnoreSet::from_lines("build/output\n");
        assert!(set.matches_file("build/output"));
        assert!(!set.matches_file("x/build/output"));
    }

    #[test]
    fn double_star_spans_directories() {
        let set = IgnoreSet::from_lines("logs/**/*.log\n");
        assert!(set.matches_file("logs/app.log"));
        assert!(set.matches_file("logs/2024/01/app.log"));
        assert!(!set.matches_file("other/app.log"));
    }

    #[test]
    fn comments_blanks_and_negations_are_skipped() {
        let set = IgnoreSet::from_lines("# comment\n\n!important.env\n*.tmp\n");
        assert!(set.matches_file("a.tmp"));
        assert!(!set.matches_file("important.env"));
    }

    #[test]
    fn question_mark_matches_single_char() {
        let set = IgnoreSet::from_lines("file.?\n");
        assert!(set.matches_file("file.a"));
        assert!(!set.matches_file("file.ab"));
    }

    #[test]
    fn empty_set_matches_nothing() {
        let set = IgnoreSet::from_lines("");
        assert!(set.is_empty());
        assert!(!set.matches_file("anything"));
        assert!(!set.matches_dir("anything"));
    }
}
