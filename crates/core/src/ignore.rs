//! Glob-based ignore matching for status and scanning
//!
//! A path is ignored when any ignore pattern matches it and no include
//! pattern (a `!`-negated line from a user ignore file) matches it back in.
//! Matching is case-insensitive and dotfile-aware.

use crate::path::normalize;
use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use std::path::Path;

/// Patterns every repository ignores: OS litter, editor droppings, VCS
/// metadata, and the snow commondir itself.
const BUILTIN_PATTERNS: &[&str] = &[
    "**/.snow",
    "**/.snow/**",
    "**/.snowignore",
    "**/.DS_Store",
    "**/thumbs.db",
    "**/desktop.ini",
    "**/.git",
    "**/.git/**",
    "**/backup/**",
    "**/*.bkp",
    "**/tmp/**",
    "**/cache/**",
    "**/*.lnk",
    "**/*.log",
    "**/.idea/**",
    "**/.Spotlight-V100",
    "**/.Trashes",
    "**/$RECYCLE.BIN/**",
    "**/._*",
    "**/~$*",
    "**/*.swp",
    "**/*.blend[0-9]",
    "**/*.blend[0-9][0-9]",
];

fn match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: false,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

/// Decides whether a relative path is ignored
#[derive(Debug)]
pub struct IgnoreMatcher {
    ignore: Vec<Pattern>,
    include: Vec<Pattern>,
}

impl IgnoreMatcher {
    /// Create a matcher holding only the built-in patterns
    pub fn new() -> Self {
        // Built-ins are spelled out exactly; the `/**` sibling rule only
        // applies to user ignore-file lines.
        let ignore = BUILTIN_PATTERNS
            .iter()
            .map(|p| Pattern::new(p).expect("built-in ignore pattern is valid"))
            .collect();
        Self {
            ignore,
            include: Vec::new(),
        }
    }

    /// Append the patterns of a user ignore file.
    ///
    /// One pattern per line; a leading `!` negates; `//` line comments and
    /// `/* ... */` block comments are stripped; blank lines are skipped.
    /// A pattern that does not end with `/` also gains a `<pattern>/**`
    /// sibling so the entry matches as a directory.
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read ignore file {}", path.display()))?;
        self.load_string(&content);
        Ok(())
    }

    /// Same as [`load_file`](Self::load_file) over an in-memory string
    pub fn load_string(&mut self, content: &str) {
        for line in strip_block_comments(content).lines() {
            let line = match line.find("//") {
                Some(idx) => &line[..idx],
                None => line,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(negated) = line.strip_prefix('!') {
                self.add_include_pattern(negated.trim());
            } else {
                self.add_pattern(line);
            }
        }
    }

    fn add_pattern(&mut self, pat: &str) {
        Self::push_with_dir_sibling(&mut self.ignore, pat);
    }

    fn add_include_pattern(&mut self, pat: &str) {
        Self::push_with_dir_sibling(&mut self.include, pat);
    }

    fn push_with_dir_sibling(dst: &mut Vec<Pattern>, pat: &str) {
        let mut push = |p: &str| match Pattern::new(p) {
            Ok(compiled) => dst.push(compiled),
            Err(e) => tracing::warn!(pattern = p, error = %e, "skipping malformed ignore pattern"),
        };
        if let Some(dir) = pat.strip_suffix('/') {
            push(&format!("{}/**", dir));
        } else {
            push(pat);
            push(&format!("{}/**", pat));
        }
    }

    /// Return true iff the relative path matches an ignore pattern and is
    /// not rescued by an include pattern.
    pub fn ignored(&self, rel_path: &str) -> bool {
        let p = normalize(rel_path);
        let opts = match_options();
        if !self.ignore.iter().any(|pat| pat.matches_with(&p, opts)) {
            return false;
        }
        !self.include.iter().any(|pat| pat.matches_with(&p, opts))
    }
}

impl Default for IgnoreMatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove `/* ... */` comment spans; unterminated blocks run to the end
fn strip_block_comments(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    loop {
        match rest.find("/*") {
            None => {
                out.push_str(rest);
                return out;
            }
            Some(open) => {
                out.push_str(&rest[..open]);
                match rest[open + 2..].find("*/") {
                    Some(close) => rest = &rest[open + 2 + close + 2..],
                    None => return out,
                }
            }
        }
    }
}
