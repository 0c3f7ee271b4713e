//! Exclude patterns for local scans
//!
//! Glob syntax: `*` matches within one path component, `**` across components,
//! `?` one character. A pattern without `/` is matched against the file name,
//! a pattern with `/` against the whole relative path.

use regex::Regex;

#[derive(Debug, Clone)]
struct Pattern {
    regex: Regex,
    match_name_only: bool,
}

/// Compiled set of exclude globs
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    patterns: Vec<Pattern>,
}

impl ExcludeSet {
    pub fn new<S: AsRef<str>>(globs: &[S]) -> Result<Self, regex::Error> {
        let patterns = globs
            .iter()
            .map(|glob| {
                let glob = glob.as_ref().trim_start_matches("./");
                Ok(Pattern {
                    regex: Regex::new(&glob_to_regex(glob))?,
                    match_name_only: !glob.contains('/'),
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether `relative_path` (`/`-separated) is excluded
    pub fn matches(&self, relative_path: &str) -> bool {
        let name = relative_path.rsplit('/').next().unwrap_or(relative_path);
        self.patterns.iter().any(|p| {
            if p.match_name_only {
                p.regex.is_match(name)
            } else {
                p.regex.is_match(relative_path)
            }
        })
    }
}

/// Translate a glob into an anchored regex
pub fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    // `**/` also matches zero directories
                    chars.next();
                    out.push_str("(?:.*/)?");
                } else {
                    out.push_str(".*");
                }
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    out.push('$');
    out
}
