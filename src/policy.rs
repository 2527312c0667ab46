//! Entry selection and path-safety policy
//!
//! Selection runs include/exclude glob lists over the stored entry name.
//! An entry passes when no exclude matches and either no includes are
//! configured or at least one include matches. Includes that never match
//! anything are reported after the run.

use glob::{MatchOptions, Pattern};

use crate::error::{Result, ZuError};

/// Compiled include/exclude pattern sets with per-include match tracking.
pub struct Selector {
    includes: Vec<(Pattern, String, bool)>,
    excludes: Vec<Pattern>,
    options: MatchOptions,
}

impl Selector {
    pub fn new(includes: &[String], excludes: &[String], case_insensitive: bool) -> Result<Self> {
        let options = MatchOptions {
            case_sensitive: !case_insensitive,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        let compile = |p: &String| {
            Pattern::new(p).map_err(|e| ZuError::Usage(format!("bad pattern {}: {}", p, e)))
        };
        let includes = includes
            .iter()
            .map(|p| Ok((compile(p)?, p.clone(), false)))
            .collect::<Result<Vec<_>>>()?;
        let excludes = excludes.iter().map(compile).collect::<Result<Vec<_>>>()?;
        Ok(Selector {
            includes,
            excludes,
            options,
        })
    }

    /// Does `name` pass the policy? Marks any include it satisfies.
    pub fn matches(&mut self, name: &str) -> bool {
        if self
            .excludes
            .iter()
            .any(|p| p.matches_with(name, self.options))
        {
            return false;
        }
        if self.includes.is_empty() {
            return true;
        }
        let mut hit = false;
        for (pattern, _, matched) in self.includes.iter_mut() {
            if pattern.matches_with(name, self.options) {
                *matched = true;
                hit = true;
            }
        }
        hit
    }

    /// Include patterns that matched nothing over the whole run.
    pub fn unmatched_includes(&self) -> Vec<&str> {
        self.includes
            .iter()
            .filter(|(_, _, matched)| !matched)
            .map(|(_, text, _)| text.as_str())
            .collect()
    }

    pub fn has_includes(&self) -> bool {
        !self.includes.is_empty()
    }
}

/// Reject names that could escape the extraction root: absolute paths,
/// `..` segments, embedded NUL bytes.
pub fn reject_unsafe_path(name: &str) -> Result<()> {
    let unsafe_name = name.starts_with('/')
        || name.contains('\0')
        || name.split('/').any(|seg| seg == "..");
    if unsafe_name {
        return Err(ZuError::Usage(format!("unsafe path in archive: {}", name)));
    }
    Ok(())
}

/// Basename used when junk-paths mode drops directory components.
pub fn junk_basename(name: &str) -> &str {
    let trimmed = name.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => &trimmed[pos + 1..],
        None => trimmed,
    }
}

/// Normalize a filesystem path into an archive name: strip leading `./`,
/// collapse backslashes, drop any leading slashes.
pub fn archive_name_for(path: &str) -> String {
    let mut name = path.replace('\\', "/");
    while let Some(rest) = name.strip_prefix("./") {
        name = rest.to_string();
    }
    while name.starts_with('/') {
        name.remove(0);
    }
    name
}
