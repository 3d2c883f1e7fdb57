//! # Wildcard Permissions
//!
//! Decides whether a held permission pattern implies a requested permission.
//!
//! A `*` in the held pattern matches any run of characters, delimiters
//! included, so `admin.*` implies both `admin.create` and
//! `admin.users.delete`. Everything else in the pattern is literal. Patterns
//! are anchored at both ends and compared case-insensitively. Only the held
//! side may generalize: `admin.create` never implies `admin.*`.

use regex::Regex;

use crate::error::{RbacError, RbacResult};
use crate::records::AccessRecord;

/// Marker that turns a permission name into a pattern.
pub const WILDCARD: char = '*';

/// A compiled held permission pattern.
///
/// # Example
///
/// ```
/// use rolegate_rbac::WildcardMatcher;
///
/// let matcher = WildcardMatcher::new("a.*.c").unwrap();
/// assert!(matcher.implies("a.b.c"));
/// assert!(matcher.implies("A.X.Y.C"));
/// assert!(!matcher.implies("a.b.d"));
/// ```
#[derive(Debug, Clone)]
pub struct WildcardMatcher {
    pattern: String,
    compiled: Option<Regex>,
}

impl WildcardMatcher {
    /// Compile a held permission name.
    ///
    /// Names without `*` are kept as-is and only match themselves exactly.
    ///
    /// # Errors
    ///
    /// Returns `InvalidWildcardInput` if the pattern cannot be compiled.
    pub fn new(pattern: impl Into<String>) -> RbacResult<Self> {
        let pattern = pattern.into();
        let compiled = if contains_wildcard(&pattern) {
            let body = pattern
                .split(WILDCARD)
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*");
            let regex = Regex::new(&format!("(?i)^{}$", body))
                .map_err(|e| RbacError::InvalidWildcardInput(format!("{}: {}", pattern, e)))?;
            Some(regex)
        } else {
            None
        };

        Ok(Self { pattern, compiled })
    }

    /// The held pattern as written.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Check if the pattern contains a wildcard.
    pub fn is_wildcard(&self) -> bool {
        self.compiled.is_some()
    }

    /// Check if the held pattern implies `requested`.
    ///
    /// Guards are not compared here; callers only pass permissions of the
    /// same guard.
    pub fn implies(&self, requested: &str) -> bool {
        if self.pattern == requested {
            return true;
        }
        match &self.compiled {
            Some(regex) => regex.is_match(requested),
            None => false,
        }
    }

    /// Filter `candidates` down to those this pattern implies.
    pub fn matching<'a, T, I>(&self, candidates: I) -> Vec<&'a T>
    where
        T: AccessRecord + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        candidates
            .into_iter()
            .filter(|candidate| self.implies(candidate.name()))
            .collect()
    }
}

/// Check if a permission name contains the wildcard marker.
pub fn contains_wildcard(name: &str) -> bool {
    name.contains(WILDCARD)
}

/// One-shot form of [`WildcardMatcher::implies`].
///
/// # Example
///
/// ```
/// use rolegate_rbac::wildcard::implies;
///
/// assert!(implies("admin.*", "admin.create"));
/// assert!(!implies("admin.create", "admin.*"));
/// assert!(implies("*", "anything.at.all"));
/// ```
pub fn implies(held: &str, requested: &str) -> bool {
    WildcardMatcher::new(held)
        .map(|matcher| matcher.implies(requested))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{PermissionId, PermissionRecord};

    #[test]
    fn test_exact_match_without_wildcard() {
        let matcher = WildcardMatcher::new("posts.edit").unwrap();
        assert!(!matcher.is_wildcard());
        assert!(matcher.implies("posts.edit"));
        assert!(!matcher.implies("posts.edit.own"));
        assert!(!matcher.implies("POSTS.EDIT"));
    }

    #[test]
    fn test_trailing_wildcard_spans_segments() {
        let matcher = WildcardMatcher::new("admin.*").unwrap();
        assert!(matcher.implies("admin.create"));
        assert!(matcher.implies("admin.anything.nested"));
        assert!(matcher.implies("Admin.Create"));
        assert!(!matcher.implies("user.create"));
        assert!(!matcher.implies("xadmin.create"));
    }

    #[test]
    fn test_lone_wildcard_implies_everything() {
        let matcher = WildcardMatcher::new("*").unwrap();
        assert!(matcher.implies("posts.view"));
        assert!(matcher.implies(""));
    }

    #[test]
    fn test_direction_matters() {
        assert!(!implies("admin.create", "admin.*"));
        assert!(implies("admin.*", "admin.*"));
    }

    #[test]
    fn test_literal_characters_are_escaped() {
        let matcher = WildcardMatcher::new("reports.(q1)+.*").unwrap();
        assert!(matcher.implies("reports.(q1)+.export"));
        assert!(!matcher.implies("reportsX(q1)+.export"));
        assert!(!matcher.implies("reports.q1q1.export"));
    }

    #[test]
    fn test_matching_filters_candidates() {
        let candidates = vec![
            PermissionRecord::new(PermissionId(1), "posts.view", "web"),
            PermissionRecord::new(PermissionId(2), "posts.edit", "web"),
            PermissionRecord::new(PermissionId(3), "users.view", "web"),
        ];

        let matcher = WildcardMatcher::new("posts.*").unwrap();
        let matched: Vec<_> = matcher
            .matching(&candidates)
            .into_iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(matched, vec!["posts.view", "posts.edit"]);

        let views = WildcardMatcher::new("*.view").unwrap();
        assert_eq!(views.matching(&candidates).len(), 2);
    }
}
