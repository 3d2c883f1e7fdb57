//! # Targets
//!
//! The shapes a caller may pass when asking about, or assigning, a role or a
//! permission. Every shape reduces to a list of single leaves evaluated with
//! short-circuit OR.

use crate::records::{PermissionRecord, RoleRecord};

/// A role or permission reference supplied by a caller.
///
/// # Example
///
/// ```
/// use rolegate_rbac::{PermissionTarget, Target};
///
/// // A plain name
/// let single = PermissionTarget::from("posts.view");
/// assert!(matches!(single, Target::Name(_)));
///
/// // A pipe list is a set of alternatives
/// let any = PermissionTarget::from("posts.view | posts.edit");
/// assert_eq!(any.flatten().len(), 2);
///
/// // Ids and lists work too
/// let ids = PermissionTarget::from(vec![1u64, 2, 3]);
/// assert_eq!(ids.flatten().len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target<R> {
    /// Lookup by name
    Name(String),
    /// Lookup by primary key
    Id(u64),
    /// An already resolved record
    Record(R),
    /// Alternatives (pipe list, array)
    AnyOf(Vec<Target<R>>),
}

/// Target resolving to a permission.
pub type PermissionTarget = Target<PermissionRecord>;

/// Target resolving to a role.
pub type RoleTarget = Target<RoleRecord>;

/// An enum-like value whose string form names a role or permission.
///
/// Host applications implement this on their own permission enums and pass
/// them through [`Target::backed`].
pub trait Backed {
    /// The name this value stands for.
    fn value(&self) -> &str;
}

impl<R> Target<R> {
    /// Build a target from a backed enum value.
    pub fn backed(value: &impl Backed) -> Self {
        Self::from(value.value())
    }

    /// Collect every leaf (name, id or record), depth first.
    pub fn flatten(&self) -> Vec<&Target<R>> {
        let mut leaves = Vec::new();
        let mut stack = vec![self];
        while let Some(target) = stack.pop() {
            match target {
                Target::AnyOf(items) => stack.extend(items.iter().rev()),
                leaf => leaves.push(leaf),
            }
        }
        leaves
    }

    /// Consume the target into its leaves, depth first.
    pub fn into_leaves(self) -> Vec<Target<R>> {
        let mut leaves = Vec::new();
        let mut stack = vec![self];
        while let Some(target) = stack.pop() {
            match target {
                Target::AnyOf(items) => stack.extend(items.into_iter().rev()),
                leaf => leaves.push(leaf),
            }
        }
        leaves
    }

    /// Human readable description, used in denial and error messages.
    pub fn describe(&self) -> String
    where
        R: crate::records::AccessRecord,
    {
        self.flatten()
            .into_iter()
            .map(|leaf| match leaf {
                Target::Name(name) => name.clone(),
                Target::Id(id) => format!("#{}", id),
                Target::Record(record) => record.name().to_string(),
                Target::AnyOf(_) => String::new(),
            })
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Split a pipe-delimited list of names.
///
/// One pair of matching surrounding quotes is stripped first, then each part
/// is trimmed and empty parts are dropped.
///
/// # Example
///
/// ```
/// use rolegate_rbac::parse_pipe_list;
///
/// assert_eq!(parse_pipe_list("'Editor|Author'"), vec!["Editor", "Author"]);
/// assert_eq!(parse_pipe_list(" posts.view "), vec!["posts.view"]);
/// assert!(parse_pipe_list("").is_empty());
/// ```
pub fn parse_pipe_list(input: &str) -> Vec<String> {
    let trimmed = input.trim();
    let unquoted = ['\'', '"']
        .iter()
        .find_map(|quote| {
            trimmed
                .strip_prefix(*quote)
                .and_then(|rest| rest.strip_suffix(*quote))
        })
        .unwrap_or(trimmed);

    unquoted
        .split('|')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(String::from)
        .collect()
}

impl<R> From<&str> for Target<R> {
    fn from(value: &str) -> Self {
        if !value.contains('|') {
            return Target::Name(value.trim().to_string());
        }
        let mut names = parse_pipe_list(value);
        if names.len() == 1 {
            return Target::Name(names.remove(0));
        }
        Target::AnyOf(names.into_iter().map(Target::Name).collect())
    }
}

impl<R> From<String> for Target<R> {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl<R> From<&String> for Target<R> {
    fn from(value: &String) -> Self {
        Self::from(value.as_str())
    }
}

impl<R> From<u64> for Target<R> {
    fn from(id: u64) -> Self {
        Target::Id(id)
    }
}

impl From<PermissionRecord> for PermissionTarget {
    fn from(record: PermissionRecord) -> Self {
        Target::Record(record)
    }
}

impl From<&PermissionRecord> for PermissionTarget {
    fn from(record: &PermissionRecord) -> Self {
        Target::Record(record.clone())
    }
}

impl From<RoleRecord> for RoleTarget {
    fn from(record: RoleRecord) -> Self {
        Target::Record(record)
    }
}

impl From<&RoleRecord> for RoleTarget {
    fn from(record: &RoleRecord) -> Self {
        Target::Record(record.clone())
    }
}

impl<R, T: Into<Target<R>>> From<Vec<T>> for Target<R> {
    fn from(items: Vec<T>) -> Self {
        Target::AnyOf(items.into_iter().map(Into::into).collect())
    }
}

impl<R, T: Clone + Into<Target<R>>> From<&[T]> for Target<R> {
    fn from(items: &[T]) -> Self {
        Target::AnyOf(items.iter().cloned().map(Into::into).collect())
    }
}

impl<R, T: Into<Target<R>>, const N: usize> From<[T; N]> for Target<R> {
    fn from(items: [T; N]) -> Self {
        Target::AnyOf(items.into_iter().map(Into::into).collect())
    }
}
