//! `--only` filter groups.
//!
//! A group is a name prefix split into segments: `functions:api.users`
//! becomes `["api", "users"]` and selects `api-users`, `api-users-get`, ...

use std::fmt;

use crate::domain::function::short_name;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterGroup(Vec<String>);

impl FilterGroup {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Groups from an `--only` selector. Non-function targets are ignored.
    ///
    /// `"functions:a.b,hosting,functions:c-d"` yields `[a, b]` and `[c, d]`.
    pub fn parse_only(only: &str) -> Vec<FilterGroup> {
        only.split(',')
            .filter_map(|target| {
                let (kind, name) = target.trim().split_once(':')?;
                if kind != "functions" || name.is_empty() {
                    return None;
                }
                Some(FilterGroup::new(name.split(['.', '-'])))
            })
            .collect()
    }

    /// Does the function id start with every segment of this group?
    pub fn matches(&self, function_name: &str) -> bool {
        let id = short_name(function_name);
        if id.is_empty() {
            return false;
        }
        let chunks: Vec<&str> = id.split('-').take(self.0.len()).collect();
        chunks.len() == self.0.len() && chunks.iter().zip(&self.0).all(|(chunk, segment)| chunk == segment)
    }
}

impl fmt::Display for FilterGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("-"))
    }
}

/// Groups matching none of `names`, rendered with `-`.
pub fn unmatched<'a>(groups: &[FilterGroup], names: impl IntoIterator<Item = &'a str> + Clone) -> Vec<String> {
    groups
        .iter()
        .filter(|group| !names.clone().into_iter().any(|name| group.matches(name)))
        .map(ToString::to_string)
        .collect()
}
