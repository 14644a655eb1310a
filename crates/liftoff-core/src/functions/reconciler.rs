//! Desired vs existing functions: what to create, update and delete.

use std::collections::BTreeSet;

use serde::Serialize;

use super::filter::{FilterGroup, unmatched};
use crate::domain::ExistingFunction;

/// Label key marking functions deployed by this tool.
pub const DEPLOYMENT_TOOL_LABEL: &str = "deployment-tool";

pub const TOOL_NAME: &str = "liftoff";

/// Decides which existing functions this tool may delete.
///
/// A function is owned when its source archive is the one this deploy
/// uploaded (or a configured legacy location), or when it carries this
/// tool's `deployment-tool` label.
#[derive(Debug, Clone, PartialEq)]
pub struct Ownership {
    pub source_url: String,
    pub legacy_source_urls: Vec<String>,
    pub tool_label: Option<String>,
}

impl Ownership {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            legacy_source_urls: Vec::new(),
            tool_label: Some(TOOL_NAME.to_string()),
        }
    }

    pub fn legacy_source_url(mut self, url: impl Into<String>) -> Self {
        self.legacy_source_urls.push(url.into());
        self
    }

    /// `None` disables label based ownership.
    pub fn tool_label(mut self, label: Option<String>) -> Self {
        self.tool_label = label;
        self
    }

    pub fn owns(&self, function: &ExistingFunction) -> bool {
        let by_source = function
            .source_archive_url
            .as_deref()
            .is_some_and(|url| url == self.source_url || self.legacy_source_urls.iter().any(|legacy| legacy == url));
        let by_label = self
            .tool_label
            .as_deref()
            .is_some_and(|tool| function.labels.get(DEPLOYMENT_TOOL_LABEL).map(String::as_str) == Some(tool));
        by_source || by_label
    }
}

/// Pairwise disjoint sets of function names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FunctionDiff {
    pub create: BTreeSet<String>,
    pub update: BTreeSet<String>,
    pub delete: BTreeSet<String>,
}

impl FunctionDiff {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    pub fn len(&self) -> usize {
        self.create.len() + self.update.len() + self.delete.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleasePlan {
    pub diff: FunctionDiff,

    /// Names acted upon after filtering.
    pub release_names: BTreeSet<String>,

    /// Filter groups that match no function, rendered with `-`.
    pub unmatched_filters: Vec<String>,
}

/// Compute the release plan.
///
/// Without filters every uploaded function is released and every owned
/// function that was not uploaded is deleted. With filters both sides are
/// restricted to matching names. Functions not owned by this tool are never
/// deleted.
pub fn plan<S: AsRef<str>>(
    uploaded: &[S],
    existing: &[ExistingFunction],
    filters: &[FilterGroup],
    ownership: &Ownership,
) -> ReleasePlan {
    let uploaded: BTreeSet<&str> = uploaded.iter().map(AsRef::as_ref).collect();
    let existing_names: BTreeSet<&str> = existing.iter().map(|f| f.name.as_str()).collect();
    let all: BTreeSet<&str> = uploaded.union(&existing_names).copied().collect();

    let release_names: BTreeSet<&str> = if filters.is_empty() {
        uploaded.clone()
    } else {
        all.iter()
            .copied()
            .filter(|name| filters.iter().any(|group| group.matches(name)))
            .collect()
    };
    let delete_scope = if filters.is_empty() {
        &existing_names
    } else {
        &release_names
    };

    let create = uploaded
        .iter()
        .filter(|name| !existing_names.contains(*name) && release_names.contains(*name))
        .map(|name| name.to_string())
        .collect();
    let update = uploaded
        .iter()
        .filter(|name| existing_names.contains(*name) && release_names.contains(*name))
        .map(|name| name.to_string())
        .collect();
    let delete = existing
        .iter()
        .filter(|function| ownership.owns(function))
        .map(|function| function.name.as_str())
        .filter(|name| !uploaded.contains(name) && delete_scope.contains(name))
        .map(str::to_string)
        .collect();

    let unmatched_filters = unmatched(filters, all.iter().copied());
    if !unmatched_filters.is_empty() {
        tracing::warn!(
            filters = %unmatched_filters.join(", "),
            "the following filters were specified but do not match any functions in the project"
        );
    }

    ReleasePlan {
        diff: FunctionDiff { create, update, delete },
        release_names: release_names.into_iter().map(str::to_string).collect(),
        unmatched_filters,
    }
}
