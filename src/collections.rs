//! Include/exclude list handling for namespaces and resources

use std::collections::BTreeSet;

/// Wildcard entry matching everything
pub const WILDCARD: &str = "*";

/// Check a pair of include/exclude lists for contradictions.
///
/// Problems are returned in a fixed order so callers can surface them verbatim.
pub fn validate_includes_excludes(includes: &[String], excludes: &[String]) -> Vec<String> {
    let includes: BTreeSet<&str> = includes.iter().map(String::as_str).collect();
    let excludes: BTreeSet<&str> = excludes.iter().map(String::as_str).collect();
    let mut errors = Vec::new();

    if includes.len() > 1 && includes.contains(WILDCARD) {
        errors.push(
            "includes list must either contain '*' only, or a non-empty list of items".to_string(),
        );
    }

    if excludes.contains(WILDCARD) {
        errors.push("excludes list cannot contain '*'".to_string());
    }

    for item in &excludes {
        if includes.contains(item) {
            errors.push(format!(
                "excludes list cannot contain an item in the includes list: {}",
                item
            ));
        }
    }

    errors
}

/// Resolved include/exclude filter.
///
/// Excludes win over includes; an empty include list (or `*`) includes everything.
#[derive(Clone, Debug, Default)]
pub struct IncludesExcludes {
    includes: BTreeSet<String>,
    excludes: BTreeSet<String>,
}

impl IncludesExcludes {
    pub fn new(includes: &[String], excludes: &[String]) -> Self {
        Self {
            includes: includes.iter().cloned().collect(),
            excludes: excludes.iter().cloned().collect(),
        }
    }

    /// Whether `item` passes the filter
    pub fn should_include(&self, item: &str) -> bool {
        if self.excludes.contains(item) {
            return false;
        }
        self.includes_everything() || self.includes.contains(item)
    }

    /// Like [`should_include`](Self::should_include) for an item known by
    /// several names: any exclusion wins, any inclusion suffices.
    pub fn should_include_any(&self, names: &[&str]) -> bool {
        if names.iter().any(|name| self.excludes.contains(*name)) {
            return false;
        }
        self.includes_everything() || names.iter().any(|name| self.includes.contains(*name))
    }

    fn includes_everything(&self) -> bool {
        self.includes.is_empty() || self.includes.contains(WILDCARD)
    }
}
