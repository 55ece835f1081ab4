use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Node granting every permission.
pub const GLOBAL_WILDCARD: &str = "*";

/// Prefix marking an explicit negation.
pub const NEGATION_PREFIX: char = '-';

/// Trims and lowercases one permission node, returning `None` for blank input.
#[must_use]
pub fn normalize_permission(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_lowercase())
}

/// Flattened set of effective permission nodes.
///
/// Nodes are stored lowercased. Entries starting with `-` are explicit
/// negations, `*` grants everything and `a.b.*` grants every node below `a.b`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    nodes: HashSet<String>,
}

impl PermissionSet {
    /// Creates an empty permission set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one node, normalizing it first.
    pub fn insert(&mut self, node: &str) {
        if let Some(node) = normalize_permission(node) {
            self.nodes.insert(node);
        }
    }

    /// Returns whether the exact normalized node is present.
    #[must_use]
    pub fn contains(&self, node: &str) -> bool {
        normalize_permission(node).is_some_and(|node| self.nodes.contains(node.as_str()))
    }

    /// Returns the number of stored nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates stored nodes in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    /// Evaluates one permission query.
    ///
    /// Precedence: explicit negation denies, then exact match, the global
    /// wildcard and dot-delimited prefix wildcards allow. Anything else denies.
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        let Some(permission) = normalize_permission(permission) else {
            return false;
        };

        if self
            .nodes
            .contains(format!("{NEGATION_PREFIX}{permission}").as_str())
        {
            return false;
        }

        if self.nodes.contains(permission.as_str()) || self.nodes.contains(GLOBAL_WILDCARD) {
            return true;
        }

        permission
            .match_indices('.')
            .any(|(index, _)| self.nodes.contains(format!("{}.*", &permission[..index]).as_str()))
    }
}

impl<S: AsRef<str>> FromIterator<S> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for node in iter {
            set.insert(node.as_ref());
        }
        set
    }
}

impl<S: AsRef<str>> Extend<S> for PermissionSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for node in iter {
            self.insert(node.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::PermissionSet;

    fn set(nodes: &[&str]) -> PermissionSet {
        nodes.iter().copied().collect()
    }

    #[test]
    fn exact_grant_allows() {
        assert!(set(&["chat.color"]).has_permission("chat.color"));
    }

    #[test]
    fn missing_grant_denies() {
        assert!(!set(&["chat.color"]).has_permission("chat.format"));
        assert!(!PermissionSet::new().has_permission("chat.color"));
    }

    #[test]
    fn query_is_case_insensitive() {
        let permissions = set(&["Chat.Color"]);
        assert!(permissions.has_permission("CHAT.color"));
    }

    #[test]
    fn prefix_wildcard_covers_children_only() {
        let permissions = set(&["x.y.*"]);
        assert!(permissions.has_permission("x.y.z"));
        assert!(permissions.has_permission("x.y.z.w"));
        assert!(!permissions.has_permission("x"));
        assert!(!permissions.has_permission("x.y"));
        assert!(!permissions.has_permission("x.yz.a"));
    }

    #[test]
    fn negation_overrides_prefix_wildcard() {
        let permissions = set(&["-x.y", "x.y.*", "x.*"]);
        assert!(!permissions.has_permission("x.y"));
        assert!(permissions.has_permission("x.y.z"));
    }

    #[test]
    fn negation_overrides_global_wildcard() {
        let permissions = set(&["*", "-specific.perm"]);
        assert!(!permissions.has_permission("specific.perm"));
        assert!(permissions.has_permission("anything.else"));
    }

    #[test]
    fn negation_overrides_exact_grant() {
        let permissions = set(&["fly", "-fly"]);
        assert!(!permissions.has_permission("fly"));
    }

    #[test]
    fn blank_query_denies() {
        assert!(!set(&["*"]).has_permission("  "));
    }

    fn node() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-z]{1,4}", 1..4).prop_map(|segments| segments.join("."))
    }

    proptest! {
        #[test]
        fn negation_always_wins(permission in node(), extra in prop::collection::vec(node(), 0..6)) {
            let mut permissions: PermissionSet = extra.iter().collect();
            permissions.insert("*");
            permissions.insert(permission.as_str());
            permissions.insert(format!("{permission}.*").as_str());
            permissions.insert(format!("-{permission}").as_str());

            prop_assert!(!permissions.has_permission(permission.as_str()));
        }

        #[test]
        fn global_wildcard_allows_anything_not_negated(permission in node()) {
            let permissions = set(&["*"]);
            prop_assert!(permissions.has_permission(permission.as_str()));
        }

        #[test]
        fn prefix_wildcard_never_grants_its_own_prefix(prefix in node(), child in "[a-z]{1,4}") {
            let permissions: PermissionSet = [format!("{prefix}.*")].iter().collect();

            prop_assert!(!permissions.has_permission(prefix.as_str()));
            let child_node = format!("{prefix}.{child}");
            prop_assert!(permissions.has_permission(child_node.as_str()));
        }
    }
}
