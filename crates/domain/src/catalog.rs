use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::assignment::RoleAssignment;
use crate::permission::PermissionSet;
use crate::role::{Role, RoleName};

/// Display attributes taken from an identity's primary role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleDisplay {
    /// User-facing role name.
    pub display_name: String,
    /// Chat prefix.
    pub prefix: String,
    /// Chat suffix.
    pub suffix: String,
    /// Color tag.
    pub color: String,
}

impl RoleDisplay {
    fn of(role: &Role) -> Self {
        Self {
            display_name: role.display_name().to_owned(),
            prefix: role.prefix().to_owned(),
            suffix: role.suffix().to_owned(),
            color: role.color().to_owned(),
        }
    }
}

/// Inheritance edge skipped because it points back into the current branch.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct InheritanceCycle {
    /// Role whose inheritance list closes the cycle.
    pub from: RoleName,
    /// Role already on the expansion path.
    pub to: RoleName,
}

/// Outcome of resolving one identity's assignments against the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Highest-weight active role, or the fallback role.
    pub primary_role: RoleName,
    /// Display attributes of the primary role.
    pub display: RoleDisplay,
    /// Union of permissions across the inheritance closure.
    pub permissions: PermissionSet,
    /// Referenced roles absent from the catalog.
    pub missing_roles: BTreeSet<RoleName>,
    /// Inheritance edges skipped to break cycles.
    pub cycles: BTreeSet<InheritanceCycle>,
}

/// In-memory role definitions keyed by role name.
#[derive(Debug, Clone, Default)]
pub struct RoleCatalog {
    roles: HashMap<RoleName, Role>,
}

impl RoleCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog holding the given roles.
    #[must_use]
    pub fn from_roles(roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            roles: roles
                .into_iter()
                .map(|role| (role.name().clone(), role))
                .collect(),
        }
    }

    /// Returns one role definition.
    #[must_use]
    pub fn get(&self, name: &RoleName) -> Option<&Role> {
        self.roles.get(name)
    }

    /// Returns whether the catalog holds the role.
    #[must_use]
    pub fn contains(&self, name: &RoleName) -> bool {
        self.roles.contains_key(name)
    }

    /// Inserts or replaces one role definition.
    pub fn insert(&mut self, role: Role) {
        self.roles.insert(role.name().clone(), role);
    }

    /// Removes one role definition.
    pub fn remove(&mut self, name: &RoleName) -> Option<Role> {
        self.roles.remove(name)
    }

    /// Returns the number of roles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// Returns whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Iterates role definitions in unspecified order.
    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.values()
    }

    /// Returns the inheritance path that `candidate` would close into a cycle.
    ///
    /// The candidate replaces any stored role of the same name for the check.
    #[must_use]
    pub fn cycle_through(&self, candidate: &Role) -> Option<Vec<RoleName>> {
        let mut path = vec![candidate.name().clone()];
        let mut visited = HashSet::new();

        for parent in candidate.inherits() {
            if self.path_back_to(candidate, parent, &mut path, &mut visited) {
                return Some(path);
            }
        }

        None
    }

    fn path_back_to(
        &self,
        candidate: &Role,
        current: &RoleName,
        path: &mut Vec<RoleName>,
        visited: &mut HashSet<RoleName>,
    ) -> bool {
        path.push(current.clone());
        if current == candidate.name() {
            return true;
        }

        if visited.insert(current.clone())
            && let Some(role) = self.roles.get(current)
        {
            for parent in role.inherits() {
                if self.path_back_to(candidate, parent, path, visited) {
                    return true;
                }
            }
        }

        path.pop();
        false
    }

    /// Resolves active assignments into a primary role and permission set.
    ///
    /// Inactive, removed, paused and lapsed assignments are ignored. When no
    /// assignment is active the fallback role is expanded instead. The primary
    /// role is the active, known role with the highest weight; ties go to the
    /// most recent grant.
    #[must_use]
    pub fn resolve(
        &self,
        assignments: &[RoleAssignment],
        fallback_role: &RoleName,
        now: DateTime<Utc>,
    ) -> Resolution {
        let active: Vec<&RoleAssignment> = assignments
            .iter()
            .filter(|assignment| assignment.is_active_at(now))
            .collect();

        let mut roots: Vec<RoleName> = active
            .iter()
            .map(|assignment| assignment.role_name().clone())
            .collect();
        if roots.is_empty() {
            roots.push(fallback_role.clone());
        }

        let mut expansion = Expansion::default();
        for root in &roots {
            self.expand(root, &mut expansion);
        }

        let primary = active
            .iter()
            .filter_map(|assignment| {
                self.roles
                    .get(assignment.role_name())
                    .map(|role| (role, assignment.granted_at()))
            })
            .max_by(|(left, left_granted), (right, right_granted)| {
                left.weight()
                    .cmp(&right.weight())
                    .then(left_granted.cmp(right_granted))
            })
            .map(|(role, _)| role)
            .or_else(|| self.roles.get(fallback_role));

        let (primary_role, display) = match primary {
            Some(role) => (role.name().clone(), RoleDisplay::of(role)),
            None => (fallback_role.clone(), RoleDisplay::default()),
        };

        Resolution {
            primary_role,
            display,
            permissions: expansion.permissions,
            missing_roles: expansion.missing,
            cycles: expansion.cycles,
        }
    }

    fn expand(&self, root: &RoleName, expansion: &mut Expansion) {
        let mut branch = Vec::new();
        self.expand_branch(root, &mut branch, expansion);
    }

    fn expand_branch(
        &self,
        name: &RoleName,
        branch: &mut Vec<RoleName>,
        expansion: &mut Expansion,
    ) {
        if !expansion.visited.insert(name.clone()) {
            return;
        }

        let Some(role) = self.roles.get(name) else {
            expansion.missing.insert(name.clone());
            return;
        };

        expansion.permissions.extend(role.permissions());

        branch.push(name.clone());
        for parent in role.inherits() {
            if branch.contains(parent) {
                expansion.cycles.insert(InheritanceCycle {
                    from: name.clone(),
                    to: parent.clone(),
                });
                continue;
            }
            self.expand_branch(parent, branch, expansion);
        }
        branch.pop();
    }
}

#[derive(Default)]
struct Expansion {
    visited: HashSet<RoleName>,
    permissions: PermissionSet,
    missing: BTreeSet<RoleName>,
    cycles: BTreeSet<InheritanceCycle>,
}
