use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use keystone_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

use crate::permission::normalize_permission;

/// Maximum accepted role name length.
pub const ROLE_NAME_MAX_LENGTH: usize = 32;

/// Lowercase role identifier, unique across the network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoleName(String);

impl RoleName {
    /// Creates a validated role name.
    ///
    /// Input is trimmed and lowercased; the result must be 1 to 32 characters of
    /// `a-z`, `0-9`, `_` or `-`.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into().trim().to_lowercase();

        if value.is_empty() {
            return Err(AppError::Validation(
                "role name must not be empty".to_owned(),
            ));
        }

        if value.chars().count() > ROLE_NAME_MAX_LENGTH {
            return Err(AppError::Validation(format!(
                "role name must not exceed {ROLE_NAME_MAX_LENGTH} characters"
            )));
        }

        if let Some(invalid) = value
            .chars()
            .find(|character| !matches!(character, 'a'..='z' | '0'..='9' | '_' | '-'))
        {
            return Err(AppError::Validation(format!(
                "role name '{value}' contains invalid character '{invalid}'"
            )));
        }

        Ok(Self(value))
    }

    /// Returns the role name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for RoleName {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

impl FromStr for RoleName {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::new(value)
    }
}

impl TryFrom<String> for RoleName {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoleName> for String {
    fn from(value: RoleName) -> Self {
        value.0
    }
}

/// Tiered role category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleType {
    /// Roles every identity may hold without purchase or appointment.
    Default,
    /// Purchased ranks.
    Paid,
    /// Moderation and administration ranks.
    Staff,
}

impl RoleType {
    /// Returns a stable storage value for this role type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Paid => "paid",
            Self::Staff => "staff",
        }
    }
}

impl FromStr for RoleType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "default" => Ok(Self::Default),
            "paid" => Ok(Self::Paid),
            "staff" => Ok(Self::Staff),
            _ => Err(AppError::Validation(format!(
                "unknown role type value '{value}'"
            ))),
        }
    }
}

/// Input payload used to construct a validated role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleInput {
    /// Unique lowercase role name.
    pub name: String,
    /// User-facing role name.
    pub display_name: String,
    /// Text rendered before the identity's name.
    pub prefix: String,
    /// Text rendered after the identity's name.
    pub suffix: String,
    /// Color tag used by chat and tablist rendering.
    pub color: String,
    /// Role category.
    pub role_type: RoleType,
    /// Primary-role priority, higher wins.
    pub weight: i32,
    /// Inherited role names in declaration order.
    pub inherits: Vec<String>,
    /// Directly granted permission nodes.
    pub permissions: Vec<String>,
}

impl RoleInput {
    /// Creates an input for a plain role without display attributes.
    #[must_use]
    pub fn named(name: impl Into<String>, weight: i32) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            prefix: String::new(),
            suffix: String::new(),
            color: String::new(),
            role_type: RoleType::Default,
            weight,
            inherits: Vec::new(),
            permissions: Vec::new(),
        }
    }
}

/// Named, weighted permission and display policy unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    name: RoleName,
    display_name: NonEmptyString,
    prefix: String,
    suffix: String,
    color: String,
    role_type: RoleType,
    weight: i32,
    inherits: Vec<RoleName>,
    permissions: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Role {
    /// Creates a validated role stamped with `now`.
    pub fn new(input: RoleInput, now: DateTime<Utc>) -> AppResult<Self> {
        Self::build(input, now, now)
    }

    /// Rebuilds a role from stored values, keeping the original timestamps.
    pub fn restore(
        input: RoleInput,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> AppResult<Self> {
        Self::build(input, created_at, updated_at)
    }

    /// Returns an updated copy that keeps this role's creation timestamp.
    pub fn updated(&self, input: RoleInput, now: DateTime<Utc>) -> AppResult<Self> {
        let updated = Self::build(input, self.created_at, now)?;
        if updated.name != self.name {
            return Err(AppError::Validation(format!(
                "role '{}' cannot be renamed to '{}'",
                self.name, updated.name
            )));
        }

        Ok(updated)
    }

    /// Creates the universal fallback role.
    pub fn fallback(name: &RoleName, now: DateTime<Utc>) -> AppResult<Self> {
        Self::new(RoleInput::named(name.as_str(), 0), now)
    }

    fn build(
        input: RoleInput,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> AppResult<Self> {
        let RoleInput {
            name,
            display_name,
            prefix,
            suffix,
            color,
            role_type,
            weight,
            inherits,
            permissions,
        } = input;

        let name = RoleName::new(name)?;

        let mut parents: Vec<RoleName> = Vec::with_capacity(inherits.len());
        for parent in inherits {
            let parent = RoleName::new(parent)?;
            if parent == name {
                return Err(AppError::Validation(format!(
                    "role '{name}' must not inherit itself"
                )));
            }
            if !parents.contains(&parent) {
                parents.push(parent);
            }
        }

        let mut nodes: Vec<String> = Vec::with_capacity(permissions.len());
        for permission in permissions {
            if let Some(node) = normalize_permission(permission.as_str())
                && !nodes.contains(&node)
            {
                nodes.push(node);
            }
        }

        Ok(Self {
            name,
            display_name: NonEmptyString::new(display_name)?,
            prefix,
            suffix,
            color,
            role_type,
            weight,
            inherits: parents,
            permissions: nodes,
            created_at,
            updated_at,
        })
    }

    /// Returns the unique role name.
    #[must_use]
    pub fn name(&self) -> &RoleName {
        &self.name
    }

    /// Returns the user-facing role name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.display_name.as_str()
    }

    /// Returns the chat prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.prefix.as_str()
    }

    /// Returns the chat suffix.
    #[must_use]
    pub fn suffix(&self) -> &str {
        self.suffix.as_str()
    }

    /// Returns the color tag.
    #[must_use]
    pub fn color(&self) -> &str {
        self.color.as_str()
    }

    /// Returns the role category.
    #[must_use]
    pub fn role_type(&self) -> RoleType {
        self.role_type
    }

    /// Returns the primary-role priority.
    #[must_use]
    pub fn weight(&self) -> i32 {
        self.weight
    }

    /// Returns directly inherited role names.
    #[must_use]
    pub fn inherits(&self) -> &[RoleName] {
        &self.inherits
    }

    /// Returns directly granted, normalized permission nodes.
    #[must_use]
    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the last update timestamp.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Converts the role back into an editable input payload.
    #[must_use]
    pub fn to_input(&self) -> RoleInput {
        RoleInput {
            name: self.name.as_str().to_owned(),
            display_name: self.display_name.as_str().to_owned(),
            prefix: self.prefix.clone(),
            suffix: self.suffix.clone(),
            color: self.color.clone(),
            role_type: self.role_type,
            weight: self.weight,
            inherits: self
                .inherits
                .iter()
                .map(|parent| parent.as_str().to_owned())
                .collect(),
            permissions: self.permissions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{Role, RoleInput, RoleName};

    #[test]
    fn role_name_is_lowercased() {
        let name = RoleName::new("  Moderator ");
        assert_eq!(name.map(String::from), Ok("moderator".to_owned()));
    }

    #[test]
    fn role_name_rejects_spaces_and_symbols() {
        assert!(RoleName::new("vip plus").is_err());
        assert!(RoleName::new("vip+").is_err());
        assert!(RoleName::new("").is_err());
    }

    #[test]
    fn role_rejects_self_inheritance() {
        let mut input = RoleInput::named("admin", 100);
        input.inherits = vec!["ADMIN".to_owned()];

        assert!(Role::new(input, Utc::now()).is_err());
    }

    #[test]
    fn role_normalizes_and_deduplicates_permissions() {
        let mut input = RoleInput::named("builder", 10);
        input.permissions = vec![
            "World.Edit".to_owned(),
            "world.edit".to_owned(),
            "   ".to_owned(),
            "-World.Delete".to_owned(),
        ];
        input.inherits = vec!["default".to_owned(), "Default".to_owned()];

        let role = Role::new(input, Utc::now()).unwrap_or_else(|_| unreachable!());
        assert_eq!(role.permissions(), ["world.edit", "-world.delete"]);
        assert_eq!(role.inherits().len(), 1);
    }

    #[test]
    fn updated_role_keeps_creation_timestamp() {
        let created = Utc::now() - chrono::Duration::days(3);
        let role = Role::new(RoleInput::named("vip", 20), created).unwrap_or_else(|_| unreachable!());

        let mut input = role.to_input();
        input.weight = 25;
        let updated = role
            .updated(input, Utc::now())
            .unwrap_or_else(|_| unreachable!());

        assert_eq!(updated.created_at(), created);
        assert_eq!(updated.weight(), 25);
        assert!(updated.updated_at() > created);
    }

    #[test]
    fn updated_role_cannot_change_name() {
        let role =
            Role::new(RoleInput::named("vip", 20), Utc::now()).unwrap_or_else(|_| unreachable!());

        let result = role.updated(RoleInput::named("mvp", 20), Utc::now());
        assert!(result.is_err());
    }
}
