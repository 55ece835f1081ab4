use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use keystone_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

use crate::role::RoleName;

/// Stored lifecycle status of one role assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    /// Assignment counts towards the identity's roles.
    Active,
    /// Assignment ran past its expiry.
    Expired,
    /// Assignment was revoked by an administrator.
    Removed,
}

impl AssignmentStatus {
    /// Returns a stable storage value for this status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Removed => "removed",
        }
    }
}

impl FromStr for AssignmentStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            "removed" => Ok(Self::Removed),
            _ => Err(AppError::Validation(format!(
                "unknown assignment status value '{value}'"
            ))),
        }
    }
}

/// Role granted to one identity.
///
/// Expiry is evaluated lazily: an active assignment whose `expires_at` lies
/// in the past counts as expired even before its status is written back.
/// Paused assignments hold their remaining duration and never expire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    role_name: RoleName,
    granted_by: String,
    granted_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    paused: bool,
    paused_remaining_seconds: Option<i64>,
    status: AssignmentStatus,
    pending_notification: bool,
}

/// Stored assignment columns used to rebuild an assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAssignment {
    /// Assigned role.
    pub role_name: RoleName,
    /// Actor that granted the role.
    pub granted_by: String,
    /// Grant timestamp.
    pub granted_at: DateTime<Utc>,
    /// Optional expiry timestamp.
    pub expires_at: Option<DateTime<Utc>>,
    /// Paused flag.
    pub paused: bool,
    /// Remaining seconds captured when paused.
    pub paused_remaining_seconds: Option<i64>,
    /// Stored status.
    pub status: AssignmentStatus,
    /// Activation announcement still owed.
    pub pending_notification: bool,
}

impl RoleAssignment {
    /// Creates an active assignment.
    pub fn grant(
        role_name: RoleName,
        granted_by: impl Into<String>,
        granted_at: DateTime<Utc>,
        duration: Option<Duration>,
        pending_notification: bool,
    ) -> AppResult<Self> {
        let granted_by = granted_by.into().trim().to_owned();
        if granted_by.is_empty() {
            return Err(AppError::Validation(
                "assignment granted_by must not be empty".to_owned(),
            ));
        }

        if duration.is_some_and(|duration| duration <= Duration::zero()) {
            return Err(AppError::Validation(
                "assignment duration must be greater than zero".to_owned(),
            ));
        }

        let expires_at = duration
            .map(|duration| {
                granted_at.checked_add_signed(duration).ok_or_else(|| {
                    AppError::Validation(format!(
                        "assignment duration of {} seconds is out of range",
                        duration.num_seconds()
                    ))
                })
            })
            .transpose()?;

        Ok(Self {
            role_name,
            granted_by,
            granted_at,
            expires_at,
            paused: false,
            paused_remaining_seconds: None,
            status: AssignmentStatus::Active,
            pending_notification,
        })
    }

    /// Rebuilds an assignment from stored columns.
    #[must_use]
    pub fn restore(stored: StoredAssignment) -> Self {
        Self {
            role_name: stored.role_name,
            granted_by: stored.granted_by,
            granted_at: stored.granted_at,
            expires_at: stored.expires_at,
            paused: stored.paused,
            paused_remaining_seconds: stored.paused_remaining_seconds,
            status: stored.status,
            pending_notification: stored.pending_notification,
        }
    }

    /// Returns the assigned role.
    #[must_use]
    pub fn role_name(&self) -> &RoleName {
        &self.role_name
    }

    /// Returns the granting actor.
    #[must_use]
    pub fn granted_by(&self) -> &str {
        self.granted_by.as_str()
    }

    /// Returns the grant timestamp.
    #[must_use]
    pub fn granted_at(&self) -> DateTime<Utc> {
        self.granted_at
    }

    /// Returns the expiry timestamp, if the assignment is temporary and running.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Returns whether the assignment clock is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Returns the remaining seconds captured at pause time.
    #[must_use]
    pub fn paused_remaining_seconds(&self) -> Option<i64> {
        self.paused_remaining_seconds
    }

    /// Returns the stored status.
    #[must_use]
    pub fn status(&self) -> AssignmentStatus {
        self.status
    }

    /// Returns whether an activation announcement is still owed.
    #[must_use]
    pub fn pending_notification(&self) -> bool {
        self.pending_notification
    }

    /// Returns whether the stored status is active but the expiry has passed.
    #[must_use]
    pub fn is_lapsed_at(&self, now: DateTime<Utc>) -> bool {
        self.status == AssignmentStatus::Active
            && !self.paused
            && self.expires_at.is_some_and(|expires_at| now > expires_at)
    }

    /// Returns whether the assignment grants its role at `now`.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == AssignmentStatus::Active && !self.paused && !self.is_lapsed_at(now)
    }

    /// Returns whether the assignment still holds its role, running or paused.
    #[must_use]
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.status == AssignmentStatus::Active && !self.is_lapsed_at(now)
    }

    /// Stops the expiry clock, keeping the remaining duration.
    pub fn pause(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        if !self.is_active_at(now) {
            return Err(AppError::Conflict(format!(
                "assignment of role '{}' is not running",
                self.role_name
            )));
        }

        self.paused_remaining_seconds = self
            .expires_at
            .map(|expires_at| (expires_at - now).num_seconds().max(0));
        self.expires_at = None;
        self.paused = true;
        Ok(())
    }

    /// Restarts the expiry clock with the remaining duration captured at pause time.
    pub fn resume(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        if self.status != AssignmentStatus::Active || !self.paused {
            return Err(AppError::Conflict(format!(
                "assignment of role '{}' is not paused",
                self.role_name
            )));
        }

        self.expires_at = self
            .paused_remaining_seconds
            .map(|seconds| {
                Duration::try_seconds(seconds)
                    .and_then(|remaining| now.checked_add_signed(remaining))
                    .ok_or_else(|| {
                        AppError::Validation(format!(
                            "remaining duration of {seconds} seconds is out of range"
                        ))
                    })
            })
            .transpose()?;
        self.paused_remaining_seconds = None;
        self.paused = false;
        Ok(())
    }

    /// Writes back a lazily detected expiry.
    pub fn mark_expired(&mut self) {
        if self.status == AssignmentStatus::Active {
            self.status = AssignmentStatus::Expired;
        }
    }

    /// Revokes the assignment.
    pub fn mark_removed(&mut self) {
        self.status = AssignmentStatus::Removed;
        self.pending_notification = false;
    }

    /// Clears the owed activation announcement.
    pub fn clear_pending_notification(&mut self) {
        self.pending_notification = false;
    }
}
