//! Status conditions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical readiness condition of packages and revisions
pub const TYPE_HEALTHY: &str = "Healthy";

/// Dependency signal of a revision, independent of `Healthy`
pub const TYPE_DEPENDENCIES_SATISFIED: &str = "DependenciesSatisfied";

/// Condition reasons
pub mod reasons {
    pub const HEALTHY_PACKAGE_REVISION: &str = "HealthyPackageRevision";
    pub const UNHEALTHY_PACKAGE_REVISION: &str = "UnhealthyPackageRevision";
    pub const AWAITING_CONTROLLER: &str = "AwaitingController";
    pub const INVALID_PACKAGE_CONTENTS: &str = "InvalidPackageContents";
    pub const INCOMPATIBLE_PLATFORM_VERSION: &str = "IncompatiblePlatformVersion";
    pub const OBJECT_CONFLICT: &str = "ObjectConflict";

    pub const AWAITING_REVISION: &str = "AwaitingRevision";
    pub const REVISION_CREATION_FAILED: &str = "RevisionCreationFailed";
    pub const REVISION_UPDATE_FAILED: &str = "RevisionUpdateFailed";
    pub const REVISION_DELETION_FAILED: &str = "RevisionDeletionFailed";
    pub const SOURCE_RESOLUTION_FAILED: &str = "SourceResolutionFailed";

    pub const DEPENDENCIES_INSTALLED: &str = "DependenciesInstalled";
    pub const DEPENDENCIES_PENDING: &str = "DependenciesPending";
    pub const DEPENDENCIES_INVALID: &str = "DependenciesInvalid";
    pub const DEPENDENCY_RESOLUTION_SKIPPED: &str = "DependencyResolutionSkipped";
}

/// Status of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// An observation about an object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(type_: &str, status: ConditionStatus, reason: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason: reason.to_string(),
            message: String::new(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Placeholder for a condition that was never reported
    pub fn unknown(type_: &str) -> Self {
        Self::new(type_, ConditionStatus::Unknown, "")
    }

    /// `Healthy=True`
    pub fn healthy() -> Self {
        Self::new(
            TYPE_HEALTHY,
            ConditionStatus::True,
            reasons::HEALTHY_PACKAGE_REVISION,
        )
    }

    /// `Healthy=False` with a reason
    pub fn unhealthy(reason: &str, message: impl Into<String>) -> Self {
        Self::new(TYPE_HEALTHY, ConditionStatus::False, reason).with_message(message)
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    /// Same observation, regardless of when it was made
    pub fn same_as(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Set a condition, replacing any of the same type.
///
/// An identical observation keeps the existing entry and its transition time.
/// Returns whether anything changed.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) if existing.same_as(&condition) => false,
        Some(existing) => {
            *existing = condition;
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_set_condition_preserves_transition_time() {
        let mut conditions = Vec::new();
        let mut first = Condition::healthy();
        first.last_transition_time = Utc::now() - Duration::hours(1);
        let original_time = first.last_transition_time;

        assert!(set_condition(&mut conditions, first));
        assert!(!set_condition(&mut conditions, Condition::healthy()));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, original_time);

        assert!(set_condition(
            &mut conditions,
            Condition::unhealthy(reasons::OBJECT_CONFLICT, "taken")
        ));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, ConditionStatus::False);
        assert!(conditions[0].last_transition_time > original_time);
    }

    #[test]
    fn test_conditions_of_different_types_coexist() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, Condition::healthy());
        set_condition(
            &mut conditions,
            Condition::new(
                TYPE_DEPENDENCIES_SATISFIED,
                ConditionStatus::False,
                reasons::DEPENDENCIES_INVALID,
            ),
        );
        assert_eq!(conditions.len(), 2);
        assert!(find_condition(&conditions, TYPE_HEALTHY).unwrap().is_true());
        assert!(!find_condition(&conditions, TYPE_DEPENDENCIES_SATISFIED).unwrap().is_true());
    }

    #[test]
    fn test_condition_serialization() {
        let c = Condition::unhealthy(reasons::INVALID_PACKAGE_CONTENTS, "bad yaml");
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["type"], "Healthy");
        assert_eq!(json["status"], "False");
        assert_eq!(json["reason"], "InvalidPackageContents");
        assert!(json["lastTransitionTime"].is_string());
    }
}
