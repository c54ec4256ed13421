//! Ready condition bookkeeping shared by all resource kinds.
//!
//! Every resource carries exactly one condition of type `Ready`. Its
//! `lastTransitionTime` only moves when the condition's status value flips; a new
//! reason or message alone keeps the original timestamp.

use chrono::DateTime;
use chrono::Utc;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::events;

pub const READY: &str = "Ready";

/// Condition status following Kubernetes conventions.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, strum::Display)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// Reasons used by Ready conditions and by the events emitted alongside them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::AsRefStr)]
pub enum Reason {
    Ready,
    Healthy,
    Degraded,
    Unavailable,
    ConnectionError,
    GarageClientError,
    ChildResourcesExist,
    InstanceNotFound,
    SyntaxError,
    KubernetesError,
    OwnerReferenceError,
    UnknownGarageState,
    PermissionsIncomplete,
    FinalizationError,
    Provisioned,
    CleanedUp,
}

impl events::Reason for Reason {}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// The Ready condition a reconcile wants to report, before it is timestamped.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadyCondition {
    pub status: ConditionStatus,
    pub reason: Reason,
    pub message: String,
}

impl ReadyCondition {
    pub fn ready(reason: Reason, message: impl Into<String>) -> Self {
        Self {
            status: ConditionStatus::True,
            reason,
            message: message.into(),
        }
    }

    pub fn not_ready(reason: Reason, message: impl Into<String>) -> Self {
        Self {
            status: ConditionStatus::False,
            reason,
            message: message.into(),
        }
    }

    pub fn unknown(reason: Reason, message: impl Into<String>) -> Self {
        Self {
            status: ConditionStatus::Unknown,
            reason,
            message: message.into(),
        }
    }
}

/// Status objects carrying a list of conditions.
pub trait HasConditions {
    fn conditions(&self) -> &[Condition];

    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    fn ready(&self) -> Option<&Condition> {
        self.conditions().iter().find(|condition| condition.type_ == READY)
    }

    /// Replaces the Ready condition, keeping its transition time unless the status flips.
    fn set_ready(&mut self, ready: &ReadyCondition, now: DateTime<Utc>) {
        let conditions = self.conditions_mut();

        let last_transition_time = conditions
            .iter()
            .find(|condition| condition.type_ == READY)
            .filter(|condition| condition.status == ready.status)
            .map_or(now, |condition| condition.last_transition_time);

        let condition = Condition {
            type_: READY.to_owned(),
            status: ready.status,
            reason: ready.reason.to_string(),
            message: ready.message.clone(),
            last_transition_time,
        };

        match conditions.iter().position(|condition| condition.type_ == READY) {
            Some(index) => {
                conditions[index] = condition;
                let mut seen = 0;
                conditions.retain(|condition| {
                    if condition.type_ != READY {
                        return true;
                    }
                    seen += 1;
                    seen == 1
                });
            }
            None => conditions.push(condition),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[derive(Default)]
    struct TestStatus {
        conditions: Vec<Condition>,
    }

    impl HasConditions for TestStatus {
        fn conditions(&self) -> &[Condition] {
            &self.conditions
        }

        fn conditions_mut(&mut self) -> &mut Vec<Condition> {
            &mut self.conditions
        }
    }

    #[test]
    fn test_set_ready_appends_when_missing() {
        // Given: a status without conditions
        let mut status = TestStatus::default();
        let now = Utc::now();

        // When: reporting ready
        status.set_ready(&ReadyCondition::ready(Reason::Ready, "Bucket is ready"), now);

        // Then: one Ready condition stamped with now
        let ready = status.ready().unwrap();
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(ready.status, ConditionStatus::True);
        assert_eq!(ready.reason, "Ready");
        assert_eq!(ready.last_transition_time, now);
    }

    #[test]
    fn test_same_status_keeps_transition_time() {
        // Given: a Ready=False condition from an earlier reconcile
        let mut status = TestStatus::default();
        let earlier = Utc::now() - Duration::minutes(10);
        status.set_ready(&ReadyCondition::not_ready(Reason::InstanceNotFound, "missing"), earlier);

        // When: reporting False again with another reason and message
        let now = Utc::now();
        status.set_ready(&ReadyCondition::not_ready(Reason::GarageClientError, "unreachable"), now);

        // Then: reason and message change, the timestamp does not
        let ready = status.ready().unwrap();
        assert_eq!(ready.reason, "GarageClientError");
        assert_eq!(ready.message, "unreachable");
        assert_eq!(ready.last_transition_time, earlier);
    }

    #[test]
    fn test_status_flip_stamps_new_transition_time() {
        // Given: a Ready=False condition from an earlier reconcile
        let mut status = TestStatus::default();
        let earlier = Utc::now() - Duration::minutes(10);
        status.set_ready(&ReadyCondition::not_ready(Reason::ConnectionError, "down"), earlier);

        // When: the status flips to True
        let now = Utc::now();
        status.set_ready(&ReadyCondition::ready(Reason::Healthy, "Nodes: 3/3"), now);

        // Then: the transition time moves
        assert_eq!(status.ready().unwrap().last_transition_time, now);
    }

    #[test]
    fn test_duplicate_ready_conditions_collapse() {
        // Given: a status that somehow carries two Ready conditions and another type
        let stale = Condition {
            type_: READY.into(),
            status: ConditionStatus::Unknown,
            reason: "Old".into(),
            message: String::new(),
            last_transition_time: Utc::now(),
        };
        let other = Condition {
            type_: "Synced".into(),
            ..stale.clone()
        };
        let mut status = TestStatus {
            conditions: vec![stale.clone(), other.clone(), stale],
        };

        // When: setting Ready
        status.set_ready(&ReadyCondition::ready(Reason::Ready, "ok"), Utc::now());

        // Then: exactly one Ready remains and unrelated conditions survive
        let ready_count = status.conditions.iter().filter(|c| c.type_ == READY).count();
        assert_eq!(ready_count, 1);
        assert!(status.conditions.contains(&other));
    }

    #[test]
    fn test_condition_serializes_kubernetes_style() {
        let condition = Condition {
            type_: READY.into(),
            status: ConditionStatus::False,
            reason: Reason::ChildResourcesExist.to_string(),
            message: "blocked".into(),
            last_transition_time: DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
                .unwrap()
                .with_timezone(&Utc),
        };

        let json = serde_json::to_value(&condition).unwrap();

        assert_eq!(json["type"], "Ready");
        assert_eq!(json["status"], "False");
        assert_eq!(json["reason"], "ChildResourcesExist");
        assert_eq!(json["lastTransitionTime"], "2026-01-02T03:04:05Z");
    }
}
