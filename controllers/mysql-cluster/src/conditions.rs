//! Status condition bookkeeping.
//!
//! `lastTransitionTime` only moves when a condition's status flips; reason and
//! message updates keep the original timestamp.

use chrono::{DateTime, Utc};
use crds::{ClusterConditionType, Condition, ConditionStatus};

/// Freshly evaluated state of one condition type
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionUpdate {
    pub r#type: ClusterConditionType,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
}

impl ConditionUpdate {
    pub fn new(
        r#type: ClusterConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            r#type,
            status,
            reason: reason.into(),
            message: message.into(),
        }
    }
}

/// Returns `existing` with `update` merged in.
///
/// Other condition types pass through untouched, and duplicates of the
/// updated type collapse into a single entry.
pub fn set_condition(
    existing: &[Condition],
    update: ConditionUpdate,
    now: DateTime<Utc>,
) -> Vec<Condition> {
    let previous = existing.iter().find(|c| c.r#type == update.r#type);
    let last_transition_time = match previous {
        Some(prev) if prev.status == update.status => prev.last_transition_time.or(Some(now)),
        _ => Some(now),
    };
    let updated = Condition {
        r#type: update.r#type,
        status: update.status,
        reason: update.reason,
        message: update.message,
        last_transition_time,
    };

    let mut conditions = Vec::with_capacity(existing.len().max(1));
    let mut placed = false;
    for condition in existing {
        if condition.r#type != updated.r#type {
            conditions.push(condition.clone());
        } else if !placed {
            conditions.push(updated.clone());
            placed = true;
        }
    }
    if !placed {
        conditions.push(updated);
    }
    conditions
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn ready(status: ConditionStatus, reason: &str) -> ConditionUpdate {
        ConditionUpdate::new(ClusterConditionType::Ready, status, reason, "")
    }

    #[test]
    fn test_new_condition_gets_current_time() {
        let conditions = set_condition(
            &[],
            ready(ConditionStatus::False, "StatefulSetNotReady"),
            t(10),
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, Some(t(10)));
    }

    #[test]
    fn test_same_status_keeps_transition_time() {
        let first = set_condition(&[], ready(ConditionStatus::False, "StatefulSetNotReady"), t(10));
        let mut update = ready(ConditionStatus::False, "StatefulSetNotReady");
        update.message = "1/2 nodes ready".to_string();
        let second = set_condition(&first, update, t(20));

        assert_eq!(second.len(), 1);
        assert_eq!(second[0].last_transition_time, Some(t(10)));
        assert_eq!(second[0].message, "1/2 nodes ready");
    }

    #[test]
    fn test_status_flip_moves_transition_time() {
        let first = set_condition(&[], ready(ConditionStatus::False, "StatefulSetNotReady"), t(10));
        let second = set_condition(&first, ready(ConditionStatus::True, "StatefulSetReady"), t(20));
        assert_eq!(second[0].status, ConditionStatus::True);
        assert_eq!(second[0].last_transition_time, Some(t(20)));
    }

    #[test]
    fn test_unmanaged_types_pass_through() {
        let read_only = Condition {
            r#type: ClusterConditionType::Other("ReadOnly".to_string()),
            status: ConditionStatus::False,
            reason: "Writable".to_string(),
            message: "set by the orchestrator".to_string(),
            last_transition_time: Some(t(1)),
        };
        let existing = set_condition(
            &[read_only.clone()],
            ready(ConditionStatus::False, "StatefulSetNotReady"),
            t(10),
        );
        let updated = set_condition(
            &existing,
            ready(ConditionStatus::True, "StatefulSetReady"),
            t(20),
        );

        assert_eq!(updated.len(), 2);
        assert_eq!(updated[0], read_only);
        assert_eq!(updated[1].r#type, ClusterConditionType::Ready);
        assert_eq!(updated[1].last_transition_time, Some(t(20)));
    }

    #[test]
    fn test_duplicates_collapse() {
        let stale = Condition {
            r#type: ClusterConditionType::Ready,
            status: ConditionStatus::Unknown,
            reason: String::new(),
            message: String::new(),
            last_transition_time: Some(t(1)),
        };
        let conditions = set_condition(
            &[stale.clone(), stale],
            ready(ConditionStatus::True, "StatefulSetReady"),
            t(5),
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, Some(t(5)));
    }
}
