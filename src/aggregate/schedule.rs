//! Schedule Aggregate
//!
//! A deferred command: which service to invoke, with what payload, against
//! which aggregate, and when. The scheduler ticker executes due pending
//! schedules; `executed` and `cancelled` are terminal, `failed` is reached
//! when the retry budget runs out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domain::DomainError;

use super::{Aggregate, AggregateState};

/// Schedule lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Pending,
    Executed,
    Failed,
    Cancelled,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Schedule snapshot state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleState {
    pub target_aggregate_id: String,
    pub target_aggregate_type: String,
    pub command_type: String,
    pub command_data: Value,
    pub scheduled_for: DateTime<Utc>,
    pub status: ScheduleStatus,
    pub retry_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

impl AggregateState for ScheduleState {
    fn aggregate_type(&self) -> &'static str {
        "schedule"
    }
}

/// Parameters for creating a schedule
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub id: String,
    pub target_aggregate_id: String,
    pub target_aggregate_type: String,
    pub command_type: String,
    pub command_data: Value,
    pub scheduled_for: DateTime<Utc>,
}

pub type Schedule = Aggregate<ScheduleState>;

impl Aggregate<ScheduleState> {
    /// Create a pending schedule.
    pub fn create(params: NewSchedule) -> Result<Self, DomainError> {
        if params.command_type.trim().is_empty() {
            return Err(DomainError::Validation("command type is required".to_string()));
        }
        if params.target_aggregate_id.trim().is_empty() {
            return Err(DomainError::Validation(
                "target aggregate id is required".to_string(),
            ));
        }

        let state = ScheduleState {
            target_aggregate_id: params.target_aggregate_id,
            target_aggregate_type: params.target_aggregate_type,
            command_type: params.command_type,
            command_data: params.command_data,
            scheduled_for: params.scheduled_for,
            status: ScheduleStatus::Pending,
            retry_count: 0,
            next_retry_at: None,
            error_message: None,
            created_at: Utc::now(),
            executed_at: None,
        };

        Self::genesis(params.id, state)
            .map_err(|e| DomainError::Validation(format!("state serialization failed: {}", e)))
    }

    fn ensure_pending(&self) -> Result<(), DomainError> {
        if self.state.status != ScheduleStatus::Pending {
            return Err(DomainError::illegal_transition(
                self.state.status.as_str(),
                "pending",
            ));
        }
        Ok(())
    }

    pub fn is_pending(&self) -> bool {
        self.state.status == ScheduleStatus::Pending
    }

    /// Mark the deferred command as successfully executed. Terminal.
    pub fn mark_executed(&mut self) -> Result<(), DomainError> {
        self.ensure_pending()?;

        let prior = json!({ "status": self.state.status });
        self.state.status = ScheduleStatus::Executed;
        self.state.executed_at = Some(Utc::now());
        self.record(
            "executed",
            prior,
            json!({ "status": self.state.status, "executedAt": self.state.executed_at }),
        );
        Ok(())
    }

    /// Record a transient failure: bump the retry counter and stay pending.
    pub fn record_retry(
        &mut self,
        error: String,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.ensure_pending()?;

        let prior = json!({
            "retryCount": self.state.retry_count,
            "nextRetryAt": self.state.next_retry_at,
            "errorMessage": self.state.error_message,
        });
        self.state.retry_count += 1;
        self.state.next_retry_at = Some(next_retry_at);
        self.state.error_message = Some(error);
        self.record(
            "retry_recorded",
            prior,
            json!({
                "retryCount": self.state.retry_count,
                "nextRetryAt": self.state.next_retry_at,
                "errorMessage": self.state.error_message,
            }),
        );
        Ok(())
    }

    /// Give up on the schedule. Terminal.
    pub fn mark_failed(&mut self, error: String) -> Result<(), DomainError> {
        self.ensure_pending()?;

        let prior = json!({ "status": self.state.status, "errorMessage": self.state.error_message });
        self.state.status = ScheduleStatus::Failed;
        self.state.error_message = Some(error);
        self.record(
            "failed",
            prior,
            json!({ "status": self.state.status, "errorMessage": self.state.error_message }),
        );
        Ok(())
    }

    /// Cancel a pending schedule. Terminal.
    pub fn cancel(&mut self) -> Result<(), DomainError> {
        self.ensure_pending()?;

        let prior = json!({ "status": self.state.status });
        self.state.status = ScheduleStatus::Cancelled;
        self.record("cancelled", prior, json!({ "status": self.state.status }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> NewSchedule {
        NewSchedule {
            id: "sched-1".to_string(),
            target_aggregate_id: "prod-1".to_string(),
            target_aggregate_type: "dropshipProduct".to_string(),
            command_type: "publishDropshipProduct".to_string(),
            command_data: json!({ "productId": "prod-1" }),
            scheduled_for: Utc::now() + chrono::Duration::hours(24),
        }
    }

    #[test]
    fn test_create_schedule() {
        let schedule = Schedule::create(params()).unwrap();

        assert!(schedule.is_pending());
        assert_eq!(schedule.state().retry_count, 0);
        assert_eq!(schedule.uncommitted()[0].event_name, "schedule.created");
        assert_eq!(
            schedule.uncommitted()[0].new_state["commandType"],
            "publishDropshipProduct"
        );
    }

    #[test]
    fn test_create_requires_command_type() {
        let mut bad = params();
        bad.command_type = " ".to_string();
        assert!(Schedule::create(bad).is_err());
    }

    #[test]
    fn test_executed_is_terminal() {
        let mut schedule = Schedule::create(params()).unwrap();
        schedule.mark_executed().unwrap();

        assert_eq!(schedule.state().status, ScheduleStatus::Executed);
        assert!(schedule.state().executed_at.is_some());
        assert!(schedule.mark_executed().is_err());
        assert!(schedule.cancel().is_err());
    }

    #[test]
    fn test_retry_keeps_pending() {
        let mut schedule = Schedule::create(params()).unwrap();
        let retry_at = Utc::now() + chrono::Duration::seconds(30);

        schedule
            .record_retry("store busy".to_string(), retry_at)
            .unwrap();

        assert!(schedule.is_pending());
        assert_eq!(schedule.state().retry_count, 1);
        assert_eq!(schedule.state().next_retry_at, Some(retry_at));
        assert_eq!(schedule.state().error_message.as_deref(), Some("store busy"));

        let event = schedule.uncommitted().last().unwrap();
        assert_eq!(event.event_name, "schedule.retry_recorded");
        assert_eq!(event.prior_state["retryCount"], 0);
        assert_eq!(event.new_state["retryCount"], 1);
    }

    #[test]
    fn test_failed_records_message() {
        let mut schedule = Schedule::create(params()).unwrap();
        schedule.mark_failed("max attempts exceeded".to_string()).unwrap();

        assert_eq!(schedule.state().status, ScheduleStatus::Failed);
        assert!(schedule.mark_failed("again".to_string()).is_err());
    }

    #[test]
    fn test_cancel_only_from_pending() {
        let mut schedule = Schedule::create(params()).unwrap();
        schedule.cancel().unwrap();

        assert_eq!(schedule.state().status, ScheduleStatus::Cancelled);
        // Cancel on an already-cancelled schedule fails
        let err = schedule.cancel().unwrap_err();
        assert_eq!(err.kind(), "validation_failed");
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut schedule = Schedule::create(params()).unwrap();
        schedule
            .record_retry("conflict".to_string(), Utc::now())
            .unwrap();

        let snapshot = schedule.to_snapshot().unwrap();
        let reloaded: Schedule =
            Aggregate::from_snapshot("sched-1".to_string(), schedule.version(), snapshot).unwrap();

        assert_eq!(
            reloaded.to_snapshot().unwrap(),
            schedule.to_snapshot().unwrap()
        );
    }
}
