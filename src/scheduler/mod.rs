//! Scheduler
//!
//! Background ticker executing due schedules. Due rows come from the
//! schedules view; the authoritative schedule aggregate is re-checked before
//! execution so a racing worker that lost the commit just skips. Transient
//! failures back off exponentially until the attempt budget runs out.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::aggregate::schedule::ScheduleState;
use crate::api::AppState;
use crate::domain::OperationContext;
use crate::error::{AppError, AppResult};
use crate::handlers::dispatch_command;
use crate::outbox::backoff;
use crate::uow::UnitOfWork;

/// Retries never wait longer than this
const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

/// Configuration for the scheduler ticker
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick: Duration,
    pub retry_base: Duration,
    pub max_attempts: i32,
    pub batch_size: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(10),
            retry_base: Duration::from_secs(1),
            max_attempts: 5,
            batch_size: 20,
        }
    }
}

/// What happened to one due schedule
#[derive(Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Executed,
    Retried,
    Failed,
    Skipped,
}

/// Background worker executing deferred commands
pub struct Scheduler {
    state: AppState,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(state: AppState, config: SchedulerConfig) -> Self {
        Self { state, config }
    }

    fn pool(&self) -> &PgPool {
        &self.state.pool
    }

    /// Start the ticker loop in the background.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!(tick_secs = self.config.tick.as_secs(), "Scheduler started");
        let mut tick = tokio::time::interval(self.config.tick);
        loop {
            tick.tick().await;
            if let Err(e) = self.run_once().await {
                tracing::error!(error = %e, "Scheduler tick failed");
            }
        }
    }

    /// Execute every due schedule in one bounded batch.
    pub async fn run_once(&self) -> AppResult<usize> {
        let due: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT aggregate_id FROM schedule_list
            WHERE status = 'pending'
              AND scheduled_for <= NOW()
              AND (next_retry_at IS NULL OR next_retry_at <= NOW())
            ORDER BY scheduled_for ASC
            LIMIT $1
            "#,
        )
        .bind(self.config.batch_size)
        .fetch_all(self.pool())
        .await?;

        let mut processed = 0;
        for schedule_id in due {
            match self.execute_due(&schedule_id).await {
                Ok(outcome) => {
                    processed += 1;
                    tracing::info!(schedule_id = %schedule_id, ?outcome, "Schedule processed");
                }
                Err(e) => {
                    tracing::error!(schedule_id = %schedule_id, error = %e, "Schedule execution errored");
                }
            }
        }
        Ok(processed)
    }

    /// Execute one due schedule end to end.
    async fn execute_due(&self, schedule_id: &str) -> AppResult<ExecutionOutcome> {
        let context = OperationContext::new().with_correlation_id(Uuid::new_v4());

        // Re-check the authoritative aggregate; the view may lag
        let mut uow = UnitOfWork::begin(self.pool(), &context).await?;
        let Some(schedule) = uow.find::<ScheduleState>(schedule_id).await? else {
            return Ok(ExecutionOutcome::Skipped);
        };
        if !schedule.is_pending() {
            uow.rollback().await?;
            return Ok(ExecutionOutcome::Skipped);
        }
        let command_type = schedule.state().command_type.clone();
        let command_data = schedule.state().command_data.clone();
        let retry_count = schedule.state().retry_count;
        uow.rollback().await?;

        let result = dispatch_command(&self.state, &context, &command_type, command_data).await;

        match result {
            Ok(_) => {
                self.finish(schedule_id, &context, |s| s.mark_executed()).await?;
                Ok(ExecutionOutcome::Executed)
            }
            Err(e) if is_transient(&e) => {
                let attempts = retry_count + 1;
                if attempts >= self.config.max_attempts {
                    let message = format!("max attempts exceeded: {}", e);
                    self.finish(schedule_id, &context, move |s| s.mark_failed(message))
                        .await?;
                    Ok(ExecutionOutcome::Failed)
                } else {
                    let delay = backoff(attempts, self.config.retry_base, MAX_RETRY_DELAY);
                    let next_retry_at = Utc::now()
                        + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::seconds(1));
                    let message = e.to_string();
                    self.finish(schedule_id, &context, move |s| {
                        s.record_retry(message, next_retry_at)
                    })
                    .await?;
                    Ok(ExecutionOutcome::Retried)
                }
            }
            Err(e) => {
                let message = e.to_string();
                self.finish(schedule_id, &context, move |s| s.mark_failed(message))
                    .await?;
                Ok(ExecutionOutcome::Failed)
            }
        }
    }

    /// Reload the schedule and apply a state transition in its own commit.
    async fn finish<F>(
        &self,
        schedule_id: &str,
        context: &OperationContext,
        mutate: F,
    ) -> AppResult<()>
    where
        F: FnOnce(&mut crate::aggregate::Schedule) -> Result<(), crate::domain::DomainError>,
    {
        let mut uow = UnitOfWork::begin(self.pool(), context).await?;
        let mut schedule = uow.get::<ScheduleState>(schedule_id).await?;
        mutate(&mut schedule)?;
        uow.save(&mut schedule)?;
        uow.commit().await?;
        Ok(())
    }
}

/// Failures worth retrying: version races and infrastructure hiccups.
fn is_transient(error: &AppError) -> bool {
    matches!(
        error,
        AppError::Conflict { .. } | AppError::Transient(_) | AppError::Database(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&AppError::Conflict {
            aggregate_id: "prod-1".to_string(),
            expected: Some(1),
            actual: Some(2),
        }));
        assert!(is_transient(&AppError::Transient("deadlock".to_string())));

        assert!(!is_transient(&AppError::Validation("bad".to_string())));
        assert!(!is_transient(&AppError::NotFound("prod-1".to_string())));
    }

    #[test]
    fn test_retry_delay_growth() {
        let base = Duration::from_secs(1);

        assert_eq!(backoff(1, base, MAX_RETRY_DELAY), Duration::from_secs(1));
        assert_eq!(backoff(2, base, MAX_RETRY_DELAY), Duration::from_secs(2));
        assert_eq!(backoff(3, base, MAX_RETRY_DELAY), Duration::from_secs(4));
        // Capped at the max delay
        assert_eq!(backoff(30, base, MAX_RETRY_DELAY), MAX_RETRY_DELAY);
    }

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.tick, Duration::from_secs(10));
        assert_eq!(config.max_attempts, 5);
    }
}
