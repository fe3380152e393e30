// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Executor driving one operation through its stage graph.
//!
//! A call to [`OperationExecutor::execute`] loads the operation, runs stages
//! back to back while they ask to continue immediately, and returns as soon
//! as a stage asks to wait, fails, or the workflow finishes. Every stage
//! change is persisted before the next stage runs, so a restart resumes from
//! the last completed stage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use provisioner_core::{
    Cluster, Operation, OperationState, OperationType, Session, SessionError, StageName,
};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::StageError;
use crate::failure::FailureHandler;
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::retry::RetryPolicy;
use crate::stage::StageMap;
use crate::status::{RuntimeCondition, RuntimeStatusReporter};

/// Message stored when an operation finishes.
pub const SUCCEEDED_MESSAGE: &str = "Operation succeeded";

/// What the queue should do with an operation after an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingResult {
    /// Whether to run the operation again.
    pub requeue: bool,
    /// Delay before the next run.
    pub delay: Duration,
}

impl ProcessingResult {
    /// Nothing left to do.
    pub fn done() -> Self {
        Self {
            requeue: false,
            delay: Duration::ZERO,
        }
    }

    /// Run again after `delay`.
    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue: true,
            delay,
        }
    }
}

/// Something that can process an operation by id.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    /// Process the operation. Never fails; every outcome is expressed in the
    /// returned [`ProcessingResult`] and the persisted operation.
    async fn execute(&self, operation_id: &str) -> ProcessingResult;
}

/// Executor tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Requeue delay after recoverable errors.
    pub default_delay: Duration,
    /// Policy for session writes and failure side effects.
    pub retry: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_delay: Duration::from_secs(20),
            retry: RetryPolicy::default(),
        }
    }
}

/// Executor bound to one operation type.
pub struct Executor {
    operation_type: OperationType,
    session: Arc<dyn Session>,
    stages: StageMap,
    failure_handler: Arc<dyn FailureHandler>,
    status_reporter: Arc<dyn RuntimeStatusReporter>,
    metrics: Arc<dyn MetricsSink>,
    config: ExecutorConfig,
}

impl Executor {
    /// Create an executor with the default configuration and no metrics.
    pub fn new(
        operation_type: OperationType,
        session: Arc<dyn Session>,
        stages: StageMap,
        failure_handler: Arc<dyn FailureHandler>,
        status_reporter: Arc<dyn RuntimeStatusReporter>,
    ) -> Self {
        Self {
            operation_type,
            session,
            stages,
            failure_handler,
            status_reporter,
            metrics: Arc::new(NoopMetrics),
            config: ExecutorConfig::default(),
        }
    }

    /// Report events to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Operation type this executor handles.
    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    /// Current configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    async fn process(&self, mut operation: Operation, cluster: Cluster) -> ProcessingResult {
        loop {
            if operation.stage.is_finished() {
                return self.complete(&operation).await;
            }

            let Some(stage) = self.stages.get(&operation.stage).cloned() else {
                let err = StageError::unknown_stage(&operation.stage);
                return self.fail(&operation, &cluster, err.to_string()).await;
            };

            let limit = stage.time_limit();
            if elapsed_since(operation.last_transition_or_start(), Utc::now()) > limit {
                let err = StageError::timeout(&operation.stage, limit);
                return self.fail(&operation, &cluster, err.to_string()).await;
            }

            let span = info_span!("stage", stage = %operation.stage);
            let result = match stage.run(&cluster, &operation).instrument(span).await {
                Ok(result) => result,
                Err(err) if err.is_non_recoverable() => {
                    return self.fail(&operation, &cluster, err.to_string()).await;
                }
                Err(err) => {
                    warn!(
                        stage = %operation.stage,
                        error = %err,
                        "Stage failed, will retry"
                    );
                    return self.requeue(self.config.default_delay);
                }
            };

            if result.stage != operation.stage {
                if let Err(e) = self.transition(&mut operation, &result.stage).await {
                    return self.write_failed(&operation.id, e);
                }
                if !result.delay.is_zero() && !operation.stage.is_finished() {
                    return self.requeue(result.delay);
                }
                continue;
            }

            if result.delay.is_zero() {
                warn!(
                    stage = %operation.stage,
                    "Stage asked to run again without a delay, requeueing with default delay"
                );
                return self.requeue(self.config.default_delay);
            }

            debug!(
                stage = %operation.stage,
                delay_secs = result.delay.as_secs(),
                "Stage waiting"
            );
            return self.requeue(result.delay);
        }
    }

    async fn transition(
        &self,
        operation: &mut Operation,
        next: &StageName,
    ) -> Result<(), SessionError> {
        let timestamp = next_transition_time(operation.last_transition_or_start(), Utc::now());
        let message = format!("Operation in progress. Stage {}", next);

        {
            let operation = &*operation;
            self.config
                .retry
                .run_if("transition operation", SessionError::is_transient, || {
                    self.session
                        .transition_operation(&operation.id, &message, next, timestamp)
                })
                .await?;
        }

        info!(from = %operation.stage, to = %next, "Operation transitioned");
        self.metrics
            .stage_transitioned(self.operation_type, &operation.stage, next);

        operation.stage = next.clone();
        operation.last_transition = Some(timestamp);
        operation.message = message;
        Ok(())
    }

    async fn complete(&self, operation: &Operation) -> ProcessingResult {
        let now = Utc::now();
        let write = self
            .config
            .retry
            .run_if("mark operation succeeded", SessionError::is_transient, || {
                self.session.update_operation_state(
                    &operation.id,
                    SUCCEEDED_MESSAGE,
                    OperationState::Succeeded,
                    now,
                )
            })
            .await;
        if let Err(e) = write {
            return self.write_failed(&operation.id, e);
        }

        self.metrics.operation_finished(
            self.operation_type,
            OperationState::Succeeded,
            elapsed_since(operation.start_timestamp, now),
        );
        info!("Operation succeeded");
        ProcessingResult::done()
    }

    async fn fail(
        &self,
        operation: &Operation,
        cluster: &Cluster,
        message: String,
    ) -> ProcessingResult {
        error!(stage = %operation.stage, error = %message, "Operation failed");

        let now = Utc::now();
        let write = self
            .config
            .retry
            .run_if("mark operation failed", SessionError::is_transient, || {
                self.session.update_operation_state(
                    &operation.id,
                    &message,
                    OperationState::Failed,
                    now,
                )
            })
            .await;
        if let Err(e) = write {
            return self.write_failed(&operation.id, e);
        }

        self.metrics.operation_finished(
            self.operation_type,
            OperationState::Failed,
            elapsed_since(operation.start_timestamp, now),
        );

        let failed = Operation {
            state: OperationState::Failed,
            message,
            end_timestamp: Some(now),
            ..operation.clone()
        };

        if let Err(e) = self
            .config
            .retry
            .run("handle operation failure", || {
                self.failure_handler.handle_failure(&failed, cluster)
            })
            .await
        {
            let reason = format!("{e:#}");
            error!(error = %reason, "Failure handler did not complete");
        }

        if let Err(e) = self
            .config
            .retry
            .run("set runtime status condition", || {
                self.status_reporter.set_runtime_status_condition(
                    &cluster.id,
                    RuntimeCondition::Failed,
                    &cluster.tenant,
                )
            })
            .await
        {
            let reason = format!("{e:#}");
            error!(error = %reason, "Failed to set runtime status condition");
        }

        ProcessingResult::done()
    }

    fn write_failed(&self, operation_id: &str, err: SessionError) -> ProcessingResult {
        match err {
            SessionError::InvalidState { .. } | SessionError::NotFound { .. } => {
                warn!(
                    operation_id = %operation_id,
                    error = %err,
                    "Operation is no longer in progress, dropping it"
                );
                ProcessingResult::done()
            }
            _ => {
                error!(
                    operation_id = %operation_id,
                    error = %err,
                    "Failed to persist operation update"
                );
                self.requeue(self.config.default_delay)
            }
        }
    }

    fn requeue(&self, delay: Duration) -> ProcessingResult {
        self.metrics.operation_requeued(self.operation_type, delay);
        ProcessingResult::requeue_after(delay)
    }
}

#[async_trait]
impl OperationExecutor for Executor {
    async fn execute(&self, operation_id: &str) -> ProcessingResult {
        let operation = match self.session.get_operation(operation_id).await {
            Ok(operation) => operation,
            Err(e) if e.is_not_found() => {
                warn!(operation_id = %operation_id, "Operation not found, dropping it");
                return ProcessingResult::done();
            }
            Err(e) => {
                error!(operation_id = %operation_id, error = %e, "Failed to load operation");
                return self.requeue(self.config.default_delay);
            }
        };

        if operation.state != OperationState::InProgress {
            debug!(
                operation_id = %operation_id,
                state = %operation.state,
                "Operation not in progress, skipping"
            );
            return ProcessingResult::done();
        }

        let cluster = match self.session.get_cluster(&operation.cluster_id).await {
            Ok(cluster) => cluster,
            Err(e) if e.is_not_found() => {
                warn!(
                    operation_id = %operation_id,
                    cluster_id = %operation.cluster_id,
                    "Cluster not found, dropping operation"
                );
                return ProcessingResult::done();
            }
            Err(e) => {
                error!(
                    operation_id = %operation_id,
                    cluster_id = %operation.cluster_id,
                    error = %e,
                    "Failed to load cluster"
                );
                return self.requeue(self.config.default_delay);
            }
        };

        if operation.operation_type != self.operation_type {
            debug!(
                operation_id = %operation_id,
                operation_type = %operation.operation_type,
                executor_type = %self.operation_type,
                "Operation belongs to another executor, skipping"
            );
            return ProcessingResult::done();
        }

        let span = info_span!(
            "operation",
            operation_id = %operation.id,
            operation_type = %operation.operation_type,
            cluster_id = %cluster.id,
        );
        self.process(operation, cluster).instrument(span).await
    }
}

/// Wall-clock time from `since` to `now`, zero when `since` is in the future.
fn elapsed_since(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

/// Timestamp for a new transition, strictly after `previous`.
fn next_transition_time(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + chrono::Duration::microseconds(1)
    }
}
