// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime running one executor and worker pool per operation type.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use provisioner_core::OperationType;
//! use provisioner_operations::runtime::ProvisionerRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = provisioner_operations::Config::load()?;
//!     let session = config.connect_session().await?;
//!
//!     let runtime = ProvisionerRuntime::builder()
//!         .from_config(&config)
//!         .session(session)
//!         .workflow(OperationType::Provision, provisioning_stages(&config.timeouts)?)
//!         .workflow_with_failure_handler(
//!             OperationType::Upgrade,
//!             upgrade_stages(&config.timeouts)?,
//!             Arc::new(UpgradeFailureHandler::new(session.clone())),
//!         )
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     runtime.enqueue(OperationType::Provision, "operation-id")?;
//!
//!     // ... run your application ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use provisioner_core::{Operation, OperationType, Session};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::executor::{Executor, ExecutorConfig};
use crate::failure::{FailureHandler, NoopFailureHandler};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::queue::{OperationQueue, QueueConfig};
use crate::retry::RetryPolicy;
use crate::stage::StageMap;
use crate::status::{NoopStatusReporter, RuntimeStatusReporter};

struct Workflow {
    operation_type: OperationType,
    stages: StageMap,
    failure_handler: Arc<dyn FailureHandler>,
}

/// Builder for creating a [`ProvisionerRuntime`].
pub struct ProvisionerRuntimeBuilder {
    session: Option<Arc<dyn Session>>,
    workflows: Vec<Workflow>,
    status_reporter: Arc<dyn RuntimeStatusReporter>,
    metrics: Arc<dyn MetricsSink>,
    workers: usize,
    executor_config: ExecutorConfig,
    resume_in_progress: bool,
}

impl Default for ProvisionerRuntimeBuilder {
    fn default() -> Self {
        Self {
            session: None,
            workflows: Vec::new(),
            status_reporter: Arc::new(NoopStatusReporter),
            metrics: Arc::new(NoopMetrics),
            workers: 5,
            executor_config: ExecutorConfig::default(),
            resume_in_progress: true,
        }
    }
}

impl ProvisionerRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take worker count, default delay and retry attempts from `config`.
    pub fn from_config(mut self, config: &Config) -> Self {
        self.workers = config.workers;
        self.executor_config = config.executor_config();
        self
    }

    /// Set the session (required).
    pub fn session(mut self, session: Arc<dyn Session>) -> Self {
        self.session = Some(session);
        self
    }

    /// Register the stages of an operation type, with no failure handling.
    pub fn workflow(self, operation_type: OperationType, stages: StageMap) -> Self {
        self.workflow_with_failure_handler(operation_type, stages, Arc::new(NoopFailureHandler))
    }

    /// Register the stages of an operation type and the handler run when one
    /// of its operations fails.
    pub fn workflow_with_failure_handler(
        mut self,
        operation_type: OperationType,
        stages: StageMap,
        failure_handler: Arc<dyn FailureHandler>,
    ) -> Self {
        self.workflows.push(Workflow {
            operation_type,
            stages,
            failure_handler,
        });
        self
    }

    /// Set the runtime registry client.
    pub fn status_reporter(mut self, reporter: Arc<dyn RuntimeStatusReporter>) -> Self {
        self.status_reporter = reporter;
        self
    }

    /// Set the metrics sink shared by all executors.
    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Set the number of workers per operation type.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the requeue delay after recoverable errors.
    pub fn default_delay(mut self, delay: Duration) -> Self {
        self.executor_config.default_delay = delay;
        self
    }

    /// Set the retry policy for persisted writes.
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.executor_config.retry = retry;
        self
    }

    /// Whether `start` queues every in-progress operation (default: true).
    pub fn resume_in_progress(mut self, resume: bool) -> Self {
        self.resume_in_progress = resume;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if the session is missing, no workflow is registered
    /// or an operation type is registered twice.
    pub fn build(self) -> Result<ProvisionerRuntimeConfig> {
        let session = self
            .session
            .ok_or_else(|| anyhow::anyhow!("session is required"))?;

        if self.workflows.is_empty() {
            anyhow::bail!("at least one workflow is required");
        }
        if self.workers == 0 {
            anyhow::bail!("workers must be greater than zero");
        }

        let mut seen = Vec::with_capacity(self.workflows.len());
        for workflow in &self.workflows {
            if seen.contains(&workflow.operation_type) {
                anyhow::bail!(
                    "workflow for {} registered more than once",
                    workflow.operation_type
                );
            }
            seen.push(workflow.operation_type);
        }

        Ok(ProvisionerRuntimeConfig {
            session,
            workflows: self.workflows,
            status_reporter: self.status_reporter,
            metrics: self.metrics,
            workers: self.workers,
            executor_config: self.executor_config,
            resume_in_progress: self.resume_in_progress,
        })
    }
}

/// Configuration for a [`ProvisionerRuntime`].
pub struct ProvisionerRuntimeConfig {
    session: Arc<dyn Session>,
    workflows: Vec<Workflow>,
    status_reporter: Arc<dyn RuntimeStatusReporter>,
    metrics: Arc<dyn MetricsSink>,
    workers: usize,
    executor_config: ExecutorConfig,
    resume_in_progress: bool,
}

impl ProvisionerRuntimeConfig {
    /// Start the worker pools and queue in-progress operations.
    pub async fn start(self) -> Result<ProvisionerRuntime> {
        let pending = if self.resume_in_progress {
            self.session.list_in_progress_operations().await?
        } else {
            Vec::new()
        };

        let mut queues = HashMap::new();
        let mut pools = Vec::new();

        for workflow in self.workflows {
            let executor = Executor::new(
                workflow.operation_type,
                self.session.clone(),
                workflow.stages,
                workflow.failure_handler,
                self.status_reporter.clone(),
            )
            .with_metrics(self.metrics.clone())
            .with_config(self.executor_config.clone());

            let queue = OperationQueue::new(
                Arc::new(executor),
                QueueConfig {
                    workers: self.workers,
                    name: workflow.operation_type.as_str().to_lowercase(),
                },
            );

            let shutdown = queue.shutdown_handle();
            let handle = tokio::spawn(queue.clone().run());
            pools.push(Pool {
                operation_type: workflow.operation_type,
                shutdown,
                handle,
            });
            queues.insert(workflow.operation_type, queue);
        }

        let runtime = ProvisionerRuntime { queues, pools };

        for operation in &pending {
            if let Err(e) = runtime.enqueue_operation(operation) {
                warn!(
                    operation_id = %operation.id,
                    error = %e,
                    "Cannot resume in-progress operation"
                );
            }
        }

        info!(
            workflows = runtime.queues.len(),
            resumed = pending.len(),
            "Provisioner runtime started"
        );

        Ok(runtime)
    }
}

struct Pool {
    operation_type: OperationType,
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Running executors and worker pools.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct ProvisionerRuntime {
    queues: HashMap<OperationType, OperationQueue>,
    pools: Vec<Pool>,
}

impl ProvisionerRuntime {
    /// Create a new builder.
    pub fn builder() -> ProvisionerRuntimeBuilder {
        ProvisionerRuntimeBuilder::new()
    }

    /// Schedule processing of operation `operation_id` of `operation_type`.
    pub fn enqueue(
        &self,
        operation_type: OperationType,
        operation_id: &str,
    ) -> crate::error::Result<()> {
        let queue = self
            .queues
            .get(&operation_type)
            .ok_or(crate::error::Error::UnknownWorkflow(operation_type))?;
        queue.add(operation_id);
        Ok(())
    }

    /// Schedule processing of `operation` on the queue of its type.
    pub fn enqueue_operation(&self, operation: &Operation) -> crate::error::Result<()> {
        self.enqueue(operation.operation_type, &operation.id)
    }

    /// Queue of an operation type.
    pub fn queue(&self, operation_type: OperationType) -> Option<&OperationQueue> {
        self.queues.get(&operation_type)
    }

    /// Check if every worker pool is still running.
    pub fn is_running(&self) -> bool {
        self.pools.iter().all(|pool| !pool.handle.is_finished())
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops handing out queued operations and waits for in-flight executions
    /// to complete.
    pub async fn shutdown(self) -> Result<()> {
        info!("Provisioner runtime shutting down...");

        for pool in &self.pools {
            pool.shutdown.notify_one();
        }

        let mut failed = 0;
        for pool in self.pools {
            if let Err(e) = pool.handle.await {
                error!(
                    operation_type = %pool.operation_type,
                    "Operation queue task panicked: {}", e
                );
                failed += 1;
            }
        }

        if failed > 0 {
            anyhow::bail!("{} operation queue task(s) panicked", failed);
        }

        info!("Provisioner runtime shutdown complete");
        Ok(())
    }
}
