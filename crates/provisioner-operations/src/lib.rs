// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Staged operation engine for cluster provisioning.
//!
//! Provisioning, deprovisioning and upgrades are all driven the same way: an
//! [`Executor`] walks an operation through an immutable [`StageMap`], and an
//! [`OperationQueue`] feeds it operation ids with bounded concurrency.
//!
//! ```text
//!  add(id) ──► WorkQueue ──► worker ──► Executor::execute(id)
//!                 ▲                         │
//!                 └──── add_after(delay) ◄──┘ requeue
//! ```
//!
//! A stage returns either the next stage (run immediately, after the
//! transition is persisted) or a delay (the operation goes back to the queue
//! and the worker is freed). Errors are [`StageError::Recoverable`], retried
//! from the same stage after a default delay, or
//! [`StageError::NonRecoverable`], which fail the operation once and run the
//! workflow's [`FailureHandler`].

#![deny(missing_docs)]

/// Stage and runtime errors.
pub mod error;

/// Environment-based configuration.
pub mod config;

/// Executor running one operation through its stages.
pub mod executor;

/// Terminal failure side effects.
pub mod failure;

/// Metrics sink.
pub mod metrics;

/// Work queue and worker pool.
pub mod queue;

/// Retry policy.
pub mod retry;

/// Embeddable runtime.
pub mod runtime;

/// Stage contract and stage map.
pub mod stage;

/// Runtime registry status reporting.
pub mod status;

/// Stage time budgets.
pub mod timeouts;

pub use config::Config;
pub use error::{Error, Result, StageError};
pub use executor::{Executor, ExecutorConfig, OperationExecutor, ProcessingResult};
pub use failure::{FailureHandler, NoopFailureHandler};
pub use queue::{OperationQueue, QueueConfig};
pub use retry::RetryPolicy;
pub use runtime::ProvisionerRuntime;
pub use stage::{Stage, StageMap, StageResult};
pub use status::{RuntimeCondition, RuntimeStatusReporter};
