// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for stages and the operations runtime.

use std::time::Duration;

use provisioner_core::{OperationType, SessionError, StageName};
use thiserror::Error;

/// Failure reported by a stage.
///
/// A stage failure is either retried later from the same stage or ends the
/// operation for good. Errors converted with `?` are recoverable unless the
/// stage wraps them with [`StageError::non_recoverable`].
#[derive(Debug, Error)]
pub enum StageError {
    /// Transient failure; the stage runs again after the default delay.
    #[error("{0:#}")]
    Recoverable(anyhow::Error),

    /// Permanent failure; the operation is marked failed.
    #[error("{0:#}")]
    NonRecoverable(anyhow::Error),
}

impl StageError {
    /// Wrap an error as recoverable.
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self::Recoverable(err.into())
    }

    /// Wrap an error as non-recoverable.
    pub fn non_recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self::NonRecoverable(err.into())
    }

    /// Whether the operation must stop.
    pub fn is_non_recoverable(&self) -> bool {
        matches!(self, Self::NonRecoverable(_))
    }

    /// The operation sits in a stage no implementation is registered for.
    pub fn unknown_stage(stage: &StageName) -> Self {
        Self::NonRecoverable(anyhow::anyhow!("unknown stage '{}'", stage))
    }

    /// The operation stayed in `stage` longer than `limit`.
    pub fn timeout(stage: &StageName, limit: Duration) -> Self {
        Self::NonRecoverable(anyhow::anyhow!(
            "timeout while processing operation: stage '{}' exceeded its time limit of {}s",
            stage,
            limit.as_secs()
        ))
    }
}

impl From<anyhow::Error> for StageError {
    fn from(err: anyhow::Error) -> Self {
        Self::Recoverable(err)
    }
}

impl From<SessionError> for StageError {
    fn from(err: SessionError) -> Self {
        Self::Recoverable(err.into())
    }
}

/// Runtime errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Session operation failed.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Stage map construction failed.
    #[error("Stage map error: {0}")]
    StageMap(#[from] crate::stage::StageMapError),

    /// No workflow is registered for the operation type.
    #[error("No workflow registered for operation type {0}")]
    UnknownWorkflow(OperationType),
}

/// Result type using the runtime [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
