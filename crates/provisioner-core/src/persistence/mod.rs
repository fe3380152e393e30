// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session interface and database backends for operations and clusters.
//!
//! The executor only ever talks to a [`Session`]. Every write is a
//! single-row conditional update, so repeating a call after a transient
//! failure is safe.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresSession;
pub use self::sqlite::SqliteSession;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Result, SessionError};
use crate::model::{Cluster, Operation, OperationState, StageName};

/// Read/write access to persisted operations and clusters.
#[async_trait]
pub trait Session: Send + Sync {
    /// Load an operation by id.
    async fn get_operation(&self, operation_id: &str) -> Result<Operation>;

    /// Load a cluster by id.
    async fn get_cluster(&self, cluster_id: &str) -> Result<Cluster>;

    /// Set the lifecycle state and message of an in-progress operation.
    ///
    /// Terminal states also record `timestamp` as the end time. Writing the
    /// terminal state an operation already has is a no-op; any other write to
    /// a terminal operation fails with [`SessionError::InvalidState`].
    async fn update_operation_state(
        &self,
        operation_id: &str,
        message: &str,
        state: OperationState,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;

    /// Move an in-progress operation to `stage`, recording `timestamp` as its
    /// last transition.
    async fn transition_operation(
        &self,
        operation_id: &str,
        message: &str,
        stage: &StageName,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;

    /// Store a new cluster.
    async fn insert_cluster(&self, cluster: &Cluster) -> Result<()>;

    /// Store a new operation.
    async fn insert_operation(&self, operation: &Operation) -> Result<()>;

    /// Persist the kubeconfig obtained for a cluster.
    async fn update_kubeconfig(&self, cluster_id: &str, kubeconfig: &str) -> Result<()>;

    /// All operations still in progress, oldest first.
    async fn list_in_progress_operations(&self) -> Result<Vec<Operation>>;
}

// ============================================================================
// Row types shared by both backends
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct OperationRow {
    id: String,
    operation_type: String,
    state: String,
    stage: String,
    cluster_id: String,
    start_timestamp: DateTime<Utc>,
    end_timestamp: Option<DateTime<Utc>>,
    last_transition: Option<DateTime<Utc>>,
    message: String,
}

impl TryFrom<OperationRow> for Operation {
    type Error = SessionError;

    fn try_from(row: OperationRow) -> Result<Self> {
        Ok(Operation {
            id: row.id,
            operation_type: row.operation_type.parse()?,
            state: row.state.parse()?,
            stage: StageName::new(row.stage),
            cluster_id: row.cluster_id,
            start_timestamp: row.start_timestamp,
            end_timestamp: row.end_timestamp,
            last_transition: row.last_transition,
            message: row.message,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ClusterRow {
    id: String,
    tenant: String,
    cluster_config: String,
    kubeconfig: Option<String>,
    kyma_config: String,
    creation_timestamp: DateTime<Utc>,
    deleted: bool,
    sub_account_id: Option<String>,
}

impl TryFrom<ClusterRow> for Cluster {
    type Error = SessionError;

    fn try_from(row: ClusterRow) -> Result<Self> {
        Ok(Cluster {
            id: row.id,
            tenant: row.tenant,
            cluster_config: serde_json::from_str(&row.cluster_config)?,
            kubeconfig: row.kubeconfig,
            kyma_config: serde_json::from_str(&row.kyma_config)?,
            creation_timestamp: row.creation_timestamp,
            deleted: row.deleted,
            sub_account_id: row.sub_account_id,
        })
    }
}

/// Decide the outcome of a state update that matched no in-progress row.
///
/// `current` is the operation as it is stored now.
pub(crate) fn resolve_unapplied_state_update(
    current: Result<Operation>,
    target: OperationState,
) -> Result<()> {
    let current = current?;
    if current.state == target {
        return Ok(());
    }
    Err(SessionError::InvalidState {
        operation_id: current.id,
        expected: OperationState::InProgress.to_string(),
        actual: current.state.to_string(),
    })
}

/// Decide the outcome of a transition that matched no in-progress row.
pub(crate) fn resolve_unapplied_transition(current: Result<Operation>) -> Result<()> {
    let current = current?;
    Err(SessionError::InvalidState {
        operation_id: current.id,
        expected: OperationState::InProgress.to_string(),
        actual: current.state.to_string(),
    })
}
