// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed session implementation.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::debug;

use crate::error::{Result, SessionError};
use crate::migrations;
use crate::model::{Cluster, Operation, OperationState, StageName};

use super::{
    ClusterRow, OperationRow, Session, resolve_unapplied_state_update,
    resolve_unapplied_transition,
};

const OPERATION_COLUMNS: &str = "id, operation_type, state, stage, cluster_id, \
     start_timestamp, end_timestamp, last_transition, message";

/// SQLite-backed session.
#[derive(Clone)]
pub struct SqliteSession {
    pool: SqlitePool,
}

impl SqliteSession {
    /// Create a session from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) a database file and apply migrations.
    ///
    /// ```ignore
    /// let session = SqliteSession::from_path(".data/operations.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        Self::connect(&format!("sqlite:{}?mode=rwc", path.to_string_lossy())).await
    }

    /// Connect to a `sqlite:` URL and apply migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        migrations::run_sqlite(&pool).await?;

        Ok(Self { pool })
    }

    /// Open a private in-memory database with migrations applied.
    ///
    /// The pool holds a single connection that is never recycled, so every
    /// query sees the same database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        migrations::run_sqlite(&pool).await?;

        Ok(Self { pool })
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Session for SqliteSession {
    async fn get_operation(&self, operation_id: &str) -> Result<Operation> {
        let row = sqlx::query_as::<_, OperationRow>(&format!(
            "SELECT {OPERATION_COLUMNS} FROM operation WHERE id = ?"
        ))
        .bind(operation_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| SessionError::operation_not_found(operation_id))?;

        row.try_into()
    }

    async fn get_cluster(&self, cluster_id: &str) -> Result<Cluster> {
        let row = sqlx::query_as::<_, ClusterRow>(
            r#"
            SELECT id, tenant, cluster_config, kubeconfig, kyma_config,
                   creation_timestamp, deleted, sub_account_id
            FROM cluster
            WHERE id = ?
            "#,
        )
        .bind(cluster_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| SessionError::cluster_not_found(cluster_id))?;

        row.try_into()
    }

    async fn update_operation_state(
        &self,
        operation_id: &str,
        message: &str,
        state: OperationState,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let end_timestamp = state.is_terminal().then_some(timestamp);
        let result = sqlx::query(
            r#"
            UPDATE operation
            SET state = ?, message = ?, end_timestamp = ?
            WHERE id = ? AND state = 'IN_PROGRESS'
            "#,
        )
        .bind(state.as_str())
        .bind(message)
        .bind(end_timestamp)
        .bind(operation_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(
                operation_id = %operation_id,
                state = %state,
                "State update matched no in-progress row"
            );
            return resolve_unapplied_state_update(self.get_operation(operation_id).await, state);
        }

        Ok(())
    }

    async fn transition_operation(
        &self,
        operation_id: &str,
        message: &str,
        stage: &StageName,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE operation
            SET stage = ?, message = ?, last_transition = ?
            WHERE id = ? AND state = 'IN_PROGRESS'
            "#,
        )
        .bind(stage.as_str())
        .bind(message)
        .bind(timestamp)
        .bind(operation_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return resolve_unapplied_transition(self.get_operation(operation_id).await);
        }

        Ok(())
    }

    async fn insert_cluster(&self, cluster: &Cluster) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cluster (id, tenant, cluster_config, kubeconfig, kyma_config,
                                 creation_timestamp, deleted, sub_account_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&cluster.id)
        .bind(&cluster.tenant)
        .bind(serde_json::to_string(&cluster.cluster_config)?)
        .bind(&cluster.kubeconfig)
        .bind(serde_json::to_string(&cluster.kyma_config)?)
        .bind(cluster.creation_timestamp)
        .bind(cluster.deleted)
        .bind(&cluster.sub_account_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_operation(&self, operation: &Operation) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO operation ({OPERATION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&operation.id)
        .bind(operation.operation_type.as_str())
        .bind(operation.state.as_str())
        .bind(operation.stage.as_str())
        .bind(&operation.cluster_id)
        .bind(operation.start_timestamp)
        .bind(operation.end_timestamp)
        .bind(operation.last_transition)
        .bind(&operation.message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_kubeconfig(&self, cluster_id: &str, kubeconfig: &str) -> Result<()> {
        let result = sqlx::query("UPDATE cluster SET kubeconfig = ? WHERE id = ?")
            .bind(kubeconfig)
            .bind(cluster_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SessionError::cluster_not_found(cluster_id));
        }

        Ok(())
    }

    async fn list_in_progress_operations(&self) -> Result<Vec<Operation>> {
        let rows = sqlx::query_as::<_, OperationRow>(&format!(
            "SELECT {OPERATION_COLUMNS} FROM operation \
             WHERE state = 'IN_PROGRESS' ORDER BY start_timestamp ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Operation::try_from).collect()
    }
}
