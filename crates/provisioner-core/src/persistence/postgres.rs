// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed session implementation.
//!
//! Writes are single-row `UPDATE ... WHERE id = $n AND state = 'IN_PROGRESS'`
//! statements, so a retried write never reverts a terminal operation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
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

/// PostgreSQL-backed session.
#[derive(Clone)]
pub struct PostgresSession {
    pool: PgPool,
}

impl PostgresSession {
    /// Create a session from an existing, migrated pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` and apply migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        migrations::run_postgres(&pool).await?;

        Ok(Self { pool })
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Session for PostgresSession {
    async fn get_operation(&self, operation_id: &str) -> Result<Operation> {
        let row = sqlx::query_as::<_, OperationRow>(&format!(
            "SELECT {OPERATION_COLUMNS} FROM operation WHERE id = $1"
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
            WHERE id = $1
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
            SET state = $1, message = $2, end_timestamp = $3
            WHERE id = $4 AND state = 'IN_PROGRESS'
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
            SET stage = $1, message = $2, last_transition = $3
            WHERE id = $4 AND state = 'IN_PROGRESS'
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
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
            "INSERT INTO operation ({OPERATION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
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
        let result = sqlx::query("UPDATE cluster SET kubeconfig = $1 WHERE id = $2")
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
