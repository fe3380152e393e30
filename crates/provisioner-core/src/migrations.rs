// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embedded schema for the operation store.
//!
//! Both engines carry the same two tables:
//!
//! | Table       | Key columns                                                        |
//! |-------------|--------------------------------------------------------------------|
//! | `cluster`   | `id`, `tenant`, `cluster_config` (JSON), `kyma_config` (JSON), `kubeconfig`, `deleted` |
//! | `operation` | `id`, `operation_type`, `state`, `stage`, `cluster_id`, `last_transition`, `message` |
//!
//! `operation.state` is indexed because startup lists every `IN_PROGRESS`
//! row. Timestamps are `TIMESTAMPTZ` on PostgreSQL and RFC 3339 text on
//! SQLite.
//!
//! The sessions apply these on connect; call the functions directly only
//! when managing the pool yourself:
//!
//! ```ignore
//! let pool = sqlx::SqlitePool::connect("sqlite::memory:").await?;
//! provisioner_core::migrations::run_sqlite(&pool).await?;
//! ```

use sqlx::migrate::{MigrateError, Migrator};

/// Schema for [`PostgresSession`](crate::persistence::PostgresSession).
pub static POSTGRES: Migrator = sqlx::migrate!("./migrations/postgresql");

/// Schema for [`SqliteSession`](crate::persistence::SqliteSession).
pub static SQLITE: Migrator = sqlx::migrate!("./migrations/sqlite");

/// Bring a PostgreSQL database up to the current schema.
pub async fn run_postgres(pool: &sqlx::PgPool) -> Result<(), MigrateError> {
    POSTGRES.run(pool).await
}

/// Bring a SQLite database up to the current schema.
pub async fn run_sqlite(pool: &sqlx::SqlitePool) -> Result<(), MigrateError> {
    SQLITE.run(pool).await
}
