// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for session (persistence) operations.

use thiserror::Error;

use crate::model::UnknownVariant;

/// Result type using [`SessionError`].
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors returned by a [`Session`](crate::persistence::Session).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// The requested record does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Record kind (operation, cluster).
        kind: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// The operation is in a state that does not allow the requested write.
    #[error("Operation '{operation_id}' is in invalid state: expected '{expected}', got '{actual}'")]
    InvalidState {
        /// The operation ID.
        operation_id: String,
        /// The state the write required.
        expected: String,
        /// The state found in the database.
        actual: String,
    },

    /// A stored value could not be interpreted.
    #[error("Invalid stored value: {0}")]
    InvalidValue(#[from] UnknownVariant),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// JSON serialization/deserialization of a stored config failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Operation lookup miss.
    pub fn operation_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Operation",
            id: id.into(),
        }
    }

    /// Cluster lookup miss.
    pub fn cluster_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Cluster",
            id: id.into(),
        }
    }

    /// Whether the record was missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether repeating the same call may succeed.
    ///
    /// Missing records, state conflicts and undecodable rows are permanent.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Io(_))
    }
}
