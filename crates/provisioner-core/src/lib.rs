// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioner Core - operation records and persistence sessions.
//!
//! This crate holds the persisted side of the staged operation engine:
//!
//! - [`model`]: [`Operation`](model::Operation), [`Cluster`](model::Cluster),
//!   stage names and the lifecycle enums
//! - [`persistence`]: the [`Session`](persistence::Session) contract and its
//!   PostgreSQL and SQLite backends
//! - [`migrations`]: embedded schema for both backends
//! - [`error`]: [`SessionError`](error::SessionError)
//!
//! # Operation State Machine
//!
//! ```text
//!   ┌─────────────┐  transition   ┌─────────────┐
//!   │ IN_PROGRESS │──────────────►│ IN_PROGRESS │ (next stage)
//!   │  stage = A  │               │  stage = B  │
//!   └──────┬──────┘               └──────┬──────┘
//!          │ non-recoverable             │ stage = Finished
//!          │ error / timeout             │
//!          ▼                             ▼
//!     ┌────────┐                   ┌───────────┐
//!     │ FAILED │                   │ SUCCEEDED │
//!     └────────┘                   └───────────┘
//! ```
//!
//! Terminal states are written once and never reverted.

/// Error types for session operations.
pub mod error;

/// Embedded database migrations.
pub mod migrations;

/// Operation, cluster and stage types.
pub mod model;

/// Session contract and database backends.
pub mod persistence;

pub use error::SessionError;
pub use model::{Cluster, Operation, OperationState, OperationType, StageName};
pub use persistence::Session;
