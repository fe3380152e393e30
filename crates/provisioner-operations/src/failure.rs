// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Side effects run once an operation has failed for good.

use async_trait::async_trait;
use provisioner_core::{Cluster, Operation};

/// Cleanup or bookkeeping performed after an operation is marked failed.
///
/// Called at most once per failed operation, wrapped in the executor's retry
/// policy, so an implementation may be invoked several times for the same
/// failure when earlier attempts return errors.
#[async_trait]
pub trait FailureHandler: Send + Sync {
    /// React to the terminal failure of `operation` on `cluster`.
    async fn handle_failure(&self, operation: &Operation, cluster: &Cluster) -> anyhow::Result<()>;
}

/// Failure handler for workflows with nothing to clean up.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFailureHandler;

#[async_trait]
impl FailureHandler for NoopFailureHandler {
    async fn handle_failure(&self, _: &Operation, _: &Cluster) -> anyhow::Result<()> {
        Ok(())
    }
}
