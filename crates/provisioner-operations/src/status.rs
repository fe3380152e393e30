// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime status reporting towards the runtime registry.

use std::fmt;

use async_trait::async_trait;

/// Condition of a runtime as shown by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeCondition {
    /// Registered, nothing started yet.
    Initial,
    /// Cluster is being created.
    Provisioning,
    /// Cluster exists and Kyma is installed.
    Provisioned,
    /// Runtime agent is connected.
    Connected,
    /// Upgrade in progress.
    Upgrading,
    /// Cluster is being removed.
    Deprovisioning,
    /// Last operation failed.
    Failed,
}

impl RuntimeCondition {
    /// Registry representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeCondition::Initial => "INITIAL",
            RuntimeCondition::Provisioning => "PROVISIONING",
            RuntimeCondition::Provisioned => "PROVISIONED",
            RuntimeCondition::Connected => "CONNECTED",
            RuntimeCondition::Upgrading => "UPGRADING",
            RuntimeCondition::Deprovisioning => "DEPROVISIONING",
            RuntimeCondition::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RuntimeCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client of the runtime registry.
#[async_trait]
pub trait RuntimeStatusReporter: Send + Sync {
    /// Set the condition of runtime `cluster_id` owned by `tenant`.
    async fn set_runtime_status_condition(
        &self,
        cluster_id: &str,
        condition: RuntimeCondition,
        tenant: &str,
    ) -> anyhow::Result<()>;
}

/// Reporter used when no registry is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStatusReporter;

#[async_trait]
impl RuntimeStatusReporter for NoopStatusReporter {
    async fn set_runtime_status_condition(
        &self,
        cluster_id: &str,
        condition: RuntimeCondition,
        _tenant: &str,
    ) -> anyhow::Result<()> {
        tracing::debug!(cluster_id, %condition, "No runtime registry configured, skipping status update");
        Ok(())
    }
}
