// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operation and cluster records.
//!
//! An [`Operation`] is one persisted lifecycle action (provision, deprovision,
//! upgrade, reconnect) against a [`Cluster`]. Operations move stage by stage
//! until they reach a terminal [`OperationState`].

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored string did not match any known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    /// Which enum was being parsed.
    pub kind: &'static str,
    /// The offending value.
    pub value: String,
}

// ============================================================================
// Operation type and state
// ============================================================================

/// Kind of lifecycle action an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    /// Create the cluster and install the runtime on it.
    Provision,
    /// Tear the cluster down.
    Deprovision,
    /// Upgrade the runtime installed on the cluster.
    Upgrade,
    /// Re-establish the connection between the runtime agent and the registry.
    ReconnectRuntime,
}

impl OperationType {
    /// All operation types, in a stable order.
    pub const ALL: [OperationType; 4] = [
        OperationType::Provision,
        OperationType::Deprovision,
        OperationType::Upgrade,
        OperationType::ReconnectRuntime,
    ];

    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provision => "PROVISION",
            Self::Deprovision => "DEPROVISION",
            Self::Upgrade => "UPGRADE",
            Self::ReconnectRuntime => "RECONNECT_RUNTIME",
        }
    }

    /// Stage a freshly created operation of this type starts in.
    pub fn initial_stage(&self) -> StageName {
        match self {
            Self::Provision => stages::WAIT_FOR_CLUSTER_DOMAIN,
            Self::Deprovision => stages::CLEANUP_CLUSTER,
            Self::Upgrade => stages::STARTING_UPGRADE,
            Self::ReconnectRuntime => stages::CONNECT_RUNTIME_AGENT,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROVISION" => Ok(Self::Provision),
            "DEPROVISION" => Ok(Self::Deprovision),
            "UPGRADE" => Ok(Self::Upgrade),
            "RECONNECT_RUNTIME" => Ok(Self::ReconnectRuntime),
            other => Err(UnknownVariant {
                kind: "operation type",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle state of an operation. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationState {
    /// Still being driven through its stages.
    InProgress,
    /// Reached the `Finished` stage.
    Succeeded,
    /// Stopped by a non-recoverable error or a timeout.
    Failed,
}

impl OperationState {
    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }

    /// Whether the state can no longer change.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationState {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(Self::InProgress),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            other => Err(UnknownVariant {
                kind: "operation state",
                value: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// Stage names
// ============================================================================

/// Name a stage implementation is registered under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageName(Cow<'static, str>);

impl StageName {
    /// Stage name from a string literal, usable in constants.
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Stage name from an owned or borrowed string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the terminal `Finished` stage.
    pub fn is_finished(&self) -> bool {
        self.as_str() == stages::FINISHED.as_str()
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for StageName {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

impl From<String> for StageName {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl PartialEq<str> for StageName {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for StageName {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// Well-known stage names of the provisioning, deprovisioning and upgrade
/// workflows.
pub mod stages {
    use super::StageName;

    /// Terminal stage; reaching it ends the workflow successfully.
    pub const FINISHED: StageName = StageName::from_static("Finished");

    // Provisioning
    /// Wait until the cluster domain is assigned.
    pub const WAIT_FOR_CLUSTER_DOMAIN: StageName = StageName::from_static("WaitForClusterDomain");
    /// Wait until the cloud provider reports the cluster as created.
    pub const WAIT_FOR_CLUSTER_CREATION: StageName =
        StageName::from_static("WaitForClusterCreation");
    /// Trigger the runtime installation.
    pub const STARTING_INSTALLATION: StageName = StageName::from_static("StartingInstallation");
    /// Poll the installation until it completes.
    pub const WAITING_FOR_INSTALLATION: StageName =
        StageName::from_static("WaitingForInstallation");
    /// Configure the runtime agent with registry credentials.
    pub const CONNECT_RUNTIME_AGENT: StageName = StageName::from_static("ConnectRuntimeAgent");
    /// Wait until the runtime agent reports a connection.
    pub const WAIT_FOR_AGENT_TO_CONNECT: StageName =
        StageName::from_static("WaitForAgentToConnect");

    // Deprovisioning
    /// Remove runtime resources that block cluster deletion.
    pub const CLEANUP_CLUSTER: StageName = StageName::from_static("CleanupCluster");
    /// Request cluster deletion from the cloud provider.
    pub const DEPROVISION_CLUSTER: StageName = StageName::from_static("DeprovisionCluster");
    /// Poll the cloud provider until the cluster is gone.
    pub const WAIT_FOR_CLUSTER_DELETION: StageName =
        StageName::from_static("WaitForClusterDeletion");
    /// Mark the cluster record as deleted.
    pub const DELETE_CLUSTER: StageName = StageName::from_static("DeleteCluster");

    // Upgrade
    /// Trigger the runtime upgrade.
    pub const STARTING_UPGRADE: StageName = StageName::from_static("StartingUpgrade");
    /// Record the outcome of the upgrade.
    pub const UPDATING_UPGRADE_STATE: StageName = StageName::from_static("UpdatingUpgradeState");
}

// ============================================================================
// Operation
// ============================================================================

/// One persisted lifecycle action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique operation identifier.
    pub id: String,
    /// What the operation does.
    pub operation_type: OperationType,
    /// Lifecycle state.
    pub state: OperationState,
    /// Stage currently owning the operation.
    pub stage: StageName,
    /// Target cluster.
    pub cluster_id: String,
    /// When the operation was created.
    pub start_timestamp: DateTime<Utc>,
    /// When the operation reached a terminal state.
    pub end_timestamp: Option<DateTime<Utc>>,
    /// When the stage last changed.
    pub last_transition: Option<DateTime<Utc>>,
    /// Last human-readable status text.
    pub message: String,
}

impl Operation {
    /// Create a new in-progress operation positioned at the initial stage of
    /// its type.
    pub fn new(
        operation_type: OperationType,
        cluster_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation_type,
            state: OperationState::InProgress,
            stage: operation_type.initial_stage(),
            cluster_id: cluster_id.into(),
            start_timestamp: Utc::now(),
            end_timestamp: None,
            last_transition: None,
            message: message.into(),
        }
    }

    /// Reference point for stage timeouts: the last transition, or the start
    /// of the operation if it never transitioned.
    pub fn last_transition_or_start(&self) -> DateTime<Utc> {
        self.last_transition.unwrap_or(self.start_timestamp)
    }
}

// ============================================================================
// Cluster
// ============================================================================

/// Target of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Cluster (runtime) identifier.
    pub id: String,
    /// Owning tenant.
    pub tenant: String,
    /// Provider-specific cluster shape.
    pub cluster_config: ClusterConfig,
    /// Kubeconfig, once the cluster exists.
    pub kubeconfig: Option<String>,
    /// Runtime release and components to install.
    pub kyma_config: KymaConfig,
    /// When the cluster record was created.
    pub creation_timestamp: DateTime<Utc>,
    /// Whether the cluster has been deprovisioned.
    pub deleted: bool,
    /// Optional billing sub-account.
    pub sub_account_id: Option<String>,
}

/// Provider-specific cluster configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ClusterConfig {
    /// Cluster managed through Gardener.
    Gardener(GardenerConfig),
    /// Cluster created directly on GCP.
    Gcp(GcpConfig),
}

impl ClusterConfig {
    /// Name of the cluster on the provider side.
    pub fn name(&self) -> &str {
        match self {
            Self::Gardener(c) => &c.name,
            Self::Gcp(c) => &c.name,
        }
    }

    /// Requested Kubernetes version.
    pub fn kubernetes_version(&self) -> &str {
        match self {
            Self::Gardener(c) => &c.kubernetes_version,
            Self::Gcp(c) => &c.kubernetes_version,
        }
    }
}

/// Gardener shoot configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GardenerConfig {
    pub name: String,
    pub project_name: String,
    pub kubernetes_version: String,
    pub volume_size_gb: i32,
    pub disk_type: String,
    pub machine_type: String,
    pub provider: String,
    pub seed: Option<String>,
    pub target_secret: String,
    pub worker_cidr: String,
    pub region: String,
    pub auto_scaler_min: i32,
    pub auto_scaler_max: i32,
    pub max_surge: i32,
    pub max_unavailable: i32,
    /// Provider-specific settings (zones, networking) kept opaque.
    #[serde(default)]
    pub provider_specific_config: Option<serde_json::Value>,
}

/// Plain GCP cluster configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GcpConfig {
    pub name: String,
    pub project_name: String,
    pub kubernetes_version: String,
    pub number_of_nodes: i32,
    pub boot_disk_size_gb: i32,
    pub machine_type: String,
    pub region: String,
    pub zone: Option<String>,
}

/// Runtime release and component configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KymaConfig {
    pub id: String,
    pub release: Release,
    #[serde(default)]
    pub components: Vec<KymaComponentConfig>,
    #[serde(default)]
    pub global_configuration: Vec<ConfigEntry>,
}

impl KymaConfig {
    /// Components in installation order. Components sharing an order keep
    /// their declaration order.
    pub fn ordered_components(&self) -> Vec<&KymaComponentConfig> {
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort_by_key(|c| c.component_order);
        components
    }
}

/// Runtime release artifacts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Release {
    pub id: String,
    pub version: String,
    pub tiller_yaml: Option<String>,
    pub installer_yaml: String,
}

/// One installable runtime component.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KymaComponentConfig {
    pub id: String,
    pub component: String,
    pub namespace: String,
    pub source_url: Option<String>,
    #[serde(default)]
    pub configuration: Vec<ConfigEntry>,
    #[serde(default)]
    pub component_order: i32,
}

/// Key/value override passed to the installer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub secret: bool,
}
