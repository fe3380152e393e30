// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-stage time budgets.

use std::time::Duration;

use provisioner_core::StageName;
use provisioner_core::model::stages;

use crate::config::ConfigError;

const MINUTE: u64 = 60;

/// Time budgets for the well-known stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTimeouts {
    /// Waiting for the cluster domain and the cluster itself.
    pub cluster_creation: Duration,
    /// Triggering and waiting for the Kyma installation.
    pub installation: Duration,
    /// Waiting for an upgrade to complete.
    pub upgrade: Duration,
    /// Triggering an upgrade.
    pub upgrade_triggering: Duration,
    /// Configuring the runtime agent.
    pub agent_configuration: Duration,
    /// Waiting for the runtime agent to connect.
    pub agent_connection: Duration,
    /// Deprovisioning and deleting the cluster.
    pub cluster_deletion: Duration,
    /// Removing Kyma from the cluster before deletion.
    pub cluster_cleanup: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            cluster_creation: Duration::from_secs(60 * MINUTE),
            installation: Duration::from_secs(60 * MINUTE),
            upgrade: Duration::from_secs(60 * MINUTE),
            upgrade_triggering: Duration::from_secs(20 * MINUTE),
            agent_configuration: Duration::from_secs(15 * MINUTE),
            agent_connection: Duration::from_secs(15 * MINUTE),
            cluster_deletion: Duration::from_secs(30 * MINUTE),
            cluster_cleanup: Duration::from_secs(20 * MINUTE),
        }
    }
}

impl StageTimeouts {
    /// Read `PROVISIONER_TIMEOUT_*` variables (in minutes) through `lookup`,
    /// keeping defaults for unset ones.
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let minutes = |var: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match lookup(var) {
                None => Ok(default),
                Some(value) => {
                    let secs = value
                        .trim()
                        .parse::<u64>()
                        .ok()
                        .and_then(|m| m.checked_mul(MINUTE));
                    match secs {
                        Some(secs) => Ok(Duration::from_secs(secs)),
                        None => Err(ConfigError::InvalidValue { var, value }),
                    }
                }
            }
        };

        Ok(Self {
            cluster_creation: minutes(
                "PROVISIONER_TIMEOUT_CLUSTER_CREATION",
                defaults.cluster_creation,
            )?,
            installation: minutes("PROVISIONER_TIMEOUT_INSTALLATION", defaults.installation)?,
            upgrade: minutes("PROVISIONER_TIMEOUT_UPGRADE", defaults.upgrade)?,
            upgrade_triggering: minutes(
                "PROVISIONER_TIMEOUT_UPGRADE_TRIGGERING",
                defaults.upgrade_triggering,
            )?,
            agent_configuration: minutes(
                "PROVISIONER_TIMEOUT_AGENT_CONFIGURATION",
                defaults.agent_configuration,
            )?,
            agent_connection: minutes(
                "PROVISIONER_TIMEOUT_AGENT_CONNECTION",
                defaults.agent_connection,
            )?,
            cluster_deletion: minutes(
                "PROVISIONER_TIMEOUT_CLUSTER_DELETION",
                defaults.cluster_deletion,
            )?,
            cluster_cleanup: minutes(
                "PROVISIONER_TIMEOUT_CLUSTER_CLEANUP",
                defaults.cluster_cleanup,
            )?,
        })
    }

    /// Budget for a well-known stage, `None` for any other name.
    pub fn for_stage(&self, stage: &StageName) -> Option<Duration> {
        let budgets = [
            (&stages::WAIT_FOR_CLUSTER_DOMAIN, self.cluster_creation),
            (&stages::WAIT_FOR_CLUSTER_CREATION, self.cluster_creation),
            (&stages::STARTING_INSTALLATION, self.installation),
            (&stages::WAITING_FOR_INSTALLATION, self.installation),
            (&stages::CONNECT_RUNTIME_AGENT, self.agent_configuration),
            (&stages::WAIT_FOR_AGENT_TO_CONNECT, self.agent_connection),
            (&stages::CLEANUP_CLUSTER, self.cluster_cleanup),
            (&stages::DEPROVISION_CLUSTER, self.cluster_deletion),
            (&stages::WAIT_FOR_CLUSTER_DELETION, self.cluster_deletion),
            (&stages::DELETE_CLUSTER, self.cluster_deletion),
            (&stages::STARTING_UPGRADE, self.upgrade_triggering),
            (&stages::UPDATING_UPGRADE_STATE, self.upgrade),
        ];

        budgets
            .into_iter()
            .find(|(name, _)| *name == stage)
            .map(|(_, budget)| budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_budgets() {
        let timeouts = StageTimeouts::default();
        assert_eq!(
            timeouts.for_stage(&stages::WAITING_FOR_INSTALLATION),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(
            timeouts.for_stage(&stages::WAIT_FOR_AGENT_TO_CONNECT),
            Some(Duration::from_secs(15 * 60))
        );
        assert_eq!(
            timeouts.for_stage(&stages::CLEANUP_CLUSTER),
            Some(Duration::from_secs(20 * 60))
        );
        assert_eq!(timeouts.for_stage(&StageName::new("Custom")), None);
        assert_eq!(timeouts.for_stage(&stages::FINISHED), None);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars = HashMap::from([
            ("PROVISIONER_TIMEOUT_INSTALLATION", "90"),
            ("PROVISIONER_TIMEOUT_CLUSTER_CLEANUP", " 5 "),
        ]);
        let lookup = |key: &str| vars.get(key).map(|v| v.to_string());

        let timeouts = StageTimeouts::from_lookup(&lookup).unwrap();
        assert_eq!(timeouts.installation, Duration::from_secs(90 * 60));
        assert_eq!(timeouts.cluster_cleanup, Duration::from_secs(5 * 60));
        assert_eq!(timeouts.upgrade, StageTimeouts::default().upgrade);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let lookup = |key: &str| (key == "PROVISIONER_TIMEOUT_UPGRADE").then(|| "soon".to_string());
        let err = StageTimeouts::from_lookup(&lookup).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { var: "PROVISIONER_TIMEOUT_UPGRADE", .. }
        ));
    }

    #[test]
    fn test_from_lookup_rejects_overflowing_minutes() {
        let lookup = |key: &str| {
            (key == "PROVISIONER_TIMEOUT_CLUSTER_DELETION").then(|| u64::MAX.to_string())
        };
        let err = StageTimeouts::from_lookup(&lookup).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { var: "PROVISIONER_TIMEOUT_CLUSTER_DELETION", .. }
        ));
    }
}
