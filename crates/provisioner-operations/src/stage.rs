// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stage contract and the immutable stage map an executor is built with.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use provisioner_core::{Cluster, Operation, StageName};
use thiserror::Error;

use crate::error::StageError;

/// What a stage wants to happen next.
///
/// `delay == 0` advances to `stage` right away. A non-zero delay pauses the
/// operation and runs `stage` again once the delay has passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    /// Stage to run next.
    pub stage: StageName,
    /// How long to wait before running it.
    pub delay: Duration,
}

impl StageResult {
    /// Advance to `stage` immediately.
    pub fn next(stage: StageName) -> Self {
        Self {
            stage,
            delay: Duration::ZERO,
        }
    }

    /// Run `stage` again after `delay`.
    pub fn wait(stage: StageName, delay: Duration) -> Self {
        Self { stage, delay }
    }

    /// End the workflow successfully.
    pub fn finished() -> Self {
        Self::next(provisioner_core::model::stages::FINISHED)
    }
}

/// One named step of a workflow.
///
/// `run` is invoked again after recoverable errors, after restarts and on
/// every poll, so it must be safe to repeat. Waiting on an external system is
/// expressed by returning [`StageResult::wait`], never by sleeping inside
/// `run`.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Name the stage is registered under.
    fn name(&self) -> StageName;

    /// Longest time an operation may stay on this stage, measured from its
    /// last transition.
    fn time_limit(&self) -> Duration;

    /// Perform one increment of work.
    async fn run(
        &self,
        cluster: &Cluster,
        operation: &Operation,
    ) -> Result<StageResult, StageError>;
}

/// Errors building a [`StageMap`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StageMapError {
    /// Two stages share a name.
    #[error("stage '{0}' registered more than once")]
    Duplicate(StageName),

    /// `Finished` is reserved for workflow completion.
    #[error("stage name '{0}' is reserved")]
    Reserved(StageName),
}

/// Immutable mapping from stage name to implementation.
///
/// Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct StageMap {
    stages: Arc<HashMap<StageName, Arc<dyn Stage>>>,
}

impl StageMap {
    /// Build a map from stage implementations, keyed by [`Stage::name`].
    pub fn new<I>(stages: I) -> Result<Self, StageMapError>
    where
        I: IntoIterator<Item = Arc<dyn Stage>>,
    {
        let mut map = HashMap::new();
        for stage in stages {
            let name = stage.name();
            if name.is_finished() {
                return Err(StageMapError::Reserved(name));
            }
            if map.contains_key(&name) {
                return Err(StageMapError::Duplicate(name));
            }
            map.insert(name, stage);
        }

        Ok(Self {
            stages: Arc::new(map),
        })
    }

    /// Look up a stage.
    pub fn get(&self, name: &StageName) -> Option<&Arc<dyn Stage>> {
        self.stages.get(name)
    }

    /// Number of registered stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether no stage is registered.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Registered stage names, sorted.
    pub fn names(&self) -> Vec<StageName> {
        let mut names: Vec<_> = self.stages.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for StageMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageMap")
            .field("stages", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provisioner_core::model::stages;

    struct Named(StageName);

    #[async_trait]
    impl Stage for Named {
        fn name(&self) -> StageName {
            self.0.clone()
        }

        fn time_limit(&self) -> Duration {
            Duration::from_secs(60)
        }

        async fn run(&self, _: &Cluster, _: &Operation) -> Result<StageResult, StageError> {
            Ok(StageResult::finished())
        }
    }

    fn named(name: StageName) -> Arc<dyn Stage> {
        Arc::new(Named(name))
    }

    #[test]
    fn test_stage_map_lookup() {
        let map = StageMap::new([
            named(stages::STARTING_UPGRADE),
            named(stages::UPDATING_UPGRADE_STATE),
        ])
        .unwrap();

        assert_eq!(map.len(), 2);
        assert!(map.get(&stages::STARTING_UPGRADE).is_some());
        assert!(map.get(&StageName::new("Bogus")).is_none());
        assert_eq!(
            map.names(),
            vec![stages::STARTING_UPGRADE, stages::UPDATING_UPGRADE_STATE]
        );
    }

    #[test]
    fn test_stage_map_rejects_duplicates() {
        let err = StageMap::new([named(stages::DELETE_CLUSTER), named(stages::DELETE_CLUSTER)])
            .unwrap_err();
        assert_eq!(err, StageMapError::Duplicate(stages::DELETE_CLUSTER));
    }

    #[test]
    fn test_stage_map_rejects_finished() {
        let err = StageMap::new([named(stages::FINISHED)]).unwrap_err();
        assert_eq!(err, StageMapError::Reserved(stages::FINISHED));
    }

    #[test]
    fn test_stage_result_constructors() {
        let next = StageResult::next(stages::DELETE_CLUSTER);
        assert_eq!(next.delay, Duration::ZERO);

        let wait = StageResult::wait(stages::WAIT_FOR_CLUSTER_DELETION, Duration::from_secs(20));
        assert_eq!(wait.delay, Duration::from_secs(20));

        assert!(StageResult::finished().stage.is_finished());
    }
}
