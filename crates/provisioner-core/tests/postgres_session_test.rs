// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the PostgreSQL session backend.
//!
//! These run only when `TEST_PROVISIONER_DATABASE_URL` points at a database.

use chrono::Utc;
use provisioner_core::SessionError;
use provisioner_core::model::{
    Cluster, ClusterConfig, GcpConfig, KymaConfig, Operation, OperationState, OperationType,
    stages,
};
use provisioner_core::persistence::{PostgresSession, Session};
use uuid::Uuid;

/// Helper macro to skip tests if database URL is not set.
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_PROVISIONER_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_PROVISIONER_DATABASE_URL not set");
            return;
        }
    };
}

async fn get_test_session() -> Option<PostgresSession> {
    let database_url = std::env::var("TEST_PROVISIONER_DATABASE_URL").ok()?;
    PostgresSession::connect(&database_url, 2).await.ok()
}

fn test_cluster() -> Cluster {
    Cluster {
        id: Uuid::new_v4().to_string(),
        tenant: "tenant-pg".to_string(),
        cluster_config: ClusterConfig::Gcp(GcpConfig {
            name: "gcp-cluster".to_string(),
            project_name: "project".to_string(),
            kubernetes_version: "1.15".to_string(),
            number_of_nodes: 3,
            boot_disk_size_gb: 30,
            machine_type: "n1-standard-4".to_string(),
            region: "europe-west1".to_string(),
            zone: Some("europe-west1-b".to_string()),
        }),
        kubeconfig: None,
        kyma_config: KymaConfig::default(),
        creation_timestamp: Utc::now(),
        deleted: false,
        sub_account_id: None,
    }
}

async fn cleanup(session: &PostgresSession, cluster_id: &str) {
    sqlx::query("DELETE FROM cluster WHERE id = $1")
        .bind(cluster_id)
        .execute(session.pool())
        .await
        .ok();
}

#[tokio::test]
async fn test_operation_lifecycle() {
    skip_if_no_db!();

    let Some(session) = get_test_session().await else {
        eprintln!("Skipping test: failed to connect to database");
        return;
    };

    let cluster = test_cluster();
    session.insert_cluster(&cluster).await.unwrap();
    let operation = Operation::new(OperationType::Provision, &cluster.id, "Provisioning started");
    session.insert_operation(&operation).await.unwrap();

    session
        .transition_operation(
            &operation.id,
            "Starting installation",
            &stages::STARTING_INSTALLATION,
            Utc::now(),
        )
        .await
        .unwrap();
    session
        .update_operation_state(
            &operation.id,
            "Operation succeeded",
            OperationState::Succeeded,
            Utc::now(),
        )
        .await
        .unwrap();

    let loaded = session.get_operation(&operation.id).await.unwrap();
    assert_eq!(loaded.stage, stages::STARTING_INSTALLATION);
    assert_eq!(loaded.state, OperationState::Succeeded);
    assert!(loaded.end_timestamp.is_some());

    let err = session
        .update_operation_state(&operation.id, "late", OperationState::Failed, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidState { .. }));

    let loaded_cluster = session.get_cluster(&cluster.id).await.unwrap();
    assert_eq!(loaded_cluster.cluster_config, cluster.cluster_config);

    cleanup(&session, &cluster.id).await;
}

#[tokio::test]
async fn test_in_progress_listing_excludes_terminal() {
    skip_if_no_db!();

    let Some(session) = get_test_session().await else {
        eprintln!("Skipping test: failed to connect to database");
        return;
    };

    let cluster = test_cluster();
    session.insert_cluster(&cluster).await.unwrap();
    let running = Operation::new(OperationType::Upgrade, &cluster.id, "");
    let failed = Operation::new(OperationType::Deprovision, &cluster.id, "");
    session.insert_operation(&running).await.unwrap();
    session.insert_operation(&failed).await.unwrap();
    session
        .update_operation_state(&failed.id, "x", OperationState::Failed, Utc::now())
        .await
        .unwrap();

    let ids: Vec<_> = session
        .list_in_progress_operations()
        .await
        .unwrap()
        .into_iter()
        .map(|op| op.id)
        .collect();
    assert!(ids.contains(&running.id));
    assert!(!ids.contains(&failed.id));

    cleanup(&session, &cluster.id).await;
}
