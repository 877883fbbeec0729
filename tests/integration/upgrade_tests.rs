//! Full rolling upgrades against a real container engine
//!
//! Run with: cargo test --test integration upgrade -- --ignored

use std::sync::Arc;

use rolling_upgrade::client::RestConnector;
use rolling_upgrade::controller::LogExporter;
use rolling_upgrade::driver::{ContainerDriver, RunSide};
use rolling_upgrade::{UpgradeError, UpgradeOrchestrator, generate_run_id};

use crate::{configuration, init_tracing, leftover_containers};

fn orchestrator(
    config: rolling_upgrade::UpgradeConfiguration,
    run_id: &str,
) -> UpgradeOrchestrator {
    let from = Arc::new(ContainerDriver::new(
        config.settings.clone(),
        config.version_from.clone(),
        RunSide::From,
        run_id,
    ));
    let to = Arc::new(ContainerDriver::new(
        config.settings.clone(),
        config.version_to.clone(),
        RunSide::To,
        run_id,
    ));
    let connector = Arc::new(RestConnector::new(&config.settings).expect("http client"));
    UpgradeOrchestrator::new(config, from, to, connector).with_run_id(run_id)
}

// =============================================================================
// Test 1: Single site
// =============================================================================

#[tokio::test]
#[ignore = "requires a container engine"]
async fn test_rolling_upgrade_single_site() {
    init_tracing();
    let config = configuration(2);
    let engine = config.settings.server.engine.clone();
    let expected_version = config.version_to.to_string();
    let run_id = generate_run_id();

    let report = orchestrator(config, &run_id)
        .perform_upgrade()
        .await
        .expect("rolling upgrade failed");

    let site = &report.sites[0];
    assert_eq!(site.iterations, 2);
    assert_eq!(site.final_members, 2);
    assert!(site.nodes.iter().all(|n| n.version == expected_version));
    assert!(leftover_containers(&engine, &run_id).await.is_empty());
}

// =============================================================================
// Test 2: Cross-site
// =============================================================================

#[tokio::test]
#[ignore = "requires a container engine"]
async fn test_rolling_upgrade_cross_site() {
    init_tracing();
    let mut config = configuration(2);
    config.xsite = true;
    let engine = config.settings.server.engine.clone();
    let run_id = generate_run_id();

    let report = orchestrator(config, &run_id)
        .perform_upgrade()
        .await
        .expect("rolling upgrade failed");

    assert_eq!(report.sites.len(), 2);
    assert!(report.sites.iter().all(|s| s.final_members == 2));
    assert!(leftover_containers(&engine, &run_id).await.is_empty());
}

// =============================================================================
// Test 3: Failure path releases everything
// =============================================================================

#[tokio::test]
#[ignore = "requires a container engine"]
async fn test_failed_start_exports_logs_and_cleans_up() {
    init_tracing();
    let mut config = configuration(1);
    // Servers refuse to boot with an unknown transport stack
    config.cluster_protocol = "does-not-exist".to_string();
    let engine = config.settings.server.engine.clone();
    let run_id = generate_run_id();
    let logs = tempfile::tempdir().unwrap();

    let err = orchestrator(config, &run_id)
        .with_failure_handler(LogExporter::new(logs.path()))
        .perform_upgrade()
        .await
        .unwrap_err();

    assert_ne!(err.exit_code(), 0);
    assert!(!matches!(err, UpgradeError::Configuration(_)));
    assert!(std::fs::read_dir(logs.path()).unwrap().next().is_some());
    assert!(leftover_containers(&engine, &run_id).await.is_empty());
}
