//! Container driver lifecycle against a real engine
//!
//! Run with: cargo test --test integration driver -- --ignored

use rolling_upgrade::client::{ClientConnector, CollectionDefinition, DataClient, RestConnector};
use rolling_upgrade::driver::{ClusterDriver, ClusterHandle, ClusterSpec, ContainerDriver, RunSide};
use rolling_upgrade::generate_run_id;

use crate::{init_tracing, leftover_containers, settings, version_from};

#[tokio::test]
#[ignore = "requires a container engine"]
async fn test_single_node_lifecycle() {
    init_tracing();
    let settings = settings();
    let engine = settings.server.engine.clone();
    let run_id = generate_run_id();
    let version = version_from();
    let driver = ContainerDriver::new(settings.clone(), version.clone(), RunSide::From, run_id.as_str());
    let mut handle = ClusterHandle::new(
        ClusterSpec {
            site: "site1".to_string(),
            side: RunSide::From,
            protocol: "tcp".to_string(),
            expected_members: 1,
            shared_data_mount: true,
        },
        version,
    );

    driver.start_nodes(&mut handle, &[0]).await.expect("start");
    let address = handle.address(0).expect("address").to_string();

    let mut client = RestConnector::new(&settings)
        .unwrap()
        .connect(&address)
        .await
        .expect("connect");
    client
        .create_collection(&CollectionDefinition::replicated("lifecycle"))
        .await
        .expect("create cache");
    client.put("lifecycle", "k", "v").await.expect("put");
    assert_eq!(client.get("lifecycle", "k").await.unwrap().as_deref(), Some("v"));
    assert_eq!(client.topology("lifecycle").await.unwrap().member_count(), 1);

    driver.stop_node(&mut handle, 0).await.expect("stop");
    // Second stop is a no-op
    driver.stop_node(&mut handle, 0).await.expect("second stop");

    // Logs of a stopped node can still be exported
    let logs = tempfile::tempdir().unwrap();
    let exported = driver
        .export_files(&handle, 0, "log", logs.path())
        .await
        .expect("export");
    assert!(std::fs::read_dir(exported).unwrap().next().is_some());

    driver.release_cluster(&mut handle).await.expect("release");
    driver.release_artifacts().await.expect("release artifacts");
    assert!(leftover_containers(&engine, &run_id).await.is_empty());
}
