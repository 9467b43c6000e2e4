use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use dsr_common::Path;
use dsr_core::{Driver, DsrConfig, RouterBuilder};
use dsr_transport::MemoryMesh;

use crate::addr;

#[tokio::test]
async fn driver_detects_a_silent_neighbor() {
    let _ = tracing_subscriber::fmt::try_init();

    // Node 2 has no router and never acknowledges.
    let mesh = MemoryMesh::new();
    mesh.connect(addr(1), addr(2));

    let config = DsrConfig::default().with_network_ack(true).with_retransmissions(1, Duration::from_millis(10));
    let router = Arc::new(RouterBuilder::new(addr(1)).config(config).build(mesh.endpoint(addr(1))));
    router.route_cache().add_path(addr(2), Path::new(vec![addr(1), addr(2)], 100).unwrap()).unwrap();

    router.send(addr(2), Bytes::from_static(b"ping"), Instant::now()).unwrap();
    assert_eq!(router.maintenance_buffer().len(), 1);

    let driver = Driver::spawn(Arc::clone(&router));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(router.maintenance_buffer().is_empty());
    assert_eq!(router.stats().link_failures(), 1);
    assert!(router.route_cache().lookup(&addr(2)).is_err());
    // The original transmission and one retransmission.
    assert_eq!(mesh.transmissions(), 2);

    driver.shutdown().await;
}

#[tokio::test]
async fn driver_retries_route_discovery() {
    let _ = tracing_subscriber::fmt::try_init();

    let mesh = MemoryMesh::new();
    let config = DsrConfig::default().with_route_discovery(Duration::from_millis(50), 3);
    let router = Arc::new(RouterBuilder::new(addr(1)).config(config).build(mesh.endpoint(addr(1))));

    router.send(addr(9), Bytes::from_static(b"anyone"), Instant::now()).unwrap();
    assert_eq!(router.stats().route_requests(), 1);

    let driver = Driver::spawn(Arc::clone(&router));
    tokio::time::sleep(Duration::from_millis(300)).await;
    driver.shutdown().await;

    assert!(router.stats().route_requests() > 1);
}
