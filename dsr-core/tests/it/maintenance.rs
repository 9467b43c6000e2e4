use std::time::{Duration, Instant};

use bytes::Bytes;
use dsr_common::Path;
use dsr_core::{DsrConfig, LinkState, RouteCacheError};

use crate::{addr, Network};

fn acked(count: u32) -> DsrConfig {
    DsrConfig::default().with_network_ack(true).with_retransmissions(count, Duration::from_millis(50))
}

#[test]
fn broken_link_is_reported_to_the_originator() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut net = Network::new();
    net.chain(&[1, 2, 3, 4], &acked(1));
    let start = Instant::now();
    let a = net.router(1);

    a.send(addr(4), Bytes::from_static(b"first"), start).unwrap();
    net.pump(start);
    assert_eq!(a.route_cache().lookup(&addr(4)).unwrap().hops(), &[addr(1), addr(2), addr(3), addr(4)]);

    let now = start + Duration::from_millis(5);
    net.sweep_maintenance(now);
    net.pump(now);
    assert_eq!(net.mesh.delivered(&addr(4)).len(), 1);
    // Every hop was acknowledged.
    for n in 1..=4 {
        assert!(net.router(n).maintenance_buffer().is_empty(), "node {n}");
    }

    net.mesh.disconnect(addr(3), addr(4));
    let now = start + Duration::from_millis(10);
    a.send(addr(4), Bytes::from_static(b"second"), now).unwrap();
    net.pump(now);

    let c = net.router(3);
    assert_eq!(c.maintenance_buffer().len(), 1);
    assert!(a.maintenance_buffer().is_empty());

    // One retransmission, then the link is declared broken.
    net.sweep_maintenance(now + Duration::from_millis(50));
    net.pump(now + Duration::from_millis(50));
    assert_eq!(c.stats().link_failures(), 0);

    let now = now + Duration::from_millis(100);
    net.sweep_maintenance(now);
    net.pump(now);

    assert_eq!(c.stats().link_failures(), 1);
    assert_eq!(c.stats().route_errors(), 1);
    assert_eq!(a.route_cache().lookup(&addr(4)), Err(RouteCacheError::NotFound(addr(4))));
    assert_eq!(net.mesh.delivered(&addr(4)).len(), 1);
    // The route error was acknowledged hop by hop too.
    for n in 1..=3 {
        assert!(net.router(n).maintenance_buffer().is_empty(), "node {n}");
    }
}

#[test]
fn lost_route_reply_blacklists_the_neighbor() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut net = Network::new();
    for n in 1..=3 {
        net.node(n, acked(0));
    }
    net.mesh.connect(addr(1), addr(2));
    // C hears B, B does not hear C.
    net.mesh.connect_directed(addr(2), addr(3));
    let start = Instant::now();
    let (a, c) = (net.router(1), net.router(3));

    a.send(addr(3), Bytes::from_static(b"one way"), start).unwrap();
    net.pump(start);
    assert_eq!(c.stats().route_replies(), 1);

    net.sweep_maintenance(start + Duration::from_millis(50));
    assert_eq!(c.stats().link_failures(), 1);
    assert_eq!(c.blacklist().state(&addr(2)), Some(LinkState::Probable));
    // C originated the reply, there is nobody to send a route error to.
    assert_eq!(c.stats().route_errors(), 0);

    // The link heals. The retried discovery's reply is acknowledged, which clears the entry.
    net.mesh.connect_directed(addr(3), addr(2));
    let retry = start + Duration::from_secs(1);
    a.run_route_requests(retry);
    net.pump(retry);

    assert_eq!(c.blacklist().state(&addr(2)), None);
    assert_eq!(a.route_cache().lookup(&addr(3)).unwrap().hops(), &[addr(1), addr(2), addr(3)]);
}

#[test]
fn passive_acknowledgement() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut net = Network::new();
    net.chain(&[1, 2, 3], &DsrConfig::default().with_passive_ack(true));
    let now = Instant::now();
    let a = net.router(1);

    a.route_cache().add_path(addr(3), Path::new(vec![addr(1), addr(2), addr(3)], 200).unwrap()).unwrap();
    a.send(addr(3), Bytes::from_static(b"overheard"), now).unwrap();
    assert_eq!(a.maintenance_buffer().len(), 1);

    // A overhears B forwarding the frame. B sends to the final hop, which does not forward, so
    // B does not track it.
    net.pump(now);
    assert!(a.maintenance_buffer().is_empty());
    assert!(net.router(2).maintenance_buffer().is_empty());
    assert_eq!(net.mesh.delivered(&addr(3)).len(), 1);
}
