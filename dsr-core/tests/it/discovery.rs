use std::time::{Duration, Instant};

use bytes::Bytes;
use dsr_core::{DsrConfig, RouteCacheError, RouterBuilder};
use dsr_wire::DsrOption;

use crate::{addr, Network};

#[test]
fn three_node_chain() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut net = Network::new();
    net.chain(&[1, 2, 3], &DsrConfig::default());
    let now = Instant::now();
    let a = net.router(1);

    assert_eq!(a.route_cache().lookup(&addr(3)), Err(RouteCacheError::NotFound(addr(3))));

    a.send(addr(3), Bytes::from_static(b"hello"), now).unwrap();
    assert_eq!(a.send_buffer().pending_for(&addr(3)), 1);
    assert!(a.rreq_table().is_discovering(&addr(3)));

    // The request floods with the maximum TTL.
    let request = net.mesh.next_reception().unwrap().unwrap();
    assert_eq!(request.iface, addr(2));
    assert!(request.frame.is_l2_broadcast());
    let DsrOption::RouteRequest { ttl, target, route, .. } = &request.frame.options[0] else {
        panic!("expected a route request");
    };
    assert_eq!((*ttl, *target), (255, addr(3)));
    assert_eq!(route.len(), 1);
    net.router(2).handle_frame(request.frame, request.iface, now).unwrap();

    net.pump(now);

    let path = a.route_cache().lookup(&addr(3)).unwrap();
    assert_eq!(path.hops(), &[addr(1), addr(2), addr(3)]);
    assert_eq!(path.weight(), 200);
    assert!(!a.rreq_table().is_discovering(&addr(3)));

    // The buffered packet goes out with the first flush step.
    assert!(a.send_buffer().is_empty());
    assert!(net.mesh.delivered(&addr(3)).is_empty());
    net.sweep_maintenance(now + Duration::from_millis(10));
    net.pump(now + Duration::from_millis(10));

    let delivered = net.mesh.delivered(&addr(3));
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].source, addr(1));
    assert_eq!(delivered[0].payload, Bytes::from_static(b"hello"));
    assert!(a.maintenance_buffer().is_empty());

    // B relayed the reply and the packet.
    assert_eq!(net.router(2).stats().forwarded(), 2);
    assert_eq!(net.router(3).stats().route_replies(), 1);

    // With the route cached, further packets go out at once.
    a.send(addr(3), Bytes::from_static(b"again"), now).unwrap();
    net.pump(now);
    assert_eq!(net.mesh.delivered(&addr(3)).len(), 2);
}

#[test]
fn broadcast_is_delivered_once_per_node() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut net = Network::new();
    net.chain(&[1, 2, 3], &DsrConfig::default());
    net.mesh.connect(addr(1), addr(3));
    let now = Instant::now();

    net.router(1).send(dsr_common::Address::BROADCAST, Bytes::from_static(b"everyone"), now).unwrap();
    net.pump(now);

    for n in [2, 3] {
        let delivered = net.mesh.delivered(&addr(n));
        assert_eq!(delivered.len(), 1, "node {n}");
        assert_eq!(delivered[0].payload, Bytes::from_static(b"everyone"));
    }
    assert!(net.mesh.delivered(&addr(1)).is_empty());
}

#[test]
fn interface_change_on_relay() {
    let _ = tracing_subscriber::fmt::try_init();

    // B listens to A on its node address and to C on a second interface.
    let mut net = Network::new();
    net.node(1, DsrConfig::default());
    net.add(RouterBuilder::new(addr(2)).interfaces([addr(2), addr(22)]));
    net.node(3, DsrConfig::default());
    net.mesh.connect(addr(1), addr(2));
    net.mesh.connect(addr(22), addr(3));
    let now = Instant::now();

    let a = net.router(1);
    a.send(addr(3), Bytes::from_static(b"across"), now).unwrap();
    net.pump(now);

    let path = a.route_cache().lookup(&addr(3)).unwrap();
    assert_eq!(path.hops(), &[addr(1), addr(2), addr(22), addr(3)]);
    assert_eq!(path.weight(), 200);

    net.sweep_maintenance(now + Duration::from_millis(10));
    net.pump(now);
    assert_eq!(net.mesh.delivered(&addr(3)).len(), 1);
}

#[test]
fn unreachable_destination_gives_up() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut net = Network::new();
    net.node(1, DsrConfig::default());
    let start = Instant::now();
    let a = net.router(1);

    a.send(addr(9), Bytes::from_static(b"lost"), start).unwrap();
    assert_eq!(a.stats().route_requests(), 1);

    // Retries after 1, 2 and 4 seconds.
    for at in [1, 3, 7] {
        a.run_route_requests(start + Duration::from_secs(at));
    }
    assert_eq!(a.stats().route_requests(), 4);

    a.run_route_requests(start + Duration::from_secs(15));
    assert_eq!(a.stats().route_requests(), 4);
    assert!(!a.rreq_table().is_discovering(&addr(9)));

    // The packet expires from the send buffer.
    assert_eq!(a.sweep_send_buffer(start + Duration::from_secs(19)), 0);
    assert_eq!(a.sweep_send_buffer(start + Duration::from_secs(20)), 1);
    assert_eq!(a.stats().dropped(), 1);
}
