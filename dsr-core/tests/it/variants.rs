use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use dsr_core::{
    CacheMode, DsrConfig, Etx, LinkMetric, ProtocolVariant, RouteCacheError, RouterBuilder, StaticEtx,
};

use crate::{addr, Network};

/// Two routes from 1 to 3: over 2 and over 4.
fn diamond(config: &DsrConfig) -> Network {
    let mut net = Network::new();
    for n in 1..=4 {
        net.node(n, config.clone());
    }
    for (a, b) in [(1, 2), (2, 3), (1, 4), (4, 3)] {
        net.mesh.connect(addr(a), addr(b));
    }
    net
}

#[test]
fn dsr_keeps_a_single_route() {
    let _ = tracing_subscriber::fmt::try_init();

    let net = diamond(&DsrConfig::for_variant(ProtocolVariant::Dsr));
    let now = Instant::now();

    net.router(1).send(addr(3), Bytes::from_static(b"data"), now).unwrap();
    net.pump(now);

    // The target answered both requests, only one route is kept.
    assert_eq!(net.router(3).stats().route_replies(), 2);
    assert_eq!(net.router(1).route_cache().paths(&addr(3)).len(), 1);
}

#[test]
fn mdsr_caches_link_disjoint_routes() {
    let _ = tracing_subscriber::fmt::try_init();

    let net = diamond(&DsrConfig::for_variant(ProtocolVariant::Mdsr));
    let now = Instant::now();

    net.router(1).send(addr(3), Bytes::from_static(b"data"), now).unwrap();
    net.pump(now);

    let mut relays: Vec<_> = net.router(1).route_cache().paths(&addr(3)).iter().map(|p| p.hops()[1]).collect();
    relays.sort();
    assert_eq!(relays, vec![addr(2), addr(4)]);
}

#[test]
fn smr_answers_the_disjoint_route_after_the_window() {
    let _ = tracing_subscriber::fmt::try_init();

    // 1 - 2 - 3 and 1 - 4 - 5 - 3.
    let config = DsrConfig::for_variant(ProtocolVariant::Smr);
    let window = config.rreq_table.reply_window;
    let mut net = Network::new();
    for n in 1..=5 {
        net.node(n, config.clone());
    }
    for (a, b) in [(1, 2), (2, 3), (1, 4), (4, 5), (5, 3)] {
        net.mesh.connect(addr(a), addr(b));
    }
    let now = Instant::now();
    let a = net.router(1);

    a.send(addr(3), Bytes::from_static(b"data"), now).unwrap();
    net.pump(now);

    // Only the fastest request was answered so far.
    let paths = a.route_cache().paths(&addr(3));
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].hops(), &[addr(1), addr(2), addr(3)]);

    net.router(3).run_route_requests(now + window);
    net.pump(now + window);

    let paths = a.route_cache().paths(&addr(3));
    assert_eq!(paths.len(), 2);
    assert_eq!(paths[1].hops(), &[addr(1), addr(4), addr(5), addr(3)]);
    // The primary route stays first.
    assert_eq!(a.route_cache().lookup(&addr(3)).unwrap(), paths[0]);
}

#[test]
fn etx_prefers_the_lighter_route() {
    let _ = tracing_subscriber::fmt::try_init();

    let etx = Etx::new(StaticEtx::new(1.0));
    // The last hop of the route over 2 is lossy.
    etx.estimator().set(addr(3), addr(2), 4.0);
    let metric: Arc<dyn LinkMetric> = Arc::new(etx);

    let config = DsrConfig::for_variant(ProtocolVariant::EtxDsr);
    let mut net = Network::new();
    for n in 1..=4 {
        net.add(RouterBuilder::new(addr(n)).config(config.clone()).metric(Arc::clone(&metric)));
    }
    for (a, b) in [(1, 2), (2, 3), (1, 4), (4, 3)] {
        net.mesh.connect(addr(a), addr(b));
    }
    let now = Instant::now();

    net.router(1).send(addr(3), Bytes::from_static(b"data"), now).unwrap();
    net.pump(now);

    let path = net.router(1).route_cache().lookup(&addr(3)).unwrap();
    assert_eq!(path.hops(), &[addr(1), addr(4), addr(3)]);
    assert_eq!(path.weight(), 200);
}

#[test]
fn link_cache_mode() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut net = Network::new();
    net.chain(&[1, 2, 3], &DsrConfig::default().with_cache_mode(CacheMode::Link));
    let now = Instant::now();
    let a = net.router(1);

    a.send(addr(3), Bytes::from_static(b"data"), now).unwrap();
    net.pump(now);

    let links = a.route_cache().link_cache();
    assert_eq!(links.link_weight(&addr(1), &addr(2)), Some(100));
    assert_eq!(links.link_weight(&addr(2), &addr(3)), Some(100));
    // Replies are learned in both directions.
    assert_eq!(links.link_weight(&addr(3), &addr(2)), Some(100));
    assert_eq!(links.shortest_path(&addr(2), &addr(1)).unwrap().hops(), &[addr(2), addr(1)]);

    let path = a.route_cache().lookup(&addr(3)).unwrap();
    assert_eq!(path.hops(), &[addr(1), addr(2), addr(3)]);
    assert_eq!(path.weight(), 200);
    // Intermediate nodes are reachable too.
    assert_eq!(a.route_cache().lookup(&addr(2)).unwrap().hops(), &[addr(1), addr(2)]);

    net.sweep_maintenance(now + Duration::from_millis(10));
    net.pump(now + Duration::from_millis(10));
    assert_eq!(net.mesh.delivered(&addr(3)).len(), 1);

    a.route_cache().process_link_error(&addr(2), &addr(3));
    assert_eq!(a.route_cache().lookup(&addr(3)), Err(RouteCacheError::NotFound(addr(3))));
    // 3 still links back to 2.
    assert_eq!(a.sweep_link_cache(), 0);
    a.route_cache().process_link_error(&addr(3), &addr(2));
    assert_eq!(a.sweep_link_cache(), 1);
}
