use std::{thread, time::Instant};

use bytes::Bytes;
use dsr_common::{Address, Path};
use dsr_core::{DsrConfig, ProtocolVariant};
use dsr_wire::{DsrOption, Frame, Hop};

use crate::{addr, Network};

/// A flooded broadcast packet from `initiator`, as relayed by `neighbor`.
fn flooded_copy(initiator: u8, neighbor: u8, identification: u16) -> Frame {
    let route = vec![Hop::new(addr(initiator), 0), Hop::new(addr(neighbor), 100)];
    let mut frame = Frame::new(addr(initiator), Address::BROADCAST, Bytes::from_static(b"flood"))
        .with_option(DsrOption::RouteRequest { identification, target: Address::BROADCAST, ttl: 16, route });
    frame.l2_src = addr(neighbor);
    frame.l2_dst = Address::BROADCAST;
    frame
}

#[test]
fn parallel_copies_of_a_broadcast_are_delivered_once() {
    let _ = tracing_subscriber::fmt::try_init();

    // Neighbor fan-out relays several copies of one request.
    let mut net = Network::new();
    let router = net.node(5, DsrConfig::for_variant(ProtocolVariant::Smr));
    let now = Instant::now();

    for round in 0..20 {
        thread::scope(|s| {
            for neighbor in 10..18 {
                let router = &router;
                s.spawn(move || {
                    let frame = flooded_copy(1, neighbor, round);
                    router.handle_frame(frame, addr(5), now).unwrap();
                });
            }
        });
    }

    assert_eq!(net.mesh.delivered(&addr(5)).len(), 20);
}

#[test]
fn parallel_senders_share_a_route() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut net = Network::new();
    net.chain(&[1, 2, 3], &DsrConfig::default());
    let now = Instant::now();
    let a = net.router(1);
    a.route_cache().add_path(addr(3), Path::new(vec![addr(1), addr(2), addr(3)], 200).unwrap()).unwrap();

    thread::scope(|s| {
        for worker in 0..4u8 {
            s.spawn(move || {
                for i in 0..25u8 {
                    a.send(addr(3), Bytes::from(vec![worker, i]), now).unwrap();
                }
            });
        }
    });
    net.pump(now);

    assert_eq!(net.mesh.delivered(&addr(3)).len(), 100);
    assert_eq!(net.router(2).stats().forwarded(), 100);
    assert_eq!(a.stats().originated(), 100);
}
