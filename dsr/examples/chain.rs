use std::time::{Duration, Instant};

use bytes::Bytes;
use dsr::{Address, DsrConfig, MemoryMesh, Reception, RouterBuilder};

fn addr(n: u8) -> Address {
    Address::new([2, 0, 0, 0, 0, n])
}

fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    // A - B - C on a shared in-memory medium.
    let mesh = MemoryMesh::new();
    let config = DsrConfig::default().with_network_ack(true);
    let routers: Vec<_> = (1..=3)
        .map(|n| RouterBuilder::new(addr(n)).config(config.clone()).build(mesh.endpoint(addr(n))))
        .collect();
    mesh.connect(addr(1), addr(2));
    mesh.connect(addr(2), addr(3));

    let pump = |now: Instant| {
        while let Some(reception) = mesh.next_reception() {
            let Reception { iface, frame } = reception.unwrap();
            if let Some(router) = routers.iter().find(|r| r.is_local(&iface)) {
                if let Err(e) = router.handle_frame(frame, iface, now) {
                    println!("{iface} dropped a frame: {e}");
                }
            }
        }
    };

    let now = Instant::now();
    routers[0].send(addr(3), Bytes::from("hello"), now).unwrap();
    pump(now);

    let path = routers[0].route_cache().lookup(&addr(3)).unwrap();
    println!("Route: {path}");

    // The buffered packet leaves with the next maintenance sweep.
    let later = now + Duration::from_millis(10);
    for router in &routers {
        router.sweep_maintenance(later);
    }
    pump(later);

    for frame in mesh.delivered(&addr(3)) {
        println!("Delivered from {}: {:?}", frame.source, frame.payload);
    }
}
