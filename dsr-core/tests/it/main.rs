use std::{sync::Arc, time::Instant};

use dsr_common::Address;
use dsr_core::{DsrConfig, Router, RouterBuilder};
use dsr_transport::{MemoryMesh, MemoryTransport, Reception};
use rustc_hash::FxHashMap;

mod concurrency;
mod discovery;
mod driver;
mod maintenance;
mod variants;

pub(crate) fn addr(n: u8) -> Address {
    Address::new([2, 0, 0, 0, 0, n])
}

/// Routers joined by a [`MemoryMesh`], pumped by hand.
pub(crate) struct Network {
    pub(crate) mesh: Arc<MemoryMesh>,
    /// Routers by interface address.
    by_iface: FxHashMap<Address, Arc<Router<MemoryTransport>>>,
    /// Routers by node address.
    nodes: FxHashMap<Address, Arc<Router<MemoryTransport>>>,
}

impl Network {
    pub(crate) fn new() -> Self {
        Self { mesh: MemoryMesh::new(), by_iface: FxHashMap::default(), nodes: FxHashMap::default() }
    }

    /// Adds the node `addr(n)` with a single interface.
    pub(crate) fn node(&mut self, n: u8, config: DsrConfig) -> Arc<Router<MemoryTransport>> {
        self.add(RouterBuilder::new(addr(n)).config(config))
    }

    pub(crate) fn add(&mut self, builder: RouterBuilder) -> Arc<Router<MemoryTransport>> {
        let endpoint = self.mesh.endpoint(builder.local());
        let router = Arc::new(builder.build(endpoint));

        for iface in router.interfaces() {
            self.by_iface.insert(*iface, Arc::clone(&router));
        }
        self.nodes.insert(router.local(), Arc::clone(&router));
        router
    }

    /// Adds single-interface nodes and links them in a line.
    pub(crate) fn chain(&mut self, ids: &[u8], config: &DsrConfig) {
        for n in ids {
            self.node(*n, config.clone());
        }
        for pair in ids.windows(2) {
            self.mesh.connect(addr(pair[0]), addr(pair[1]));
        }
    }

    pub(crate) fn router(&self, n: u8) -> &Arc<Router<MemoryTransport>> {
        &self.nodes[&addr(n)]
    }

    /// Hands every frame on the medium to its receiver until the medium is quiet. Returns the
    /// number of receptions.
    pub(crate) fn pump(&self, now: Instant) -> usize {
        let mut receptions = 0;
        while let Some(reception) = self.mesh.next_reception() {
            let Reception { iface, frame } = reception.expect("frames on the medium decode");
            receptions += 1;
            assert!(receptions < 10_000, "frames keep circulating");

            if let Some(router) = self.by_iface.get(&iface) {
                let _ = router.handle_frame(frame, iface, now);
            }
        }
        receptions
    }

    pub(crate) fn sweep_maintenance(&self, now: Instant) {
        for router in self.nodes.values() {
            router.sweep_maintenance(now);
        }
    }
}
