use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use dsr_common::{constants::MAX_TTL, Address, IdentificationCounter};
use dsr_transport::Transport;
use dsr_wire::{DsrOption, Frame, Hop, OptionType};
use tracing::{debug, trace, warn};

use crate::{
    blacklist::{Blacklist, BlacklistSweep},
    config::ConfigHandle,
    error::{DsrError, RouteCacheError},
    maintenance::{BufferedFrame, LinkFailure, MaintenanceBuffer, MaintenanceEvent},
    metric::{HopCount, LinkMetric},
    route_cache::RouteCache,
    rreq_table::{Discovery, ReplyCandidate, RequestId, RouteRequestTable, RreqTableAction},
    send_buffer::SendBuffer,
    stats::RouterStats,
};

mod rx;

/// Builds a [`Router`].
#[derive(Debug)]
pub struct RouterBuilder {
    local: Address,
    interfaces: Vec<Address>,
    metric: Arc<dyn LinkMetric>,
    config: ConfigHandle,
}

impl RouterBuilder {
    /// Starts building a router for the node `local`.
    pub fn new(local: Address) -> Self {
        Self { local, interfaces: Vec::new(), metric: Arc::new(HopCount), config: ConfigHandle::default() }
    }

    /// Sets the addresses of the node's interfaces. Defaults to a single interface carrying the
    /// node address.
    pub fn interfaces(mut self, interfaces: impl IntoIterator<Item = Address>) -> Self {
        self.interfaces = interfaces.into_iter().collect();
        self
    }

    /// Sets the link metric. Defaults to [`HopCount`].
    pub fn metric(mut self, metric: Arc<dyn LinkMetric>) -> Self {
        self.metric = metric;
        self
    }

    pub fn config(mut self, config: impl Into<ConfigHandle>) -> Self {
        self.config = config.into();
        self
    }

    /// The address of the node being built.
    pub fn local(&self) -> Address {
        self.local
    }

    /// Builds the router. A variant that needs a volatile metric but got a static one is
    /// logged and built anyway.
    pub fn build<T: Transport>(self, transport: T) -> Router<T> {
        let Self { local, mut interfaces, metric, config } = self;
        interfaces.dedup();
        if interfaces.is_empty() {
            interfaces.push(local);
        }

        let variant = config.load().variant;
        if variant.needs_volatile_metric() && !metric.is_volatile() {
            warn!(%local, ?variant, ?metric, "protocol variant expects a volatile link metric");
        }

        Router {
            local,
            interfaces,
            transport,
            route_cache: RouteCache::new(local, metric.is_volatile(), config.clone()),
            metric,
            blacklist: Blacklist::new(config.clone()),
            rreq_table: RouteRequestTable::new(config.clone()),
            maintenance: MaintenanceBuffer::new(config.clone()),
            send_buffer: SendBuffer::new(config.clone()),
            config,
            rreq_ids: IdentificationCounter::random(),
            ack_ids: IdentificationCounter::random(),
            stats: RouterStats::default(),
        }
    }
}

/// A DSR node.
///
/// The router owns the node's tables and handles every frame the node sends, receives or
/// forwards. Received frames enter through [`Router::handle_frame`], packets from the local host
/// through [`Router::send`]. Timers are not run by the router itself: the `sweep_*` and
/// `run_*` methods are called periodically, usually by a [`Driver`](crate::Driver).
///
/// Every method takes the current time explicitly.
#[derive(Debug)]
pub struct Router<T> {
    local: Address,
    /// Never empty. The first entry is the default egress interface.
    interfaces: Vec<Address>,
    transport: T,
    metric: Arc<dyn LinkMetric>,
    config: ConfigHandle,
    blacklist: Blacklist,
    route_cache: RouteCache,
    rreq_table: RouteRequestTable,
    maintenance: MaintenanceBuffer,
    send_buffer: SendBuffer,
    rreq_ids: IdentificationCounter,
    ack_ids: IdentificationCounter,
    stats: RouterStats,
}

impl<T: Transport> Router<T> {
    /// Sends `payload` from the local host to `destination`.
    ///
    /// Broadcast packets are flooded piggybacked on a route request. Unicast packets use a cached
    /// route if there is one, otherwise they wait in the send buffer while a route discovery
    /// runs.
    pub fn send(&self, destination: Address, payload: Bytes, now: Instant) -> Result<(), DsrError> {
        self.stats.increment_originated();

        if destination.is_broadcast() {
            debug!(len = payload.len(), "flooding broadcast packet");
            self.send_route_request(Address::BROADCAST, MAX_TTL, payload, now);
            return Ok(());
        }

        let frame = Frame::new(self.local, destination, payload);
        if self.is_local(&destination) {
            return self.deliver(frame);
        }

        match self.route_cache.lookup(&destination) {
            Ok(path) => self.send_source_routed(frame, path.into_hops(), None, None, now),
            Err(RouteCacheError::NotFound(_)) => {
                trace!(dest = %destination, "no route, buffering packet");
                self.send_buffer.add(destination, frame, now);
                self.discover(destination, now);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Expires blacklist entries.
    pub fn sweep_blacklist(&self, now: Instant) -> BlacklistSweep {
        self.blacklist.sweep(now)
    }

    /// Retries unanswered route discoveries and sends the replies picked by deferred reply
    /// arbitration.
    pub fn run_route_requests(&self, now: Instant) {
        for action in self.rreq_table.run(now) {
            match action {
                RreqTableAction::Retry { destination, ttl } => {
                    if self.route_cache.lookup(&destination).is_ok() {
                        self.rreq_table.got_reply(&destination);
                        self.flush_send_buffer(destination, now);
                        continue;
                    }

                    debug!(dest = %destination, ttl, "retrying route discovery");
                    self.send_route_request(destination, ttl, Bytes::new(), now);
                }
                RreqTableAction::GaveUp { destination } => {
                    let pending = self.send_buffer.pending_for(&destination);
                    debug!(dest = %destination, pending, "route discovery gave up");
                }
                RreqTableAction::Reply(candidate) => {
                    if let Err(e) = self.send_route_reply(&candidate, now) {
                        debug!(err = %e, initiator = %candidate.initiator, "failed to send deferred route reply");
                    }
                }
            }
        }
    }

    /// Forgets idle route request state.
    pub fn cleanup_route_requests(&self, now: Instant) -> usize {
        self.rreq_table.cleanup(now)
    }

    /// Transmits due frames of the maintenance buffer and handles broken links. Returns the
    /// number of processed events.
    pub fn sweep_maintenance(&self, now: Instant) -> usize {
        let events = self.maintenance.sweep(now, self.metric.as_ref());
        let count = events.len();

        for event in events {
            match event {
                MaintenanceEvent::Transmit { frame, out_iface } => self.transmit_logged(out_iface, frame),
                MaintenanceEvent::Retransmit { frame, out_iface, attempt } => {
                    trace!(next_hop = %frame.l2_dst, attempt, "retransmitting frame");
                    self.transmit_logged(out_iface, frame);
                }
                MaintenanceEvent::LinkFailure(failure) => self.handle_link_failure(failure, now),
            }
        }

        count
    }

    /// Drops packets that waited too long for a route.
    pub fn sweep_send_buffer(&self, now: Instant) -> usize {
        let evicted = self.send_buffer.sweep(now);
        for _ in 0..evicted {
            self.stats.increment_dropped();
        }
        evicted
    }

    /// Collects link cache nodes no link refers to anymore.
    pub fn sweep_link_cache(&self) -> usize {
        self.route_cache.link_cache().collect_garbage()
    }

    pub fn local(&self) -> Address {
        self.local
    }

    pub fn interfaces(&self) -> &[Address] {
        &self.interfaces
    }

    /// Returns true if `addr` is the node address or one of its interfaces.
    #[inline]
    pub fn is_local(&self, addr: &Address) -> bool {
        *addr == self.local || self.interfaces.contains(addr)
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn metric(&self) -> &dyn LinkMetric {
        self.metric.as_ref()
    }

    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    pub fn route_cache(&self) -> &RouteCache {
        &self.route_cache
    }

    pub fn rreq_table(&self) -> &RouteRequestTable {
        &self.rreq_table
    }

    pub fn maintenance_buffer(&self) -> &MaintenanceBuffer {
        &self.maintenance
    }

    pub fn send_buffer(&self) -> &SendBuffer {
        &self.send_buffer
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    /// Starts a route discovery for `destination` unless one is in progress.
    fn discover(&self, destination: Address, now: Instant) {
        match self.rreq_table.is_discovery_allowed_now(destination, now) {
            Discovery::Proceed { ttl } => {
                debug!(dest = %destination, ttl, "starting route discovery");
                self.send_route_request(destination, ttl, Bytes::new(), now);
            }
            Discovery::Wait => trace!(dest = %destination, "route discovery in progress"),
            Discovery::GaveUp => debug!(dest = %destination, "route discovery gave up"),
        }
    }

    /// Broadcasts a new route request for `target` on every interface.
    fn send_route_request(&self, target: Address, ttl: u8, payload: Bytes, now: Instant) {
        let identification = self.rreq_ids.next();
        self.rreq_table.record(&RequestId { initiator: self.local, identification, target }, now);
        self.stats.increment_route_requests();

        for iface in &self.interfaces {
            let mut route = vec![Hop::new(self.local, 0)];
            if *iface != self.local {
                route.push(Hop::new(*iface, 0));
            }

            let mut frame = Frame::new(self.local, target, payload.clone())
                .with_option(DsrOption::RouteRequest { identification, target, ttl, route });
            frame.l2_dst = Address::BROADCAST;
            self.transmit_logged(*iface, frame);
        }
    }

    /// Answers a route request along the reversed route.
    fn send_route_reply(&self, candidate: &ReplyCandidate, now: Instant) -> Result<(), DsrError> {
        let mut hops = candidate.addresses();
        hops.reverse();

        debug!(initiator = %candidate.initiator, weight = candidate.weight(), hops = hops.len(), "sending route reply");
        self.stats.increment_route_replies();

        let frame = Frame::new(self.local, candidate.initiator, Bytes::new())
            .with_option(DsrOption::RouteReply { route: candidate.route.clone() });
        self.send_source_routed(frame, hops, None, None, now)
    }

    /// Reports a broken link to the originator of the frame that detected it, along the part of
    /// the source route the frame already travelled.
    fn send_route_error(&self, failure: &LinkFailure, in_iface: Address, now: Instant) -> Result<(), DsrError> {
        let (_, hops) = failure
            .frame
            .source_route()
            .ok_or(DsrError::Invariant("forwarded frame without source route"))?;
        let position = hops
            .iter()
            .position(|hop| *hop == in_iface)
            .ok_or(DsrError::ProtocolViolation("ingress interface missing from source route"))?;

        let mut route = hops[..=position].to_vec();
        route.reverse();
        if route.len() < 2 {
            return Ok(());
        }

        let originator = failure.frame.source;
        debug!(%originator, unreachable = %failure.next_hop, "sending route error");
        self.stats.increment_route_errors();

        let frame = Frame::new(self.local, originator, Bytes::new()).with_option(DsrOption::RouteError {
            error_source: failure.out_iface,
            error_destination: originator,
            unreachable: failure.next_hop,
        });
        self.send_source_routed(frame, route, None, None, now)
    }

    fn handle_link_failure(&self, failure: LinkFailure, now: Instant) {
        self.stats.increment_link_failures();
        debug!(out_iface = %failure.out_iface, next_hop = %failure.next_hop, dropped = failure.dropped, "link broken");

        self.route_cache.process_link_error(&failure.out_iface, &failure.next_hop);

        // A lost route reply hints at a unidirectional link.
        if failure.frame.has_route_reply() {
            if let Err(e) = self.blacklist.add(failure.next_hop, now) {
                trace!(err = %e, "neighbor not blacklisted");
            }
        }

        if let Some(in_iface) = failure.in_iface {
            if let Err(e) = self.send_route_error(&failure, in_iface, now) {
                debug!(err = %e, "failed to send route error");
            }
        }
    }

    /// Sends the buffered packets for `destination` over a freshly discovered route.
    fn flush_send_buffer(&self, destination: Address, now: Instant) {
        let Ok(path) = self.route_cache.lookup(&destination) else { return };

        self.send_buffer.flush(&destination, now, |frame, delay| {
            if let Err(e) = self.send_source_routed(frame, path.hops().to_vec(), None, Some(delay), now) {
                debug!(err = %e, dest = %destination, "failed to send buffered packet");
            }
        });
    }

    /// Sends `frame` along `hops`, which start with this node's addresses.
    ///
    /// A run of local addresses at the start of the route marks the egress interface.
    fn send_source_routed(
        &self,
        mut frame: Frame,
        hops: Vec<Address>,
        in_iface: Option<Address>,
        delay: Option<Duration>,
        now: Instant,
    ) -> Result<(), DsrError> {
        if !hops.first().is_some_and(|hop| self.is_local(hop)) {
            return Err(DsrError::Invariant("source route does not start at this node"));
        }

        let n = hops.len();
        let mut k = 0;
        while k + 1 < n && self.is_local(&hops[k + 1]) {
            k += 1;
        }
        if k + 1 >= n {
            return Err(DsrError::ProtocolViolation("source route ends at this node"));
        }

        let out_iface = if self.interfaces.contains(&hops[k]) { hops[k] } else { self.interfaces[0] };
        let next_hop = hops[k + 1];
        let segments_left =
            u8::try_from(n - 2 - k).map_err(|_| DsrError::ProtocolViolation("source route too long"))?;

        frame.remove_options(OptionType::SourceRoute);
        frame.push_option(DsrOption::SourceRoute { segments_left, hops });
        frame.l2_dst = next_hop;

        self.dispatch(frame, out_iface, in_iface, delay, now)
    }

    /// Sends a unicast frame, buffering it for route maintenance where configured. With a
    /// `delay` the first transmission is left to the maintenance sweep.
    fn dispatch(
        &self,
        mut frame: Frame,
        out_iface: Address,
        in_iface: Option<Address>,
        delay: Option<Duration>,
        now: Instant,
    ) -> Result<(), DsrError> {
        let config = self.config.load();
        let id = self.ack_ids.next();

        // The next hop's forwarding is overheard only if it forwards at all.
        let forwards = frame.source_route().is_some_and(|(left, _)| left > 0);
        let tracked = if config.routemaintenance_passive_ack && forwards {
            true
        } else if config.routemaintenance_network_ack {
            frame.remove_options(OptionType::AckRequest);
            frame.push_option(DsrOption::AckRequest { identification: id });
            true
        } else {
            false
        };

        match delay {
            None => {
                if tracked {
                    let buffered = BufferedFrame { id, frame: frame.clone(), in_iface, out_iface };
                    self.maintenance.add(buffered, now)?;
                }
                self.transmit(out_iface, frame)
            }
            Some(delay) => {
                let buffered = BufferedFrame { id, frame, in_iface, out_iface };
                if tracked {
                    self.maintenance.add_delayed(buffered, delay, now)?;
                } else {
                    self.maintenance.schedule(buffered, delay, now)?;
                }
                Ok(())
            }
        }
    }

    fn transmit(&self, iface: Address, mut frame: Frame) -> Result<(), DsrError> {
        frame.l2_src = iface;
        self.transport.send(iface, frame).map_err(|e| DsrError::Transport(Box::new(e)))
    }

    fn transmit_logged(&self, iface: Address, frame: Frame) {
        if let Err(e) = self.transmit(iface, frame) {
            warn!(err = %e, %iface, "failed to transmit frame");
        }
    }

    fn deliver(&self, mut frame: Frame) -> Result<(), DsrError> {
        frame.options.clear();
        self.stats.increment_delivered();
        self.transport.deliver(frame).map_err(|e| DsrError::Transport(Box::new(e)))
    }
}
