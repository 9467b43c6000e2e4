use std::time::Instant;

use bytes::Bytes;
use dsr_common::{Address, Path};
use dsr_transport::Transport;
use dsr_wire::{DsrOption, Frame, Hop, OptionType};
use tracing::{debug, trace};

use super::Router;
use crate::{
    error::{BlacklistError, DsrError},
    policy::CacheMode,
    rreq_table::{ReplyCandidate, RequestId},
};

impl<T: Transport> Router<T> {
    /// Processes a frame received on the local interface `iface`.
    ///
    /// Malformed frames are dropped and reported as an error. The caller decides whether to log
    /// them; the router state is left consistent either way.
    pub fn handle_frame(&self, frame: Frame, iface: Address, now: Instant) -> Result<(), DsrError> {
        self.process(frame, iface, now).map_err(|e| {
            self.stats.increment_dropped();
            debug!(err = %e, %iface, "dropped frame");
            e
        })
    }

    fn process(&self, mut frame: Frame, iface: Address, now: Instant) -> Result<(), DsrError> {
        if self.is_local(&frame.l2_src) {
            trace!("dropping own frame");
            return Ok(());
        }

        let broadcast = frame.is_l2_broadcast();
        if !broadcast && !self.is_local(&frame.l2_dst) {
            if self.config.load().routemaintenance_passive_ack {
                self.maintenance.on_overheard_source_route(&frame);
            }
            return Ok(());
        }

        if frame.has_option(OptionType::RouteRequest) && !self.handle_route_request(&frame, iface, now)? {
            return Ok(());
        }

        if broadcast {
            if frame.destination.is_broadcast() && !frame.payload.is_empty() {
                self.deliver(frame)?;
            }
            return Ok(());
        }

        self.handle_route_replies(&frame, now)?;
        self.handle_route_errors(&frame);

        if let Some(identification) = frame.ack_request() {
            self.send_ack(identification, &frame, iface);
            frame.remove_options(OptionType::AckRequest);
        }
        self.handle_acks(&frame);

        let Some(frame) = self.route_source_routed(frame, iface, now)? else {
            return Ok(());
        };

        if self.is_local(&frame.destination) && !frame.payload.is_empty() {
            self.deliver(frame)?;
        }
        Ok(())
    }

    /// Handles the route request carried by `frame`. Returns true if the frame's payload is a
    /// broadcast packet seen for the first time, to be delivered locally.
    fn handle_route_request(&self, frame: &Frame, iface: Address, now: Instant) -> Result<bool, DsrError> {
        let Some((identification, target, ttl, route)) = frame.options.iter().find_map(|o| match o {
            DsrOption::RouteRequest { identification, target, ttl, route } => {
                Some((*identification, *target, *ttl, route))
            }
            _ => None,
        }) else {
            return Ok(false);
        };

        let initiator = route
            .first()
            .map(|hop| hop.address)
            .ok_or(DsrError::ProtocolViolation("route request without route"))?;
        let previous_hop = frame.l2_src;
        let weight = self.metric.hop_weight(&iface, &previous_hop);
        let config = self.config.load();

        if self.is_local(&target) {
            let mut full = route.clone();
            full.push(Hop::new(iface, weight));
            if iface != self.local {
                full.push(Hop::new(self.local, 0));
            }
            if full.len() > config.max_route_len {
                debug!(%initiator, len = full.len(), "route request too long to answer");
                return Ok(false);
            }

            let candidate = ReplyCandidate { initiator, identification, iface, route: full };
            if self.rreq_table.arbitrate_reply(target, candidate.clone(), now) {
                self.send_route_reply(&candidate, now)?;
            } else {
                trace!(%initiator, identification, "route request held back");
            }
            return Ok(false);
        }

        if route.iter().any(|hop| self.is_local(&hop.address)) {
            trace!(%initiator, identification, "already on the route");
            return Ok(false);
        }

        if self.blacklist.is_probable(&previous_hop) {
            debug!(%previous_hop, "route request from blacklisted neighbor");
            return Ok(false);
        }

        let id = RequestId { initiator, identification, target };
        let accumulated = route.iter().map(|hop| u32::from(hop.weight)).sum::<u32>() + u32::from(weight);
        let forwarding = self.rreq_table.should_forward(&id, accumulated, previous_hop, now);
        if !forwarding.is_forward() {
            trace!(%initiator, identification, "duplicate route request");
            return Ok(false);
        }
        let first_seen = forwarding.is_first();

        let ttl = ttl.saturating_sub(1);
        if ttl == 0 {
            trace!(%initiator, identification, "route request ttl exhausted");
            return Ok(target.is_broadcast() && first_seen);
        }

        for out in &self.interfaces {
            let mut relayed_route = route.clone();
            relayed_route.push(Hop::new(iface, weight));
            if *out != iface {
                relayed_route.push(Hop::new(*out, 0));
            }
            if relayed_route.len() > config.max_route_len {
                trace!(%initiator, identification, "route request reached maximum length");
                continue;
            }

            let mut relayed = frame.clone();
            for option in &mut relayed.options {
                if let DsrOption::RouteRequest { ttl: relayed_ttl, route: r, .. } = option {
                    *relayed_ttl = ttl;
                    *r = relayed_route;
                    break;
                }
            }
            relayed.l2_dst = Address::BROADCAST;
            self.transmit_logged(*out, relayed);
        }

        Ok(target.is_broadcast() && first_seen)
    }

    /// Caches the routes of replies answering our own requests and sends the packets waiting
    /// for them.
    fn handle_route_replies(&self, frame: &Frame, now: Instant) -> Result<(), DsrError> {
        let cache_mode = self.config.load().cache_mode;

        for option in &frame.options {
            let DsrOption::RouteReply { route } = option else { continue };
            let (Some(first), Some(last)) = (route.first(), route.last()) else {
                return Err(DsrError::ProtocolViolation("empty route reply"));
            };
            if !self.is_local(&first.address) {
                continue;
            }

            let destination = last.address;
            match cache_mode {
                CacheMode::Path => {
                    let weight = route.iter().map(|hop| u32::from(hop.weight)).sum();
                    let path = Path::new(route.iter().map(|hop| hop.address).collect(), weight)?;
                    debug!(dest = %destination, %path, "route discovered");
                    if let Err(e) = self.route_cache.add_path(destination, path) {
                        trace!(err = %e, "route not cached");
                    }
                }
                CacheMode::Link => {
                    let hops: Vec<(Address, u16)> = route.iter().map(|hop| (hop.address, hop.weight)).collect();
                    let learned = self.route_cache.add_links(&hops);
                    debug!(dest = %destination, learned, "links discovered");
                }
            }

            self.rreq_table.got_reply(&destination);
            self.flush_send_buffer(destination, now);
        }

        Ok(())
    }

    fn handle_route_errors(&self, frame: &Frame) {
        for option in &frame.options {
            if let DsrOption::RouteError { error_source, unreachable, .. } = option {
                let removed = self.route_cache.process_link_error(error_source, unreachable);
                debug!(%error_source, %unreachable, removed, "route error");
            }
        }
    }

    /// Acknowledges `frame` to the neighbor it came from.
    fn send_ack(&self, identification: u16, frame: &Frame, iface: Address) {
        let previous_hop = frame.l2_src;
        let mut ack = Frame::new(self.local, previous_hop, Bytes::new()).with_option(DsrOption::Ack {
            identification,
            source: iface,
            destination: previous_hop,
        });
        ack.l2_dst = previous_hop;
        self.transmit_logged(iface, ack);
    }

    fn handle_acks(&self, frame: &Frame) {
        let cache_mode = self.config.load().cache_mode;

        for option in &frame.options {
            let DsrOption::Ack { identification, source, destination } = option else { continue };
            if !self.is_local(destination) {
                continue;
            }

            match self.blacklist.remove(source) {
                Ok(()) => debug!(neighbor = %source, "neighbor acknowledged, removed from blacklist"),
                Err(BlacklistError::NotFound(_)) => {}
                Err(e) => trace!(err = %e, "blacklist"),
            }

            if let Err(e) = self.maintenance.delete(*identification) {
                trace!(err = %e, "late or unknown acknowledgement");
            }

            if cache_mode == CacheMode::Link {
                let weight = self.metric.hop_weight(destination, source);
                if let Err(e) = self.route_cache.link_cache().add_link(*destination, *source, weight) {
                    trace!(err = %e, "acknowledged link not learned");
                }
            }
        }
    }

    /// Follows the source route of `frame`. Returns the frame if it reached its final hop,
    /// `None` if it was forwarded.
    fn route_source_routed(&self, mut frame: Frame, iface: Address, now: Instant) -> Result<Option<Frame>, DsrError> {
        let Some((mut segments_left, hops)) = frame.source_route().map(|(left, hops)| (left, hops.to_vec())) else {
            return Ok(Some(frame));
        };

        let n = hops.len();
        if n < 2 || usize::from(segments_left) > n - 1 {
            return Err(DsrError::ProtocolViolation("segments left out of range"));
        }

        // Consecutive local addresses mark an interface change.
        let mut out_iface = iface;
        let next_hop = loop {
            if segments_left == 0 {
                frame.remove_options(OptionType::SourceRoute);
                return Ok(Some(frame));
            }

            segments_left -= 1;
            let next = hops[n - 1 - usize::from(segments_left)];
            if !self.is_local(&next) {
                break next;
            }
            if self.interfaces.contains(&next) {
                out_iface = next;
            }
        };

        if let Some(left) = frame.segments_left_mut() {
            *left = segments_left;
        }
        frame.l2_dst = next_hop;

        trace!(source = %frame.source, destination = %frame.destination, %next_hop, segments_left, "forwarding");
        self.stats.increment_forwarded();
        self.dispatch(frame, out_iface, Some(iface), None, now)?;
        Ok(None)
    }
}
