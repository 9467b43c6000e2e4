use std::time::Instant;

use dsr_common::{
    path::{links_in_common, nodes_in_common},
    Address,
};
use dsr_wire::Hop;

use crate::policy::CandidateSelection;

/// A route request that reached its target, waiting to be answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyCandidate {
    /// The initiator of the request.
    pub initiator: Address,
    pub identification: u16,
    /// The interface the request arrived on.
    pub iface: Address,
    /// The complete route from the initiator to the target, including the target's own hops.
    pub route: Vec<Hop>,
}

impl ReplyCandidate {
    /// Summed weight of the route.
    pub fn weight(&self) -> u32 {
        self.route.iter().map(|hop| u32::from(hop.weight)).sum()
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.route.iter().map(|hop| hop.address).collect()
    }
}

/// State of a deferred reply window for one `(initiator, identification, target)`.
#[derive(Debug)]
pub(super) struct Arbitration {
    /// Route of the first request to arrive, which was answered at once.
    fastest: Vec<Address>,
    deadline: Instant,
    candidates: Vec<ReplyCandidate>,
    complete: bool,
}

impl Arbitration {
    pub(super) fn new(fastest: Vec<Address>, deadline: Instant) -> Self {
        Self { fastest, deadline, candidates: Vec::new(), complete: false }
    }

    /// Buffers a candidate. Returns false once the window closed or `max` candidates are held.
    pub(super) fn offer(&mut self, candidate: ReplyCandidate, max: usize) -> bool {
        if self.complete || self.candidates.len() >= max {
            return false;
        }
        self.candidates.push(candidate);
        true
    }

    #[inline]
    pub(super) fn is_due(&self, now: Instant) -> bool {
        !self.complete && now >= self.deadline
    }

    /// Closes the window and picks at most one candidate.
    pub(super) fn close(&mut self, selection: CandidateSelection) -> Option<ReplyCandidate> {
        self.complete = true;
        let index = select(selection, &self.fastest, &self.candidates)?;
        Some(self.candidates.swap_remove(index))
    }
}

/// Picks the candidate to answer after the reply window. Ties go to the earliest arrival.
pub(super) fn select(
    selection: CandidateSelection,
    fastest: &[Address],
    candidates: &[ReplyCandidate],
) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .min_by_key(|(_, candidate)| {
            let hops = candidate.addresses();
            let (nodes, links) = match selection {
                CandidateSelection::MaximallyDisjoint => {
                    (nodes_in_common(&hops, fastest), links_in_common(&hops, fastest))
                }
                CandidateSelection::MinimalWeight => (0, 0),
            };
            (nodes, links, candidate.weight(), hops.len())
        })
        .map(|(index, _)| index)
}
