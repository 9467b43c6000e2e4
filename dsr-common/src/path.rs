//! Weighted paths and the address-slice utilities that route requests, source routes and caches
//! share.

use std::{cmp::Ordering, fmt};

use thiserror::Error;

use crate::Address;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("A path needs at least 2 addresses, got {0}")]
    TooShort(usize),
    #[error("Address {0} appears more than once on the path")]
    RepeatedAddress(Address),
}

/// An ordered sequence of addresses from a source to a destination, with the summed weight of
/// its hops.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Path {
    hops: Vec<Address>,
    weight: u32,
}

impl Path {
    /// Creates a new path. Fails if `hops` holds fewer than 2 addresses or visits an address
    /// twice.
    pub fn new(hops: Vec<Address>, weight: u32) -> Result<Self, PathError> {
        if hops.len() < 2 {
            return Err(PathError::TooShort(hops.len()));
        }
        if let Some(repeated) = hops.iter().enumerate().find_map(|(i, a)| hops[..i].contains(a).then_some(*a)) {
            return Err(PathError::RepeatedAddress(repeated));
        }

        Ok(Self { hops, weight })
    }

    #[inline]
    pub fn hops(&self) -> &[Address] {
        &self.hops
    }

    #[inline]
    pub fn into_hops(self) -> Vec<Address> {
        self.hops
    }

    #[inline]
    pub const fn weight(&self) -> u32 {
        self.weight
    }

    /// Number of addresses on the path, including both endpoints.
    #[inline]
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    /// Always false, a path holds at least 2 addresses.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// Number of links on the path.
    #[inline]
    pub fn hop_count(&self) -> usize {
        self.hops.len() - 1
    }

    #[inline]
    pub fn source(&self) -> Address {
        self.hops[0]
    }

    #[inline]
    pub fn destination(&self) -> Address {
        self.hops[self.hops.len() - 1]
    }

    /// Returns the index of `addr` on the path, if present.
    pub fn position(&self, addr: &Address) -> Option<usize> {
        self.hops.iter().position(|a| a == addr)
    }

    /// Returns true if the path traverses the directed link `u -> v`.
    pub fn contains_link(&self, u: &Address, v: &Address) -> bool {
        contains_link(&self.hops, u, v)
    }

    /// Returns true if no link of this path appears in `other`.
    pub fn is_link_disjoint(&self, other: &[Address]) -> bool {
        is_link_disjoint(&self.hops, other)
    }

    /// Returns the same path walked backwards. The weight is kept.
    pub fn reversed(&self) -> Self {
        let mut hops = self.hops.clone();
        hops.reverse();
        Self { hops, weight: self.weight }
    }

    /// Returns true if both paths visit exactly the same addresses in the same order.
    #[inline]
    pub fn same_hops(&self, other: &Self) -> bool {
        self.hops == other.hops
    }

    /// Orders paths by preference: lower weight first, then fewer addresses.
    pub fn cmp_preference(&self, other: &Self) -> Ordering {
        self.weight.cmp(&other.weight).then(self.hops.len().cmp(&other.hops.len()))
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({self})")
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, hop) in self.hops.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{hop}")?;
        }
        write!(f, " [{}]", self.weight)
    }
}

/// Returns true if `hops` traverses the directed link `u -> v`.
pub fn contains_link(hops: &[Address], u: &Address, v: &Address) -> bool {
    hops.windows(2).any(|link| link[0] == *u && link[1] == *v)
}

/// Returns true if no link of `a` appears in `b`.
pub fn is_link_disjoint(a: &[Address], b: &[Address]) -> bool {
    !a.windows(2).any(|link| contains_link(b, &link[0], &link[1]))
}

/// Counts the addresses of `a` that also appear in `b`.
pub fn nodes_in_common(a: &[Address], b: &[Address]) -> usize {
    a.iter().filter(|addr| b.contains(addr)).count()
}

/// Counts the links of `a` that also appear in `b`.
pub fn links_in_common(a: &[Address], b: &[Address]) -> usize {
    a.windows(2).filter(|link| contains_link(b, &link[0], &link[1])).count()
}
