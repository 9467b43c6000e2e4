use std::collections::VecDeque;

use dsr_common::{Address, Path};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::{
    config::ConfigHandle,
    error::{LinkCacheError, RouteCacheError},
    policy::{CacheMode, DualSlotOrder, LookupPolicy, RetentionPolicy},
};

mod link_cache;
pub use link_cache::{LinkCache, LinkChange, LinkRecord};

/// The paths known for a single destination, most preferred first.
#[derive(Debug, Default)]
struct RouteCacheEntry {
    paths: VecDeque<Path>,
}

impl RouteCacheEntry {
    /// Inserts `path` according to `retention`. Returns an error if the path is a duplicate or
    /// there is no room left.
    fn insert(&mut self, dest: Address, path: Path, retention: RetentionPolicy) -> Result<(), RouteCacheError> {
        if self.paths.iter().any(|p| p.same_hops(&path)) {
            return Err(RouteCacheError::AlreadyExists(dest));
        }

        match retention {
            RetentionPolicy::Sorted { keep } => {
                self.paths.push_back(path);
                self.paths.make_contiguous().sort_by(Path::cmp_preference);
                if let Some(keep) = keep {
                    self.paths.truncate(keep.max(1));
                }
            }
            RetentionPolicy::InsertionOrder { keep } => {
                self.paths.push_back(path);
                while self.paths.len() > keep.max(1) {
                    self.paths.pop_front();
                }
            }
            RetentionPolicy::DualSlot { order } => match (self.paths.len(), order) {
                (0, _) | (1, DualSlotOrder::Append) => self.paths.push_back(path),
                (1, DualSlotOrder::SecondFirst) => self.paths.push_front(path),
                _ => return Err(RouteCacheError::SlotsFull(dest)),
            },
        }

        Ok(())
    }
}

/// A snapshot of the paths cached for one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRecord {
    pub destination: Address,
    pub paths: Vec<Path>,
}

/// Routes from the local node to every destination it has discovered.
///
/// In [`CacheMode::Path`] whole paths are stored per destination and kept according to the
/// configured [`RetentionPolicy`]. In [`CacheMode::Link`] the discovered routes are broken up
/// into links and every lookup runs Dijkstra over the [`LinkCache`].
#[derive(Debug)]
pub struct RouteCache {
    local: Address,
    entries: RwLock<FxHashMap<Address, RouteCacheEntry>>,
    links: LinkCache,
    config: ConfigHandle,
}

impl RouteCache {
    /// Creates an empty route cache for the node `local`. `volatile_links` selects whether
    /// re-learned links update their weight.
    pub fn new(local: Address, volatile_links: bool, config: ConfigHandle) -> Self {
        Self {
            local,
            entries: RwLock::new(FxHashMap::default()),
            links: LinkCache::new(local, volatile_links),
            config,
        }
    }

    /// Returns a route to `dest` according to the configured lookup policy.
    pub fn lookup(&self, dest: &Address) -> Result<Path, RouteCacheError> {
        let config = self.config.load();
        if config.cache_mode == CacheMode::Link {
            return self.links.shortest_path(&self.local, dest).map_err(|e| match e {
                LinkCacheError::NoPath(_) => RouteCacheError::NotFound(*dest),
                e => e.into(),
            });
        }

        match config.lookup {
            LookupPolicy::First => self.first(dest),
            LookupPolicy::RoundRobin => self.round_robin(dest),
        }
    }

    /// Returns the most preferred path to `dest`.
    pub fn first(&self, dest: &Address) -> Result<Path, RouteCacheError> {
        self.entries
            .read()
            .get(dest)
            .and_then(|entry| entry.paths.front().cloned())
            .ok_or(RouteCacheError::NotFound(*dest))
    }

    /// Returns the next path to `dest` and moves it to the back of the rotation.
    pub fn round_robin(&self, dest: &Address) -> Result<Path, RouteCacheError> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(dest).ok_or(RouteCacheError::NotFound(*dest))?;
        let path = entry.paths.pop_front().ok_or(RouteCacheError::NotFound(*dest))?;
        entry.paths.push_back(path.clone());
        Ok(path)
    }

    /// Caches `path` as a route to `dest`. Exact duplicates are rejected with
    /// [`RouteCacheError::AlreadyExists`].
    pub fn add_path(&self, dest: Address, path: Path) -> Result<(), RouteCacheError> {
        if path.destination() != dest {
            return Err(RouteCacheError::WrongDestination { expected: dest, actual: path.destination() });
        }

        let retention = self.config.load().retention;
        trace!(%dest, %path, "caching path");
        self.entries.write().entry(dest).or_default().insert(dest, path, retention)
    }

    /// Learns every link of a discovered route, in both directions. Each hop's weight applies
    /// to the link into it and back out of it. Used in [`CacheMode::Link`]. Returns the number
    /// of links inserted or updated.
    pub fn add_links(&self, hops: &[(Address, u16)]) -> usize {
        hops.windows(2)
            .flat_map(|pair| {
                let ((from, _), (to, weight)) = (pair[0], pair[1]);
                [(from, to, weight), (to, from, weight)]
            })
            .filter(|&(from, to, weight)| match self.links.add_link(from, to, weight) {
                Ok(_) => true,
                Err(e) => {
                    trace!(err = %e, "link not learned");
                    false
                }
            })
            .count()
    }

    /// Forgets every route traversing the link `from -> to`. Destinations left without a route
    /// are removed. In [`CacheMode::Link`] the link itself is removed too. Returns the number
    /// of paths removed.
    pub fn process_link_error(&self, from: &Address, to: &Address) -> usize {
        let mut removed = 0;
        self.entries.write().retain(|_, entry| {
            let before = entry.paths.len();
            entry.paths.retain(|path| !path.contains_link(from, to));
            removed += before - entry.paths.len();
            !entry.paths.is_empty()
        });

        if self.config.load().cache_mode == CacheMode::Link {
            if let Err(e) = self.links.remove_link(from, to) {
                trace!(err = %e, "link already unknown");
            }
        }

        debug!(%from, %to, removed, "processed link error");
        removed
    }

    /// Removes every route to `dest`.
    pub fn remove(&self, dest: &Address) -> Option<Vec<Path>> {
        self.entries.write().remove(dest).map(|entry| entry.paths.into())
    }

    /// Returns every path cached for `dest`, most preferred first.
    pub fn paths(&self, dest: &Address) -> Vec<Path> {
        self.entries.read().get(dest).map(|entry| entry.paths.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn link_cache(&self) -> &LinkCache {
        &self.links
    }

    /// Number of destinations with at least one cached path.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns a copy of every cached route.
    pub fn snapshot(&self) -> Vec<RouteRecord> {
        self.entries
            .read()
            .iter()
            .map(|(dest, entry)| RouteRecord { destination: *dest, paths: entry.paths.iter().cloned().collect() })
            .collect()
    }
}
