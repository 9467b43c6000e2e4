use std::time::Instant;

use dsr_common::Address;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::{config::ConfigHandle, error::BlacklistError};

/// Suspicion level of a blacklisted neighbor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// The link to the neighbor is probably unidirectional. Route requests relayed by it are
    /// ignored.
    Probable,
    /// The neighbor was probable a while ago and is on probation.
    Questionable,
}

#[derive(Debug, Clone, Copy)]
struct BlacklistEntry {
    state: LinkState,
    last_updated: Instant,
}

/// A snapshot of a single blacklist entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlacklistRecord {
    pub neighbor: Address,
    pub state: LinkState,
    pub last_updated: Instant,
}

/// Outcome of a blacklist sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlacklistSweep {
    /// Probable entries demoted to questionable.
    pub demoted: usize,
    /// Questionable entries removed.
    pub expired: usize,
}

/// Neighbors suspected of sitting behind a unidirectional link.
#[derive(Debug)]
pub struct Blacklist {
    entries: RwLock<FxHashMap<Address, BlacklistEntry>>,
    config: ConfigHandle,
}

impl Blacklist {
    pub fn new(config: ConfigHandle) -> Self {
        Self { entries: RwLock::new(FxHashMap::default()), config }
    }

    /// Marks `neighbor` as probable. Questionable entries are promoted, probable ones are
    /// rejected with [`BlacklistError::AlreadyInList`].
    pub fn add(&self, neighbor: Address, now: Instant) -> Result<(), BlacklistError> {
        let mut entries = self.entries.write();

        match entries.get_mut(&neighbor) {
            Some(entry) if entry.state == LinkState::Probable => {
                Err(BlacklistError::AlreadyInList(neighbor))
            }
            Some(entry) => {
                entry.state = LinkState::Probable;
                entry.last_updated = now;
                debug!(%neighbor, "promoted blacklist entry to probable");
                Ok(())
            }
            None => {
                entries.insert(neighbor, BlacklistEntry { state: LinkState::Probable, last_updated: now });
                debug!(%neighbor, "blacklisted neighbor");
                Ok(())
            }
        }
    }

    /// Removes `neighbor` from the blacklist.
    pub fn remove(&self, neighbor: &Address) -> Result<(), BlacklistError> {
        self.entries.write().remove(neighbor).map(|_| ()).ok_or(BlacklistError::NotFound(*neighbor))
    }

    /// Returns the state of `neighbor`, or `None` if it is not blacklisted.
    pub fn state(&self, neighbor: &Address) -> Option<LinkState> {
        self.entries.read().get(neighbor).map(|e| e.state)
    }

    /// Overrides the state of an existing entry and refreshes its timestamp.
    pub fn set_state(&self, neighbor: &Address, state: LinkState, now: Instant) -> Result<(), BlacklistError> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(neighbor).ok_or(BlacklistError::NotFound(*neighbor))?;
        entry.state = state;
        entry.last_updated = now;
        Ok(())
    }

    /// Returns true if route requests relayed by `neighbor` must be ignored.
    #[inline]
    pub fn is_probable(&self, neighbor: &Address) -> bool {
        self.state(neighbor) == Some(LinkState::Probable)
    }

    /// Ages the entries: probable entries older than the revert timeout become questionable,
    /// questionable entries older than the expiration are removed.
    pub fn sweep(&self, now: Instant) -> BlacklistSweep {
        let config = self.config.load();
        let revert = config.blacklist.revert_to_questionable;
        let expiration = config.blacklist.expiration;

        let mut sweep = BlacklistSweep::default();
        self.entries.write().retain(|neighbor, entry| {
            let age = now.saturating_duration_since(entry.last_updated);
            match entry.state {
                LinkState::Probable if age >= revert => {
                    entry.state = LinkState::Questionable;
                    entry.last_updated = now;
                    sweep.demoted += 1;
                    true
                }
                LinkState::Questionable if age >= expiration => {
                    debug!(%neighbor, "blacklist entry expired");
                    sweep.expired += 1;
                    false
                }
                _ => true,
            }
        });

        sweep
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns a copy of every entry.
    pub fn snapshot(&self) -> Vec<BlacklistRecord> {
        self.entries
            .read()
            .iter()
            .map(|(neighbor, e)| BlacklistRecord { neighbor: *neighbor, state: e.state, last_updated: e.last_updated })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn addr(n: u8) -> Address {
        Address::new([2, 0, 0, 0, 0, n])
    }

    #[test]
    fn add_and_promote() {
        let blacklist = Blacklist::new(ConfigHandle::default());
        let now = Instant::now();

        blacklist.add(addr(1), now).unwrap();
        assert_eq!(blacklist.state(&addr(1)), Some(LinkState::Probable));
        assert_eq!(blacklist.add(addr(1), now), Err(BlacklistError::AlreadyInList(addr(1))));

        blacklist.set_state(&addr(1), LinkState::Questionable, now).unwrap();
        blacklist.add(addr(1), now).unwrap();
        assert_eq!(blacklist.state(&addr(1)), Some(LinkState::Probable));
        assert_eq!(blacklist.len(), 1);
    }

    #[test]
    fn remove_missing() {
        let blacklist = Blacklist::new(ConfigHandle::default());
        assert_eq!(blacklist.remove(&addr(1)), Err(BlacklistError::NotFound(addr(1))));
        assert_eq!(
            blacklist.set_state(&addr(1), LinkState::Probable, Instant::now()),
            Err(BlacklistError::NotFound(addr(1)))
        );
    }

    #[test]
    fn sweep_demotes_then_expires() {
        let config = ConfigHandle::default();
        let revert = config.load().blacklist.revert_to_questionable;
        let expiration = config.load().blacklist.expiration;
        let blacklist = Blacklist::new(config);

        let start = Instant::now();
        blacklist.add(addr(1), start).unwrap();

        assert_eq!(blacklist.sweep(start + revert - Duration::from_secs(1)), BlacklistSweep::default());
        assert_eq!(blacklist.state(&addr(1)), Some(LinkState::Probable));

        let demoted_at = start + revert;
        assert_eq!(blacklist.sweep(demoted_at).demoted, 1);
        assert_eq!(blacklist.state(&addr(1)), Some(LinkState::Questionable));

        // The demotion refreshed the timestamp.
        assert_eq!(blacklist.sweep(demoted_at + expiration - Duration::from_secs(1)).expired, 0);
        assert_eq!(blacklist.sweep(demoted_at + expiration).expired, 1);
        assert_eq!(blacklist.state(&addr(1)), None);
        assert!(blacklist.is_empty());
    }
}
