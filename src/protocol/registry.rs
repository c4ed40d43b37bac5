//! RID to handler table.
//!
//! Entries live in a compacting vector: inserts append, removals swap the
//! last live entry into the hole. Once the spare capacity grows past twice
//! the default the vector is shrunk, so a long-lived connection serving many
//! short requests does not keep its peak footprint.
//!
//! The reader task inserts while handler workers remove themselves, so all
//! access goes through an internal lock.

use parking_lot::Mutex;

use super::handler::HandlerHandle;
use super::is_request_rid;

/// Initial slot count, also the shrink granularity.
pub const DEFAULT_CAPACITY: usize = 16;

#[derive(Debug)]
struct Entry<H> {
    rid: u16,
    token: u64,
    handler: H,
}

#[derive(Debug)]
struct Table<H> {
    entries: Vec<Entry<H>>,
    next_token: u64,
}

#[derive(Debug)]
pub struct HandlerRegistry<H = HandlerHandle> {
    table: Mutex<Table<H>>,
}

impl<H: Clone> Default for HandlerRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Clone> HandlerRegistry<H> {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                entries: Vec::with_capacity(DEFAULT_CAPACITY),
                next_token: 1,
            }),
        }
    }

    /// Registers `handler` under `rid`.
    ///
    /// Returns a token identifying this registration, or `None` if `rid` is
    /// outside the request range or already taken.
    pub fn insert(&self, rid: u16, handler: H) -> Option<u64> {
        if !is_request_rid(rid) {
            return None;
        }
        let mut table = self.table.lock();
        if table.entries.iter().any(|e| e.rid == rid) {
            return None;
        }
        let token = table.next_token;
        table.next_token += 1;
        table.entries.push(Entry {
            rid,
            token,
            handler,
        });
        Some(token)
    }

    pub fn get(&self, rid: u16) -> Option<H> {
        let table = self.table.lock();
        table
            .entries
            .iter()
            .find(|e| e.rid == rid)
            .map(|e| e.handler.clone())
    }

    pub fn contains(&self, rid: u16) -> bool {
        self.table.lock().entries.iter().any(|e| e.rid == rid)
    }

    pub fn remove(&self, rid: u16) -> Option<H> {
        let mut table = self.table.lock();
        let idx = table.entries.iter().position(|e| e.rid == rid)?;
        Some(Self::take(&mut table, idx))
    }

    /// Removes `rid` only while it still belongs to the registration
    /// identified by `token`.
    pub fn remove_if(&self, rid: u16, token: u64) -> bool {
        let mut table = self.table.lock();
        match table
            .entries
            .iter()
            .position(|e| e.rid == rid && e.token == token)
        {
            Some(idx) => {
                Self::take(&mut table, idx);
                true
            }
            None => false,
        }
    }

    /// Empties the table, returning every handler that was registered.
    pub fn drain(&self) -> Vec<H> {
        let mut table = self.table.lock();
        let drained = table.entries.drain(..).map(|e| e.handler).collect();
        table.entries.shrink_to(DEFAULT_CAPACITY);
        drained
    }

    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.table.lock().entries.capacity()
    }

    fn take(table: &mut Table<H>, idx: usize) -> H {
        let entry = table.entries.swap_remove(idx);
        let slack = table.entries.capacity() - table.entries.len();
        if slack > 2 * DEFAULT_CAPACITY {
            let keep = table.entries.len() + DEFAULT_CAPACITY;
            table.entries.shrink_to(keep);
        }
        entry.handler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RID_CONNECTION, RID_DISCONNECT};

    #[test]
    fn insert_get_remove() {
        let reg = HandlerRegistry::<&'static str>::new();
        assert!(reg.insert(7, "a").is_some());
        assert_eq!(reg.get(7), Some("a"));
        assert_eq!(reg.remove(7), Some("a"));
        assert_eq!(reg.get(7), None);
        assert!(reg.is_empty());
    }

    #[test]
    fn reserved_rids_are_refused() {
        let reg = HandlerRegistry::<u8>::new();
        assert!(reg.insert(RID_CONNECTION, 1).is_none());
        assert!(reg.insert(RID_DISCONNECT, 1).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn duplicate_rid_is_refused() {
        let reg = HandlerRegistry::<u8>::new();
        assert!(reg.insert(3, 1).is_some());
        assert!(reg.insert(3, 2).is_none());
        assert_eq!(reg.get(3), Some(1));
    }

    #[test]
    fn reused_rid_never_returns_old_handler() {
        let reg = HandlerRegistry::<&'static str>::new();
        let old = reg.insert(5, "old").unwrap();
        reg.remove(5);
        let new = reg.insert(5, "new").unwrap();
        assert_ne!(old, new);
        // a stale worker cleaning up must not evict the new owner
        assert!(!reg.remove_if(5, old));
        assert_eq!(reg.get(5), Some("new"));
        assert!(reg.remove_if(5, new));
    }

    #[test]
    fn swap_removal_keeps_other_entries() {
        let reg = HandlerRegistry::<u16>::new();
        for rid in 1..=5 {
            reg.insert(rid, rid * 10);
        }
        reg.remove(2);
        for rid in [1, 3, 4, 5] {
            assert_eq!(reg.get(rid), Some(rid * 10));
        }
        assert_eq!(reg.len(), 4);
    }

    #[test]
    fn shrinks_after_burst() {
        let reg = HandlerRegistry::<u16>::new();
        for rid in 1..=200 {
            reg.insert(rid, rid);
        }
        assert!(reg.capacity() >= 200);
        for rid in 1..=200 {
            reg.remove(rid);
        }
        assert!(reg.capacity() <= 3 * DEFAULT_CAPACITY);
    }
}
