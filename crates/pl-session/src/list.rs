use crate::{Domain, QueryId, TranId};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// ListFile is the materialized result of a query:
/// column domains and the physical tuples, where each
/// column is either bound to its encoding or unbound (null).
#[derive(Debug, Clone, Default)]
pub struct ListFile {
    domains: Vec<Domain>,
    tuples: Vec<Vec<Option<Bytes>>>,
}

impl ListFile {
    pub fn new(domains: Vec<Domain>) -> Self {
        Self {
            domains,
            tuples: Vec::new(),
        }
    }

    /// Append a physical tuple. Missing trailing columns are unbound
    /// and excess columns are discarded.
    pub fn push(&mut self, mut tuple: Vec<Option<Bytes>>) -> &mut Self {
        tuple.resize(self.domains.len(), None);
        self.tuples.push(tuple);
        self
    }

    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    pub fn column_count(&self) -> usize {
        self.domains.len()
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }
}

/// ListScan is a bidirectional scan over a ListFile.
/// Its position is one-based: zero is before the first tuple,
/// and `len() + 1` is after the last.
#[derive(Debug)]
pub struct ListScan {
    list: Arc<ListFile>,
    position: usize,
}

impl ListScan {
    pub fn open(list: Arc<ListFile>) -> Self {
        Self { list, position: 0 }
    }

    /// Step forward. Returns false at end-of-scan.
    pub fn next(&mut self) -> bool {
        if self.position < self.list.len() {
            self.position += 1;
            true
        } else {
            self.position = self.list.len() + 1;
            false
        }
    }

    /// Step backward. Returns false at end-of-scan.
    pub fn prev(&mut self) -> bool {
        if self.position > 1 {
            self.position -= 1;
            true
        } else {
            self.position = 0;
            false
        }
    }

    /// Physical tuple at the current position, if positioned on one.
    pub fn current(&self) -> Option<&[Option<Bytes>]> {
        match self.position {
            0 => None,
            p => self.list.tuples.get(p - 1).map(Vec::as_slice),
        }
    }

    pub fn list(&self) -> &ListFile {
        &self.list
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

/// QueryManager locates the materialized results of executed queries.
pub trait QueryManager: Send + Sync {
    /// Fetch the ListFile of `query_id` executed by transaction `tran_id`,
    /// or None if it's not known or was already reclaimed.
    fn list_file(&self, tran_id: TranId, query_id: QueryId) -> Option<Arc<ListFile>>;
}

/// MemoryQueryManager is a QueryManager over results held in memory.
#[derive(Default)]
pub struct MemoryQueryManager {
    entries: Mutex<HashMap<(TranId, QueryId), Arc<ListFile>>>,
}

impl MemoryQueryManager {
    pub fn insert(&self, tran_id: TranId, query_id: QueryId, list: ListFile) {
        self.entries
            .lock()
            .unwrap()
            .insert((tran_id, query_id), Arc::new(list));
    }

    /// Reclaim the result of `query_id`. Open scans retain it until closed.
    pub fn remove(&self, tran_id: TranId, query_id: QueryId) -> bool {
        self.entries
            .lock()
            .unwrap()
            .remove(&(tran_id, query_id))
            .is_some()
    }
}

impl QueryManager for MemoryQueryManager {
    fn list_file(&self, tran_id: TranId, query_id: QueryId) -> Option<Arc<ListFile>> {
        self.entries
            .lock()
            .unwrap()
            .get(&(tran_id, query_id))
            .cloned()
    }
}
