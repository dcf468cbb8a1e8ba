use crate::list::{ListFile, ListScan, QueryManager};
use crate::{DecodeError, Error, Oid, QueryId, TranId, Value, WorkerId};
use bytes::Bytes;
use std::sync::{Arc, Mutex};

/// Shared handle to a QueryCursor registered with a Session.
pub type CursorRef = Arc<Mutex<QueryCursor>>;

/// Outcome of moving a QueryCursor by one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanCode {
    Success,
    End,
    Error,
}

/// QueryCursor is a resumable, scrollable iterator over the
/// materialized result of one query. It's owned by one worker at a time,
/// and its scan is closed whenever that owner changes.
pub struct QueryCursor {
    query_id: QueryId,
    owner: WorkerId,
    tran_id: TranId,
    oid_included: bool,
    queries: Arc<dyn QueryManager>,
    scan: Option<ListScan>,
    tuple: Vec<Value>,
    current_row: i32,
    fetch_count: i32,
}

impl QueryCursor {
    pub const DEFAULT_FETCH_COUNT: i32 = 1000;

    pub fn new(
        queries: Arc<dyn QueryManager>,
        owner: WorkerId,
        tran_id: TranId,
        query_id: QueryId,
        oid_included: bool,
    ) -> Self {
        Self {
            query_id,
            owner,
            tran_id,
            oid_included,
            queries,
            scan: None,
            tuple: Vec::new(),
            current_row: 0,
            fetch_count: Self::DEFAULT_FETCH_COUNT,
        }
    }

    /// Re-locate the query's result and reset the position and tuple to
    /// column-typed nulls, without starting a scan.
    pub fn reset(&mut self) -> Result<Arc<ListFile>, Error> {
        self.current_row = 0;

        let list = self
            .queries
            .list_file(self.tran_id, self.query_id)
            .ok_or(Error::QueryNotFound(self.query_id))?;

        self.tuple = list
            .domains()
            .iter()
            .map(|domain| Value::Null(domain.ty))
            .collect();

        Ok(list)
    }

    /// Open a scan from the beginning of the result. A no-op if already open.
    pub fn open(&mut self) -> Result<(), Error> {
        if self.scan.is_some() {
            return Ok(());
        }
        let list = self.reset()?;
        self.scan = Some(ListScan::open(list));

        tracing::trace!(query_id = %self.query_id, owner = %self.owner, "opened query cursor");
        Ok(())
    }

    pub fn close(&mut self) {
        if self.scan.take().is_some() {
            self.tuple.clear();
            self.current_row = 0;
            self.fetch_count = 0;
        }
    }

    pub fn is_opened(&self) -> bool {
        self.scan.is_some()
    }

    pub fn next_row(&mut self) -> ScanCode {
        self.step(true)
    }

    pub fn prev_row(&mut self) -> ScanCode {
        self.step(false)
    }

    fn step(&mut self, forward: bool) -> ScanCode {
        let Self {
            scan,
            tuple,
            current_row,
            query_id,
            ..
        } = &mut *self;

        let Some(scan) = scan.as_mut() else {
            return ScanCode::End;
        };
        let moved = if forward { scan.next() } else { scan.prev() };

        let code = match (moved, scan.current()) {
            (true, Some(raw)) => match decode_tuple(scan.list(), raw, tuple) {
                Ok(()) => {
                    if forward {
                        *current_row += 1;
                    } else {
                        *current_row -= 1;
                    }
                    ScanCode::Success
                }
                Err(error) => {
                    tracing::warn!(%error, %query_id, "failed to decode query cursor tuple");
                    ScanCode::Error
                }
            },
            _ => ScanCode::End,
        };

        if code != ScanCode::Success {
            self.close();
        }
        code
    }

    /// Re-assign the owning worker. The scan is not valid across
    /// workers, so the cursor is closed if the owner changes.
    pub fn change_owner(&mut self, owner: WorkerId, tran_id: TranId) {
        if self.owner == owner {
            return;
        }
        self.close();
        self.owner = owner;
        self.tran_id = tran_id;
    }

    /// Oid of the current row, if the cursor includes oids
    /// and the first column is a non-null oid.
    pub fn get_current_oid(&self) -> Option<Oid> {
        if !self.oid_included {
            return None;
        }
        match self.tuple.first() {
            Some(Value::Oid(oid)) => Some(*oid),
            _ => None,
        }
    }

    pub fn get_tuple_value(&self, index: usize) -> Result<&Value, Error> {
        self.tuple.get(index).ok_or(Error::TupleIndex {
            index,
            len: self.tuple.len(),
        })
    }

    pub fn current_tuple(&self) -> &[Value] {
        &self.tuple
    }

    /// Ignored unless `0 < count < i32::MAX`.
    pub fn set_fetch_count(&mut self, count: i32) {
        if count > 0 && count < i32::MAX {
            self.fetch_count = count;
        }
    }

    pub fn fetch_count(&self) -> i32 {
        self.fetch_count
    }

    pub fn current_row(&self) -> i32 {
        self.current_row
    }

    pub fn query_id(&self) -> QueryId {
        self.query_id
    }

    pub fn owner(&self) -> WorkerId {
        self.owner
    }

    pub fn is_oid_included(&self) -> bool {
        self.oid_included
    }
}

impl std::fmt::Debug for QueryCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCursor")
            .field("query_id", &self.query_id)
            .field("owner", &self.owner)
            .field("opened", &self.is_opened())
            .field("current_row", &self.current_row)
            .field("fetch_count", &self.fetch_count)
            .finish()
    }
}

// Decode each bound column by its domain. Unbound columns become
// nulls of the column's type rather than retaining a prior row's value.
fn decode_tuple(
    list: &ListFile,
    raw: &[Option<Bytes>],
    tuple: &mut [Value],
) -> Result<(), DecodeError> {
    for ((domain, raw), value) in list.domains().iter().zip(raw).zip(tuple.iter_mut()) {
        *value = match raw {
            Some(bytes) => domain.decode(bytes)?,
            None => Value::Null(domain.ty),
        };
    }
    Ok(())
}
