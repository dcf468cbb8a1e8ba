use crate::connection::ConnectionView;
use crate::cursor::CursorRef;
use crate::protocol::{client_command, pack_i32s, runtime_command, Header};
use crate::{Error, InterruptReason, QueryId, Session, SessionId, StackId, TranId, Worker, WorkerId};
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// ClientChannel is the channel back to the client which began the transaction.
pub trait ClientChannel: Send + Sync {
    /// Send a message without awaiting a response.
    fn send(&self, header: &Header, payload: &[u8]) -> Result<(), Error>;
    /// Send a message and await the client's response.
    fn send_and_receive(&self, header: &Header, payload: &[u8]) -> Result<Bytes, Error>;
    /// Has the client gone away?
    fn is_disconnected(&self) -> bool;
}

static NEXT_STACK_ID: AtomicU64 = AtomicU64::new(1);

/// ExecutionStack is the frame of one nested stored procedure invocation.
/// It tracks the query handlers and cursors the invocation opened,
/// which are released when the frame is popped from its Session.
pub struct ExecutionStack {
    id: StackId,
    tran_id: TranId,
    session_id: SessionId,
    session: Weak<Session>,
    client: Arc<dyn ClientChannel>,
    poll_interval: Duration,
    request_id: AtomicI32,
    state: Mutex<StackState>,
}

// Session methods are never called while StackState is locked:
// the Session locks its own state before that of its frames.
struct StackState {
    worker: WorkerId,
    connection: Option<ConnectionView>,
    query_handlers: BTreeSet<i32>,
    cursors: BTreeSet<QueryId>,
    cursor_handlers: BTreeMap<QueryId, i32>,
    client_header: Header,
    runtime_header: Header,
    error_message: String,
    last_error: Option<String>,
    data_queue: VecDeque<Bytes>,
    transaction_control: bool,
}

impl ExecutionStack {
    pub(crate) fn new(
        session: Weak<Session>,
        session_id: SessionId,
        worker: &Worker,
        poll_interval: Duration,
    ) -> Self {
        Self {
            id: NEXT_STACK_ID.fetch_add(1, Ordering::Relaxed),
            tran_id: worker.tran_id,
            session_id,
            session,
            client: worker.client.clone(),
            poll_interval,
            request_id: AtomicI32::new(0),
            state: Mutex::new(StackState {
                worker: worker.id,
                connection: None,
                query_handlers: BTreeSet::new(),
                cursors: BTreeSet::new(),
                cursor_handlers: BTreeMap::new(),
                client_header: Header::new(session_id, client_command::CALLBACK, 0),
                runtime_header: Header::new(session_id, runtime_command::INVOKE, 0),
                error_message: String::new(),
                last_error: None,
                data_queue: VecDeque::new(),
                transaction_control: false,
            }),
        }
    }

    pub fn id(&self) -> StackId {
        self.id
    }

    pub fn tran_id(&self) -> TranId {
        self.tran_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Session of this frame, which fails if the Session has since ended.
    pub fn session(&self) -> Result<Arc<Session>, Error> {
        self.session.upgrade().ok_or(Error::SessionExpired)
    }

    /// Worker currently executing this frame.
    pub fn worker(&self) -> WorkerId {
        self.state.lock().unwrap().worker
    }

    /// Re-associate this frame with another worker.
    pub fn set_thread(&self, worker: WorkerId) {
        self.state.lock().unwrap().worker = worker;
    }

    pub fn next_request_id(&self) -> i32 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn set_client_command(&self, command: i32) {
        self.state.lock().unwrap().client_header.command = command;
    }

    pub fn set_runtime_command(&self, command: i32) {
        self.state.lock().unwrap().runtime_header.command = command;
    }

    pub fn set_transaction_control(&self, enabled: bool) {
        self.state.lock().unwrap().transaction_control = enabled;
    }

    pub fn transaction_control(&self) -> bool {
        self.state.lock().unwrap().transaction_control
    }

    /// Send `payload` to the client without awaiting a response.
    pub fn send_to_client(&self, payload: &[u8]) -> Result<(), Error> {
        let header = self.stamp_client_header();
        let result = self.client.send(&header, payload);
        self.observe(result)
    }

    /// Send `payload` to the client and await its response.
    pub fn send_to_client_and_receive(&self, payload: &[u8]) -> Result<Bytes, Error> {
        let header = self.stamp_client_header();
        let result = self.client.send_and_receive(&header, payload);
        self.observe(result)
    }

    /// Send `payload` to the runtime over this frame's connection,
    /// claiming one from the Session if the frame has none.
    pub fn send_to_runtime(&self, payload: &[u8]) -> Result<(), Error> {
        let header = {
            let mut state = self.state.lock().unwrap();
            state.runtime_header.request_id = self.next_request_id();
            state.runtime_header
        };
        let result = self.with_connection(|conn| conn.send(&header, payload));
        self.observe(result)
    }

    /// Read the next response of the runtime. The read polls at the
    /// configured interval, and aborts if the client disconnects or
    /// the Session is interrupted or ends.
    pub fn read_from_runtime(&self) -> Result<Bytes, Error> {
        let poll = self.poll_interval;
        let result =
            self.with_connection(|conn| conn.receive(&mut || self.interrupt_check(), poll));
        self.observe(result)
    }

    fn interrupt_check(&self) -> Result<(), Error> {
        let session = self.session()?;

        if self.client.is_disconnected() {
            session.set_interrupt(InterruptReason::Interrupted, "");
        }
        match session.interrupt() {
            Some(interrupt) => Err(Error::Interrupted(interrupt)),
            None => Ok(()),
        }
    }

    fn stamp_client_header(&self) -> Header {
        let mut state = self.state.lock().unwrap();
        state.client_header.request_id = self.next_request_id();
        state.client_header
    }

    fn with_connection<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut ConnectionView) -> Result<T, Error>,
    {
        let claimed = self.state.lock().unwrap().connection.take();

        let claimed = match claimed {
            Some(conn) => Some(conn),
            None => self.session()?.claim_connection(),
        };
        let Some(mut conn) = claimed else {
            return Err(Error::CannotConnect("connection pool".to_string()));
        };

        let result = f(&mut conn);

        // A failed connection is dropped, and the next exchange claims another.
        if conn.is_valid() {
            self.state.lock().unwrap().connection = Some(conn);
        }
        result
    }

    // Record a failed exchange, and raise session-wide failures
    // as an interrupt of the Session.
    fn observe<T>(&self, result: Result<T, Error>) -> Result<T, Error> {
        let err = match result {
            Ok(ok) => return Ok(ok),
            Err(err) => err,
        };
        self.state.lock().unwrap().last_error = Some(err.to_string());

        if let (true, Some(reason), Some(session)) = (
            err.kind().is_session_wide(),
            err.interrupt_reason(),
            self.session.upgrade(),
        ) {
            session.set_interrupt(reason, err.interrupt_message());
        }
        Err(err)
    }

    pub fn set_error_message(&self, message: impl Into<String>) {
        self.state.lock().unwrap().error_message = message.into();
    }

    /// Error message of this frame, falling back to the last error
    /// it observed if no message was set.
    pub fn error_message(&self) -> String {
        let mut state = self.state.lock().unwrap();

        if state.error_message.is_empty() {
            if let Some(last_error) = &state.last_error {
                state.error_message = last_error.clone();
            }
        }
        state.error_message.clone()
    }

    pub fn push_payload(&self, payload: Bytes) {
        self.state.lock().unwrap().data_queue.push_back(payload);
    }

    pub fn pop_payload(&self) -> Option<Bytes> {
        self.state.lock().unwrap().data_queue.pop_front()
    }

    pub fn add_query_handler(&self, handler_id: i32) {
        self.state.lock().unwrap().query_handlers.insert(handler_id);
    }

    pub fn remove_query_handler(&self, handler_id: i32) {
        self.state.lock().unwrap().query_handlers.remove(&handler_id);
    }

    pub fn reset_query_handlers(&self) {
        self.state.lock().unwrap().query_handlers.clear();
    }

    pub fn query_handlers(&self) -> Vec<i32> {
        self.state.lock().unwrap().query_handlers.iter().copied().collect()
    }

    /// Register a cursor over `query_id`, opened through `handler_id`.
    /// Unless promoted, the cursor is destroyed with this frame.
    pub fn add_cursor(
        &self,
        handler_id: i32,
        query_id: QueryId,
        oid_included: bool,
    ) -> Result<CursorRef, Error> {
        let session = self.session()?;
        let cursor = session
            .create_cursor(self.worker(), self.tran_id, query_id, oid_included)
            .ok_or(Error::InvalidQueryId(query_id))?;

        let mut state = self.state.lock().unwrap();
        state.cursors.insert(query_id);
        state.cursor_handlers.insert(query_id, handler_id);

        Ok(cursor)
    }

    pub fn remove_cursor(&self, query_id: QueryId) -> Result<(), Error> {
        {
            let mut state = self.state.lock().unwrap();
            state.cursors.remove(&query_id);
            state.cursor_handlers.remove(&query_id);
        }
        self.session()?.destroy_cursor(query_id);
        Ok(())
    }

    /// Fetch the cursor of `query_id`. A session cursor which was
    /// destroyed is re-created.
    pub fn get_cursor(&self, query_id: QueryId) -> Option<CursorRef> {
        let session = self.session.upgrade()?;

        match session.get_cursor(query_id) {
            Some(cursor) => Some(cursor),
            None if session.is_session_cursor(query_id) => {
                session.create_cursor(self.worker(), self.tran_id, query_id, false)
            }
            None => None,
        }
    }

    /// Handler which opened the cursor of `query_id`.
    pub fn cursor_handler(&self, query_id: QueryId) -> Option<i32> {
        self.state
            .lock()
            .unwrap()
            .cursor_handlers
            .get(&query_id)
            .copied()
    }

    pub fn cursor_ids(&self) -> Vec<QueryId> {
        self.state.lock().unwrap().cursors.iter().copied().collect()
    }

    /// Extend the lifetime of the cursor of `query_id` to that of the
    /// Session, as it's being returned to a calling frame.
    pub fn promote_to_session_cursor(&self, query_id: QueryId) -> Result<(), Error> {
        {
            let mut state = self.state.lock().unwrap();
            state.cursors.remove(&query_id);
            state.cursor_handlers.remove(&query_id);
        }
        self.session()?.add_session_cursor(query_id);
        Ok(())
    }

    /// Release the cursors, query handlers and connection of this frame.
    pub(crate) fn release(&self, session: &Session) {
        let (cursors, handlers, connection) = {
            let mut state = self.state.lock().unwrap();
            state.cursor_handlers.clear();
            state.data_queue.clear();
            (
                std::mem::take(&mut state.cursors),
                std::mem::take(&mut state.query_handlers),
                state.connection.take(),
            )
        };

        // A cursor received from a callee but never returned to our
        // caller may have been promoted. It's destroyed regardless.
        for query_id in cursors {
            session.remove_session_cursor(query_id);
            session.destroy_cursor(query_id);
        }

        if !handlers.is_empty() {
            let handlers: Vec<i32> = handlers.into_iter().collect();
            let header = Header::new(
                self.session_id,
                client_command::FREE_QUERY_HANDLERS,
                self.next_request_id(),
            );
            if let Err(error) = self.client.send(&header, &pack_i32s(&handlers)) {
                tracing::debug!(%error, stack_id = %self.id, "failed to free query handlers of client");
            }
        }

        if let Some(conn) = connection {
            session.release_connection(conn);
        }
    }
}

impl std::fmt::Debug for ExecutionStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionStack")
            .field("id", &self.id)
            .field("tran_id", &self.tran_id)
            .field("session_id", &self.session_id)
            .finish()
    }
}
