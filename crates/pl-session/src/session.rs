use crate::connection::{ConnectionPool, ConnectionView};
use crate::cursor::{CursorRef, QueryCursor};
use crate::list::QueryManager;
use crate::params::{ParamId, ParameterSource, SystemParameter};
use crate::protocol::{runtime_command, Header};
use crate::{
    Error, ExecutionStack, Interrupt, InterruptReason, InterruptState, QueryId, SessionConfig,
    SessionId, StackId, TranId, Worker, WorkerId, NULL_QUERY_ID,
};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::Duration;

/// Services are the collaborators shared by every Session.
#[derive(Clone)]
pub struct Services {
    pub pool: Arc<ConnectionPool>,
    pub queries: Arc<dyn QueryManager>,
    pub params: Arc<dyn ParameterSource>,
}

/// Session aggregates the stored procedure execution of one transaction:
/// its stack of active frames, its cursors, its claimed runtime connections,
/// and its interrupt state.
pub struct Session {
    id: SessionId,
    config: SessionConfig,
    services: Services,
    request_id: AtomicI32,
    state: Mutex<SessionState>,
    // Notified on every push, pop, and change of interrupt state.
    changed: Condvar,
    me: Weak<Session>,
}

#[derive(Default)]
struct SessionState {
    // Frame IDs in push order. The length is the current depth.
    stack_order: Vec<StackId>,
    stacks: HashMap<StackId, Arc<ExecutionStack>>,
    cursors: HashMap<QueryId, CursorRef>,
    session_cursors: HashSet<QueryId>,
    connections: VecDeque<ConnectionView>,
    interrupt: InterruptState,
    running: bool,
    // Frame which is releasing its resources ahead of being popped.
    // Pushes wait for it, so the frame is topmost until it's removed.
    popping: Option<StackId>,
    changed_params: BTreeSet<ParamId>,
}

impl SessionState {
    fn registered(&self, stack_id: StackId) -> Result<Arc<ExecutionStack>, Error> {
        self.stacks
            .get(&stack_id)
            .cloned()
            .ok_or(Error::StackNotFound(stack_id))
    }
}

impl Session {
    pub fn new(id: SessionId, config: SessionConfig, services: Services) -> Arc<Self> {
        tracing::debug!(session_id = %id, "created stored procedure session");

        Arc::new_cyclic(|me| Self {
            id,
            config,
            services,
            request_id: AtomicI32::new(0),
            state: Mutex::new(SessionState::default()),
            changed: Condvar::new(),
            me: me.clone(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap()
    }

    /// Begin a nested call of `worker` by pushing a new frame.
    ///
    /// Fails with TooManyNestedCalls, which also interrupts the Session,
    /// if the index of the topmost frame has reached the maximum depth.
    /// Fails with the Session's interrupt if it's interrupted and already
    /// has active frames. A push onto an idle Session clears any interrupt
    /// left over from its prior call. A push waits for a frame
    /// which is being popped to finish its release.
    pub fn create_and_push_stack(&self, worker: &Worker) -> Result<Arc<ExecutionStack>, Error> {
        let mut state = self
            .changed
            .wait_while(self.lock(), |s| s.popping.is_some())
            .unwrap();
        let depth = state.stack_order.len();

        if depth != 0 && depth - 1 >= self.config.max_nesting_depth {
            std::mem::drop(state);
            self.set_interrupt(InterruptReason::TooManyNestedCalls, "");
            return Err(Error::TooManyNestedCalls);
        }

        if !state.running && depth == 0 {
            state.interrupt.clear();
        }

        if let (Some(interrupt), true) = (state.interrupt.get(), depth != 0) {
            let interrupt = interrupt.clone();
            self.changed.notify_all();
            return Err(Error::Interrupted(interrupt));
        }

        if state.stack_order.try_reserve(1).is_err() || state.stacks.try_reserve(1).is_err() {
            std::mem::drop(state);
            let message = "cannot allocate an execution stack";
            self.set_interrupt(InterruptReason::OutOfMemory, message);
            return Err(Error::OutOfMemory(message.to_string()));
        }

        let stack = Arc::new(ExecutionStack::new(
            self.me.clone(),
            self.id,
            worker,
            self.config.read_poll_interval,
        ));
        state.stacks.insert(stack.id(), stack.clone());
        state.stack_order.push(stack.id());
        state.running = true;

        self.changed.notify_all();

        tracing::debug!(
            session_id = %self.id,
            stack_id = %stack.id(),
            worker = %worker.id,
            depth = state.stack_order.len(),
            "pushed execution stack"
        );
        Ok(stack)
    }

    /// End the nested call of frame `stack_id`, blocking until it's the
    /// topmost frame. Its resources are released before it's popped, so
    /// frames are always released in the reverse order of their pushes.
    pub fn pop_and_destroy_stack(&self, stack_id: StackId) {
        let mut state = self.lock();
        if state.stack_order.is_empty() {
            return;
        }

        state = self
            .changed
            .wait_while(state, |s| {
                s.stack_order.contains(&stack_id) && s.stack_order.last() != Some(&stack_id)
            })
            .unwrap();

        if state.stack_order.last() != Some(&stack_id) {
            tracing::error!(session_id = %self.id, %stack_id, "popped execution stack is not active");
            return;
        }
        let stack = match state.registered(stack_id) {
            Ok(stack) => stack,
            Err(error) => {
                tracing::error!(session_id = %self.id, %error, "cannot pop execution stack");
                debug_assert!(false, "{error}");
                return;
            }
        };
        state.popping = Some(stack_id);
        std::mem::drop(state);

        // Frames above us are gone. Pushes and frames below block until we pop.
        stack.release(self);

        let mut state = self.lock();
        if let Some(index) = state.stack_order.iter().rposition(|id| *id == stack_id) {
            state.stack_order.remove(index);
        }
        state.stacks.remove(&stack_id);
        state.popping = None;

        if state.stack_order.is_empty() {
            state.running = false;
            state.interrupt.clear();
        }
        self.changed.notify_all();

        tracing::debug!(
            session_id = %self.id,
            %stack_id,
            depth = state.stack_order.len(),
            "popped execution stack"
        );
    }

    /// Innermost active frame, if any.
    pub fn top_stack(&self) -> Option<Arc<ExecutionStack>> {
        let state = self.lock();
        let top = state.stack_order.last()?;

        match state.registered(*top) {
            Ok(stack) => Some(stack),
            Err(error) => {
                tracing::error!(session_id = %self.id, %error, "cannot resolve topmost execution stack");
                debug_assert!(false, "{error}");
                None
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.lock().stack_order.len()
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Is `worker` executing any frame of this Session?
    pub fn is_thread_involved(&self, worker: WorkerId) -> bool {
        self.lock()
            .stacks
            .values()
            .any(|stack| stack.worker() == worker)
    }

    /// Claim a runtime connection, drawing a new one from the pool
    /// if the Session holds none.
    pub fn claim_connection(&self) -> Option<ConnectionView> {
        if let Some(conn) = self.lock().connections.pop_front() {
            return Some(conn);
        }
        self.services.pool.claim()
    }

    /// Return a claimed connection to the Session.
    /// Connections which are no longer valid are dropped.
    pub fn release_connection(&self, conn: ConnectionView) {
        if conn.is_valid() {
            self.lock().connections.push_back(conn);
        }
    }

    pub fn next_request_id(&self) -> i32 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Interrupt the Session, unless it's already interrupted.
    /// `message` is retained only for reasons which carry one.
    /// Returns true if this call interrupted the Session.
    pub fn set_interrupt(&self, reason: InterruptReason, message: &str) -> bool {
        let entered = self.lock().interrupt.set(reason, message);
        if !entered {
            return false;
        }
        self.changed.notify_all();

        tracing::warn!(session_id = %self.id, %reason, detail = message, "interrupted stored procedure session");
        self.destroy_runtime_context();
        true
    }

    /// Interrupt the Session by error code. Codes which are not
    /// interrupt reasons are ignored.
    pub fn set_interrupt_code(&self, code: i32, message: &str) -> bool {
        match InterruptReason::from_code(code) {
            Some(reason) => self.set_interrupt(reason, message),
            None => false,
        }
    }

    pub fn clear_interrupt(&self) {
        self.lock().interrupt.clear();
        self.changed.notify_all();
    }

    pub fn is_interrupted(&self) -> bool {
        self.lock().interrupt.is_interrupted()
    }

    pub fn interrupt(&self) -> Option<Interrupt> {
        self.lock().interrupt.get().cloned()
    }

    /// Wake waiting frames, and block until the Session is no longer running.
    pub fn wait_for_interrupt(&self) {
        let state = self.lock();
        if !state.running {
            return;
        }
        self.changed.notify_all();

        let _state = self.changed.wait_while(state, |s| s.running).unwrap();
    }

    /// As wait_for_interrupt, but give up after `timeout`.
    /// Returns true if the Session is no longer running.
    pub fn wait_for_interrupt_timeout(&self, timeout: Duration) -> bool {
        let state = self.lock();
        if !state.running {
            return true;
        }
        self.changed.notify_all();

        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| s.running)
            .unwrap();
        !state.running
    }

    // Best-effort request that the runtime drop its context of this Session.
    fn destroy_runtime_context(&self) {
        let header = Header::new(self.id, runtime_command::DESTROY, self.next_request_id());

        let Some(mut conn) = self.claim_connection() else {
            return;
        };
        if conn.is_valid() {
            if let Err(error) = conn.send(&header, &[]) {
                tracing::debug!(session_id = %self.id, %error, "failed to destroy runtime session context");
            }
        }
        self.release_connection(conn);
    }

    /// Fetch or create the cursor of `query_id`, owned by `worker`.
    /// Returns None for the null query ID, and for IDs beyond the
    /// configured maximum.
    pub fn create_cursor(
        &self,
        worker: WorkerId,
        tran_id: TranId,
        query_id: QueryId,
        oid_included: bool,
    ) -> Option<CursorRef> {
        if query_id == NULL_QUERY_ID || query_id >= self.config.max_query_id {
            return None; // Ex: a query which is statically known to be empty.
        }
        let mut state = self.lock();

        if let Some(cursor) = state.cursors.get(&query_id) {
            cursor.lock().unwrap().change_owner(worker, tran_id);
            return Some(cursor.clone());
        }

        let mut cursor = QueryCursor::new(
            self.services.queries.clone(),
            worker,
            tran_id,
            query_id,
            oid_included,
        );
        cursor.set_fetch_count(self.config.default_fetch_count);

        let cursor = Arc::new(Mutex::new(cursor));
        state.cursors.insert(query_id, cursor.clone());
        Some(cursor)
    }

    pub fn get_cursor(&self, query_id: QueryId) -> Option<CursorRef> {
        if query_id == NULL_QUERY_ID {
            return None;
        }
        self.lock().cursors.get(&query_id).cloned()
    }

    pub fn destroy_cursor(&self, query_id: QueryId) {
        if query_id == NULL_QUERY_ID {
            return;
        }
        let cursor = self.lock().cursors.remove(&query_id);

        if let Some(cursor) = cursor {
            cursor.lock().unwrap().close();
        }
    }

    pub fn destroy_all_cursors(&self) {
        let cursors = {
            let mut state = self.lock();
            state.session_cursors.clear();
            std::mem::take(&mut state.cursors)
        };
        for cursor in cursors.into_values() {
            cursor.lock().unwrap().close();
        }
    }

    pub fn add_session_cursor(&self, query_id: QueryId) {
        if query_id != NULL_QUERY_ID {
            self.lock().session_cursors.insert(query_id);
        }
    }

    pub fn remove_session_cursor(&self, query_id: QueryId) {
        if query_id != NULL_QUERY_ID {
            self.lock().session_cursors.remove(&query_id);
        }
    }

    pub fn is_session_cursor(&self, query_id: QueryId) -> bool {
        self.lock().session_cursors.contains(&query_id)
    }

    pub fn mark_session_param_changed(&self, id: ParamId) {
        self.lock().changed_params.insert(id);
    }

    /// Parameters changed during this Session which users may change
    /// and which are scoped to a session. If `reset`, the set of
    /// changed parameters is cleared.
    pub fn obtain_session_parameters(&self, reset: bool) -> Vec<SystemParameter> {
        let defs = self.services.params.parameters();
        let mut state = self.lock();

        let params = defs
            .iter()
            .filter(|def| {
                def.user_change && def.for_session && state.changed_params.contains(&def.id)
            })
            .map(SystemParameter::from_def)
            .collect();

        if reset {
            state.changed_params.clear();
        }
        params
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        tracing::debug!(session_id = %self.id, "destroying stored procedure session");

        self.destroy_runtime_context();
        self.destroy_all_cursors();
        self.lock().connections.clear();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("depth", &state.stack_order.len())
            .field("running", &state.running)
            .field("interrupt", &state.interrupt)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::{Services, Session, SessionState};
    use crate::connection::test_support::{MockConnector, Wire};
    use crate::connection::ConnectionPool;
    use crate::list::{ListFile, MemoryQueryManager};
    use crate::params::{MemoryParameters, ParamValue, ParameterDef};
    use crate::protocol::{client_command, runtime_command, Header};
    use crate::{
        ClientChannel, DbType, Domain, Error, InterruptReason, SessionConfig, Worker, WorkerId,
    };
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct Client {
        sent: Mutex<Vec<(Header, Vec<u8>)>>,
        disconnected: AtomicBool,
    }

    impl ClientChannel for Client {
        fn send(&self, header: &Header, payload: &[u8]) -> Result<(), Error> {
            self.sent.lock().unwrap().push((*header, payload.to_vec()));
            Ok(())
        }
        fn send_and_receive(&self, header: &Header, payload: &[u8]) -> Result<Bytes, Error> {
            self.send(header, payload)?;
            Ok(Bytes::from_static(b"ack"))
        }
        fn is_disconnected(&self) -> bool {
            self.disconnected.load(Ordering::SeqCst)
        }
    }

    struct Fixture {
        wire: Arc<Wire>,
        queries: Arc<MemoryQueryManager>,
        params: Arc<MemoryParameters>,
        client: Arc<Client>,
        session: Arc<Session>,
    }

    impl Fixture {
        fn new(config: SessionConfig) -> Self {
            let wire = Arc::new(Wire::default());
            let queries = Arc::new(MemoryQueryManager::default());
            let params = Arc::new(MemoryParameters::new(vec![
                param(1, true, true, ParamValue::Bool(true)),
                param(2, false, true, ParamValue::Integer(3)),
                param(3, true, false, ParamValue::Integer(4)),
                param(4, true, true, ParamValue::String(None)),
            ]));
            let services = Services {
                pool: ConnectionPool::new(MockConnector(wire.clone()), 4),
                queries: queries.clone(),
                params: params.clone(),
            };

            Self {
                wire,
                queries,
                params,
                client: Arc::new(Client::default()),
                session: Session::new(9, config, services),
            }
        }

        fn worker(&self, id: u64) -> Worker {
            Worker {
                id: WorkerId(id),
                tran_id: 1,
                client: self.client.clone(),
            }
        }

        fn destroys(&self) -> usize {
            self.wire
                .sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(h, _)| h.command == runtime_command::DESTROY)
                .count()
        }
    }

    fn param(id: i32, user_change: bool, for_session: bool, value: ParamValue) -> ParameterDef {
        ParameterDef {
            id,
            name: format!("param_{id}"),
            user_change,
            for_session,
            value,
        }
    }

    #[test]
    fn test_depth_limit_allows_one_more_than_max() {
        let fixture = Fixture::new(SessionConfig {
            max_nesting_depth: 2,
            ..Default::default()
        });
        let session = &fixture.session;
        let worker = fixture.worker(1);

        let frames: Vec<_> = (0..3)
            .map(|_| session.create_and_push_stack(&worker).unwrap())
            .collect();
        assert_eq!(session.depth(), 3);

        let err = session.create_and_push_stack(&worker).unwrap_err();
        assert!(matches!(err, Error::TooManyNestedCalls));
        assert_eq!(session.depth(), 3);
        assert_eq!(
            session.interrupt().unwrap().reason,
            InterruptReason::TooManyNestedCalls
        );
        // Entering the interrupted state asks the runtime to drop the session.
        assert_eq!(fixture.destroys(), 1);

        for frame in frames.iter().rev() {
            session.pop_and_destroy_stack(frame.id());
        }
        assert_eq!(session.depth(), 0);
        assert!(!session.is_running());
        assert!(!session.is_interrupted());
    }

    // Blocks while freeing query handlers, until resumed.
    struct BlockingClient {
        entered: Mutex<mpsc::Sender<()>>,
        resume: Mutex<mpsc::Receiver<()>>,
    }

    impl ClientChannel for BlockingClient {
        fn send(&self, header: &Header, _payload: &[u8]) -> Result<(), Error> {
            if header.command == client_command::FREE_QUERY_HANDLERS {
                self.entered.lock().unwrap().send(()).unwrap();
                self.resume.lock().unwrap().recv().unwrap();
            }
            Ok(())
        }
        fn send_and_receive(&self, header: &Header, payload: &[u8]) -> Result<Bytes, Error> {
            self.send(header, payload)?;
            Ok(Bytes::new())
        }
        fn is_disconnected(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_push_waits_for_pop_in_progress() {
        let fixture = Fixture::new(SessionConfig::default());
        let session = fixture.session.clone();

        let (entered_tx, entered_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel();
        let worker = Worker {
            id: WorkerId(1),
            tran_id: 1,
            client: Arc::new(BlockingClient {
                entered: Mutex::new(entered_tx),
                resume: Mutex::new(resume_rx),
            }),
        };

        let a = session.create_and_push_stack(&worker).unwrap();
        let x = session.create_and_push_stack(&worker).unwrap();
        x.add_query_handler(1);

        let popper = {
            let (session, x) = (session.clone(), x.id());
            std::thread::spawn(move || session.pop_and_destroy_stack(x))
        };
        // X is now releasing its query handlers, without the session lock.
        entered_rx.recv().unwrap();

        let pusher = {
            let (session, worker) = (session.clone(), worker.clone());
            std::thread::spawn(move || session.create_and_push_stack(&worker).map(|y| y.id()))
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(!pusher.is_finished());
        assert_eq!(session.depth(), 2);

        resume_tx.send(()).unwrap();
        popper.join().unwrap();
        let y = pusher.join().unwrap().unwrap();

        assert_eq!(session.depth(), 2);
        assert_eq!(session.top_stack().unwrap().id(), y);

        session.pop_and_destroy_stack(y);
        assert_eq!(session.top_stack().unwrap().id(), a.id());
        session.pop_and_destroy_stack(a.id());
        assert_eq!(session.depth(), 0);
        assert!(!session.is_running());
    }

    #[test]
    fn test_unregistered_stack_lookup() {
        let err = SessionState::default().registered(3).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"execution stack 3 is not registered with its session");
        assert_eq!(err.kind(), crate::ErrorKind::ProtocolInvariantViolation);
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_interrupt_is_first_wins_and_ignores_unknown_codes() {
        let fixture = Fixture::new(SessionConfig::default());
        let session = &fixture.session;

        assert!(!session.set_interrupt_code(-9999, "nope"));
        assert!(!session.is_interrupted());

        assert!(session.set_interrupt_code(-1162, "reset by peer"));
        assert!(!session.set_interrupt(InterruptReason::ServerShutdown, ""));

        insta::assert_snapshot!(
            session.interrupt().unwrap().to_string(),
            @"network error while talking to the stored procedure runtime: reset by peer");
        assert_eq!(fixture.destroys(), 1);
        assert!(logs_contain("interrupted stored procedure session"));

        // An idle session clears its interrupt on the next outermost push.
        let frame = session.create_and_push_stack(&fixture.worker(1)).unwrap();
        assert!(!session.is_interrupted());
        session.pop_and_destroy_stack(frame.id());
    }

    #[test]
    fn test_cursor_registry() {
        let fixture = Fixture::new(SessionConfig::default());
        let session = &fixture.session;
        fixture
            .queries
            .insert(1, 77, ListFile::new(vec![Domain::new(DbType::Integer)]));

        assert!(session.create_cursor(WorkerId(1), 1, 0, false).is_none());
        assert!(session.create_cursor(WorkerId(1), 1, 32767, false).is_none());

        let first = session.create_cursor(WorkerId(1), 1, 77, false).unwrap();
        first.lock().unwrap().open().unwrap();
        assert_eq!(first.lock().unwrap().fetch_count(), 1000);

        // Same query, same worker: the same open cursor.
        let again = session.create_cursor(WorkerId(1), 1, 77, false).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert!(again.lock().unwrap().is_opened());

        // Different worker: the same cursor, re-owned and closed.
        let other = session.create_cursor(WorkerId(2), 1, 77, true).unwrap();
        assert!(Arc::ptr_eq(&first, &other));
        assert_eq!(other.lock().unwrap().owner(), WorkerId(2));
        assert!(!other.lock().unwrap().is_opened());

        session.add_session_cursor(77);
        assert!(session.is_session_cursor(77));
        session.destroy_all_cursors();
        assert!(!session.is_session_cursor(77));
        assert!(session.get_cursor(77).is_none());
    }

    #[test]
    fn test_frame_release_destroys_unpromoted_cursors() {
        let fixture = Fixture::new(SessionConfig::default());
        let session = &fixture.session;
        for query_id in [10, 11] {
            fixture
                .queries
                .insert(1, query_id, ListFile::new(vec![Domain::new(DbType::Integer)]));
        }

        let outer = session.create_and_push_stack(&fixture.worker(1)).unwrap();
        let inner = session.create_and_push_stack(&fixture.worker(2)).unwrap();
        assert!(session.is_thread_involved(WorkerId(2)));
        assert!(!session.is_thread_involved(WorkerId(3)));

        inner.add_cursor(100, 10, false).unwrap();
        inner.add_cursor(101, 11, false).unwrap();
        assert_eq!(inner.cursor_handler(11), Some(101));
        assert!(matches!(
            inner.add_cursor(102, 0, false),
            Err(Error::InvalidQueryId(0))
        ));
        inner.promote_to_session_cursor(11).unwrap();
        inner.add_query_handler(5);
        inner.add_query_handler(3);

        session.pop_and_destroy_stack(inner.id());
        assert!(session.get_cursor(10).is_none());
        assert!(session.get_cursor(11).is_some());

        // Handlers the frame opened are freed at the client.
        let sent = fixture.client.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.command, client_command::FREE_QUERY_HANDLERS);
        assert_eq!(sent[0].1, vec![0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 5]);

        // A promoted cursor that was destroyed is re-created for a frame.
        session.destroy_cursor(11);
        let cursor = outer.get_cursor(11).unwrap();
        assert_eq!(cursor.lock().unwrap().owner(), WorkerId(1));
        assert!(outer.get_cursor(10).is_none());

        session.pop_and_destroy_stack(outer.id());
        assert!(!session.is_running());
    }

    #[test]
    fn test_runtime_exchange() {
        let fixture = Fixture::new(SessionConfig {
            read_poll_interval: Duration::from_millis(5),
            ..Default::default()
        });
        let session = &fixture.session;
        let frame = session.create_and_push_stack(&fixture.worker(1)).unwrap();

        frame.set_runtime_command(runtime_command::COMPILE);
        frame.send_to_runtime(b"one").unwrap();
        frame.send_to_runtime(b"two").unwrap();
        fixture
            .wire
            .responses
            .lock()
            .unwrap()
            .push_back(Bytes::from_static(b"reply"));
        assert_eq!(frame.read_from_runtime().unwrap().as_ref(), b"reply");

        {
            let sent = fixture.wire.sent.lock().unwrap();
            let headers: Vec<_> = sent.iter().map(|(h, _)| (h.command, h.request_id)).collect();
            assert_eq!(
                headers,
                vec![(runtime_command::COMPILE, 0), (runtime_command::COMPILE, 1)]
            );
            assert!(sent.iter().all(|(h, _)| h.session_id == 9));
        }
        // The frame holds one connection across exchanges.
        assert_eq!(*fixture.wire.dials.lock().unwrap(), 1);

        // A client disconnect aborts a pending read and interrupts the session.
        fixture.client.disconnected.store(true, Ordering::SeqCst);
        let err = frame.read_from_runtime().unwrap_err();
        assert_eq!(err.code(), InterruptReason::Interrupted.code());
        assert!(session.is_interrupted());
        insta::assert_snapshot!(frame.error_message(), @"execution was interrupted");

        session.pop_and_destroy_stack(frame.id());
        assert!(!session.is_interrupted());
    }

    #[test]
    fn test_runtime_unreachable() {
        let fixture = Fixture::new(SessionConfig::default());
        *fixture.wire.refuse.lock().unwrap() = true;

        let session = &fixture.session;
        let frame = session.create_and_push_stack(&fixture.worker(1)).unwrap();

        let err = frame.send_to_runtime(b"hello").unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"cannot connect to the stored procedure runtime: connection pool");

        let interrupt = session.interrupt().unwrap();
        assert_eq!(interrupt.reason, InterruptReason::CannotConnect);
        assert_eq!(interrupt.message, "connection pool");

        session.pop_and_destroy_stack(frame.id());
    }

    #[test]
    fn test_session_parameters() {
        let fixture = Fixture::new(SessionConfig::default());
        let session = &fixture.session;

        for id in [1, 2, 3, 4] {
            session.mark_session_param_changed(id);
        }
        fixture.params.set(1, ParamValue::Bool(false));

        let params = session.obtain_session_parameters(false);
        let rendered: Vec<_> = params.iter().map(|p| (p.id, p.value.as_str())).collect();
        assert_eq!(rendered, vec![(1, "false"), (4, "")]);

        assert_eq!(session.obtain_session_parameters(true).len(), 2);
        assert!(session.obtain_session_parameters(false).is_empty());
    }

    #[test]
    fn test_drop_destroys_runtime_context() {
        let fixture = Fixture::new(SessionConfig::default());
        let Fixture { wire, session, .. } = fixture;

        std::mem::drop(session);
        let sent = wire.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.command, runtime_command::DESTROY);
    }
}
