use crate::{
    ClientChannel, Error, ExecutionStack, InterruptReason, Services, Session, SessionConfig,
    SessionId, TranId, WorkerId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Worker is the identity of a thread executing a transaction's calls.
#[derive(Clone)]
pub struct Worker {
    pub id: WorkerId,
    pub tran_id: TranId,
    pub client: Arc<dyn ClientChannel>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("tran_id", &self.tran_id)
            .finish()
    }
}

/// SessionRegistry maps session IDs to their live Sessions.
pub struct SessionRegistry {
    config: SessionConfig,
    services: Services,
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig, services: Services) -> Arc<Self> {
        Arc::new(Self {
            config,
            services,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Fetch the Session of `id`, creating it if this is the
    /// first stored procedure call of its transaction.
    pub fn get_or_create(&self, id: SessionId) -> Arc<Session> {
        self.sessions
            .lock()
            .unwrap()
            .entry(id)
            .or_insert_with(|| Session::new(id, self.config.clone(), self.services.clone()))
            .clone()
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.lock().unwrap().get(&id).cloned()
    }

    /// Remove the Session of `id` as its transaction ends.
    /// The Session is destroyed once its last reference is dropped.
    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.lock().unwrap().remove(&id)
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Interrupt every live Session with `reason`,
    /// returning the number which this call interrupted.
    pub fn interrupt_all(&self, reason: InterruptReason, message: &str) -> usize {
        // Don't hold the registry lock while sessions talk to the runtime.
        self.sessions()
            .into_iter()
            .filter(|session| session.set_interrupt(reason, message))
            .count()
    }
}

/// ExecutionContext is threaded through the calls of a worker,
/// and resolves the Session the worker is executing within.
#[derive(Clone)]
pub struct ExecutionContext {
    registry: Arc<SessionRegistry>,
    worker: Worker,
    session_id: SessionId,
}

impl ExecutionContext {
    pub fn new(registry: Arc<SessionRegistry>, worker: Worker, session_id: SessionId) -> Self {
        Self {
            registry,
            worker,
            session_id,
        }
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Session of this context, which fails if the Session has ended.
    pub fn session(&self) -> Result<Arc<Session>, Error> {
        self.registry
            .get(self.session_id)
            .ok_or(Error::SessionExpired)
    }

    /// Begin a nested call, which ends when the returned StackGuard is dropped.
    pub fn enter(&self) -> Result<StackGuard, Error> {
        let session = self.registry.get_or_create(self.session_id);
        let stack = session.create_and_push_stack(&self.worker)?;
        Ok(StackGuard { session, stack })
    }
}

/// StackGuard pops and destroys its frame on drop.
pub struct StackGuard {
    session: Arc<Session>,
    stack: Arc<ExecutionStack>,
}

impl StackGuard {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn stack(&self) -> &Arc<ExecutionStack> {
        &self.stack
    }
}

impl std::ops::Deref for StackGuard {
    type Target = ExecutionStack;

    fn deref(&self) -> &Self::Target {
        &self.stack
    }
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        self.session.pop_and_destroy_stack(self.stack.id());
    }
}
