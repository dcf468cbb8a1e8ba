use bytes::{Buf, Bytes};
use pl_session::protocol::{client_command, Header};
use pl_session::{
    ClientChannel, Connection, ConnectionPool, Connector, Error, MemoryParameters,
    MemoryQueryManager, Services, Session, SessionConfig, Worker, WorkerId,
};
use std::sync::{Arc, Mutex};

/// Client which records the query handlers freed by released frames.
#[derive(Default)]
pub struct RecordingClient {
    pub freed: Mutex<Vec<i32>>,
}

impl ClientChannel for RecordingClient {
    fn send(&self, header: &Header, payload: &[u8]) -> Result<(), Error> {
        if header.command == client_command::FREE_QUERY_HANDLERS {
            let mut payload = payload;
            let count = payload.get_i32();
            let mut freed = self.freed.lock().unwrap();
            for _ in 0..count {
                freed.push(payload.get_i32());
            }
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

/// Connector of a runtime which is not running.
pub struct Unreachable;

impl Connector for Unreachable {
    fn connect(&self) -> Result<Box<dyn Connection>, Error> {
        Err(Error::CannotConnect("runtime is not running".to_string()))
    }
}

pub fn services() -> Services {
    Services {
        pool: ConnectionPool::new(Unreachable, 1),
        queries: Arc::new(MemoryQueryManager::default()),
        params: Arc::new(MemoryParameters::default()),
    }
}

pub fn session(config: SessionConfig) -> Arc<Session> {
    Session::new(1, config, services())
}

pub fn worker(id: u64, client: &Arc<RecordingClient>) -> Worker {
    Worker {
        id: WorkerId(id),
        tran_id: 1,
        client: client.clone(),
    }
}
