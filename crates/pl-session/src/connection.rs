use crate::protocol::{encode_request, split_frame, Header};
use crate::{Error, PoolConfig};
use bytes::{Bytes, BytesMut};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Connection is a bidirectional channel to the runtime.
pub trait Connection: Send {
    /// Is this connection still usable?
    /// A connection becomes invalid after any I/O failure.
    fn is_valid(&self) -> bool;

    /// Send a request `header` and its `payload`.
    fn send(&mut self, header: &Header, payload: &[u8]) -> Result<(), Error>;

    /// Receive the next response payload, waiting at most `poll` between
    /// calls of `interrupt`. An error returned by `interrupt` aborts the
    /// receive and is returned as-is.
    fn receive(
        &mut self,
        interrupt: &mut dyn FnMut() -> Result<(), Error>,
        poll: Duration,
    ) -> Result<Bytes, Error>;
}

/// Connector dials new Connections to the runtime.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Connection>, Error>;
}

/// ConnectionPool retains idle runtime Connections for reuse,
/// dialing new ones through its Connector as needed.
pub struct ConnectionPool {
    connector: Box<dyn Connector>,
    capacity: usize,
    epoch: AtomicU64,
    idle: Mutex<Vec<(u64, Box<dyn Connection>)>>,
    me: Weak<ConnectionPool>,
}

impl ConnectionPool {
    /// Build a ConnectionPool which retains at most `capacity` idle connections.
    pub fn new<C: Connector + 'static>(connector: C, capacity: usize) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            connector: Box::new(connector),
            capacity,
            epoch: AtomicU64::new(0),
            idle: Mutex::new(Vec::new()),
            me: me.clone(),
        })
    }

    /// Build a ConnectionPool of SocketConnections from its configuration.
    pub fn from_config(config: &PoolConfig) -> Arc<Self> {
        Self::new(
            SocketConnector::new(&config.address, config.connect_timeout),
            config.capacity,
        )
    }

    /// Claim a connection, reusing an idle one of the current epoch
    /// or else dialing a new one. Returns None if dialing fails.
    pub fn claim(&self) -> Option<ConnectionView> {
        let epoch = self.epoch();

        let reused = {
            let mut idle = self.idle.lock().unwrap();
            // Discard idle connections of prior epochs, or which have failed.
            idle.retain(|(e, conn)| *e == epoch && conn.is_valid());
            idle.pop()
        };

        let conn = match reused {
            Some((_, conn)) => conn,
            None => match self.connector.connect() {
                Ok(conn) => conn,
                Err(error) => {
                    tracing::warn!(%error, "failed to connect to the stored procedure runtime");
                    return None;
                }
            },
        };

        Some(ConnectionView {
            conn: Some(conn),
            epoch,
            pool: self.me.clone(),
        })
    }

    /// Current epoch of the pool.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Retire every connection of the current epoch.
    /// Called when the runtime restarts, as its connections are dead.
    pub fn bump_epoch(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.idle.lock().unwrap().clear();
        tracing::debug!(%epoch, "advanced connection pool epoch");
        epoch
    }

    /// Number of idle connections currently retained.
    pub fn idle_len(&self) -> usize {
        self.idle.lock().unwrap().len()
    }

    fn retire(&self, epoch: u64, conn: Box<dyn Connection>) {
        if epoch != self.epoch() || !conn.is_valid() {
            return; // Dropped.
        }
        let mut idle = self.idle.lock().unwrap();
        if idle.len() < self.capacity {
            idle.push((epoch, conn));
        }
    }
}

/// ConnectionView is an exclusively-owned handle to a pooled Connection.
/// Dropping it returns a still-valid connection to its pool.
pub struct ConnectionView {
    conn: Option<Box<dyn Connection>>,
    epoch: u64,
    pool: Weak<ConnectionPool>,
}

impl ConnectionView {
    /// Build a ConnectionView which belongs to no pool.
    pub fn detached(conn: Box<dyn Connection>) -> Self {
        Self {
            conn: Some(conn),
            epoch: 0,
            pool: Weak::new(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl std::ops::Deref for ConnectionView {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_deref().unwrap()
    }
}

impl std::ops::DerefMut for ConnectionView {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_deref_mut().unwrap()
    }
}

impl Drop for ConnectionView {
    fn drop(&mut self) {
        if let (Some(conn), Some(pool)) = (self.conn.take(), self.pool.upgrade()) {
            pool.retire(self.epoch, conn);
        }
    }
}

impl std::fmt::Debug for ConnectionView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionView")
            .field("epoch", &self.epoch)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// SocketConnector dials SocketConnections to a runtime TCP address.
pub struct SocketConnector {
    address: String,
    timeout: Duration,
}

impl SocketConnector {
    pub fn new(address: &str, timeout: Duration) -> Self {
        Self {
            address: address.to_string(),
            timeout,
        }
    }
}

impl Connector for SocketConnector {
    fn connect(&self) -> Result<Box<dyn Connection>, Error> {
        use std::net::ToSocketAddrs;

        let mut last_err = None;
        for addr in self
            .address
            .to_socket_addrs()
            .map_err(|err| Error::CannotConnect(format!("{}: {err}", self.address)))?
        {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    tracing::debug!(%addr, "connected to the stored procedure runtime");
                    return Ok(Box::new(SocketConnection::new(stream)));
                }
                Err(err) => last_err = Some(err),
            }
        }

        Err(Error::CannotConnect(match last_err {
            Some(err) => format!("{}: {err}", self.address),
            None => format!("{}: no addresses resolved", self.address),
        }))
    }
}

/// SocketConnection is a Connection over a TCP stream.
pub struct SocketConnection {
    stream: TcpStream,
    buffer: BytesMut,
    valid: bool,
}

impl SocketConnection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
            valid: true,
        }
    }

    fn fail<T>(&mut self, err: std::io::Error) -> Result<T, Error> {
        self.valid = false;
        Err(err.into())
    }
}

impl Connection for SocketConnection {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn send(&mut self, header: &Header, payload: &[u8]) -> Result<(), Error> {
        if !self.valid {
            return Err(Error::Network("connection is no longer valid".to_string()));
        }
        let mut buf = BytesMut::new();
        encode_request(header, payload, &mut buf);

        if let Err(err) = self.stream.write_all(&buf) {
            return self.fail(err);
        }
        Ok(())
    }

    fn receive(
        &mut self,
        interrupt: &mut dyn FnMut() -> Result<(), Error>,
        poll: Duration,
    ) -> Result<Bytes, Error> {
        if !self.valid {
            return Err(Error::Network("connection is no longer valid".to_string()));
        }
        if let Err(err) = self.stream.set_read_timeout(Some(poll)) {
            return self.fail(err);
        }
        let mut chunk = [0u8; 4096];

        loop {
            match split_frame(&mut self.buffer) {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) => (),
                Err(err) => {
                    // The stream is no longer framed.
                    self.valid = false;
                    self.buffer.clear();
                    return Err(err);
                }
            }

            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.valid = false;
                    return Err(Error::Network(
                        "runtime closed the connection".to_string(),
                    ));
                }
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(err)
                    if matches!(
                        err.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    // Poll interval elapsed without a response.
                    if let Err(err) = interrupt() {
                        // The connection is mid-response and cannot be reused.
                        self.valid = false;
                        return Err(err);
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => (),
                Err(err) => return self.fail(err),
            }
        }
    }
}
