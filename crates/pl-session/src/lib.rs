mod config;
mod context;
mod error;
mod interrupt;
mod session;
mod stack;
mod value;

pub mod connection;
pub mod cursor;
pub mod list;
pub mod params;
pub mod protocol;

pub use config::{PoolConfig, SessionConfig};
pub use connection::{Connection, ConnectionPool, ConnectionView, Connector};
pub use context::{ExecutionContext, SessionRegistry, StackGuard, Worker};
pub use cursor::{CursorRef, QueryCursor, ScanCode};
pub use error::{Error, ErrorKind};
pub use interrupt::{Interrupt, InterruptReason, InterruptState};
pub use list::{ListFile, MemoryQueryManager, QueryManager};
pub use params::{MemoryParameters, ParameterSource, SystemParameter};
pub use session::{Services, Session};
pub use stack::{ClientChannel, ExecutionStack};
pub use value::{DbType, DecodeError, Domain, Oid, Value};

/// Identifies the Session of a transaction.
pub type SessionId = u32;
/// Process-unique identifier of an ExecutionStack.
pub type StackId = u64;
pub type QueryId = u64;
pub type TranId = i32;

/// QueryId of a query which has no result, such as one
/// that's statically known to select nothing.
pub const NULL_QUERY_ID: QueryId = 0;

/// WorkerId identifies the thread executing a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}
