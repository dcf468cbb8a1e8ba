use crate::{Interrupt, InterruptReason, QueryId, StackId};

/// ErrorKind classifies errors by how they propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Too many nested calls, or out of memory.
    ResourceExhausted,
    /// The runtime cannot be reached, the network failed, or the session expired.
    ConnectivityFailure,
    /// Session registries are inconsistent. This is a bug.
    ProtocolInvariantViolation,
    /// The catalog rejected a procedure argument.
    UnsupportedArgument,
    /// The current user may not perform the operation.
    PermissionDenied,
    /// The session was interrupted.
    Interrupted,
    NotFound,
    Internal,
}

impl ErrorKind {
    /// Errors of these kinds invalidate the entire call chain and
    /// become session-wide interrupts.
    pub fn is_session_wide(self) -> bool {
        matches!(self, Self::ResourceExhausted | Self::ConnectivityFailure)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("too many nested stored procedure calls")]
    TooManyNestedCalls,
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    #[error("cannot connect to the stored procedure runtime: {0}")]
    CannotConnect(String),
    #[error("network error while talking to the stored procedure runtime: {0}")]
    Network(String),
    #[error("the session has expired")]
    SessionExpired,
    #[error("{0}")]
    Interrupted(Interrupt),
    #[error("execution stack {0} is not registered with its session")]
    StackNotFound(StackId),
    #[error("query {0} has no materialized result")]
    QueryNotFound(QueryId),
    #[error("query id {0} cannot be used with a cursor")]
    InvalidQueryId(QueryId),
    #[error("cursor index {index} is out of range for a tuple of {len} values")]
    TupleIndex { index: usize, len: usize },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TooManyNestedCalls | Self::OutOfMemory(_) => ErrorKind::ResourceExhausted,
            Self::CannotConnect(_) | Self::Network(_) | Self::SessionExpired => {
                ErrorKind::ConnectivityFailure
            }
            Self::Interrupted(_) => ErrorKind::Interrupted,
            Self::StackNotFound(_) => ErrorKind::ProtocolInvariantViolation,
            Self::QueryNotFound(_) => ErrorKind::NotFound,
            Self::InvalidQueryId(_) | Self::TupleIndex { .. } => ErrorKind::Internal,
        }
    }

    /// Stable numeric error code of this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::Interrupted(interrupt) => interrupt.reason.code(),
            other => match other.interrupt_reason() {
                Some(reason) => reason.code(),
                None => -1, // Generic failure.
            },
        }
    }

    /// Map this error into the session interrupt it implies, if any.
    pub fn interrupt_reason(&self) -> Option<InterruptReason> {
        match self {
            Self::TooManyNestedCalls => Some(InterruptReason::TooManyNestedCalls),
            Self::OutOfMemory(_) => Some(InterruptReason::OutOfMemory),
            Self::CannotConnect(_) => Some(InterruptReason::CannotConnect),
            Self::Network(_) => Some(InterruptReason::NetworkError),
            Self::SessionExpired => Some(InterruptReason::SessionExpired),
            Self::Interrupted(interrupt) => Some(interrupt.reason),
            _ => None,
        }
    }

    /// Message argument which accompanies the interrupt of this error.
    pub(crate) fn interrupt_message(&self) -> &str {
        match self {
            Self::OutOfMemory(msg) | Self::CannotConnect(msg) | Self::Network(msg) => msg,
            Self::Interrupted(interrupt) => &interrupt.message,
            _ => "",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Network(err.to_string())
    }
}
