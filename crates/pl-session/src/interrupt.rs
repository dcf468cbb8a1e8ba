/// InterruptReason is the cause of a session-wide interrupt.
/// Discriminants are the stable error codes reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum InterruptReason {
    Interrupted = -111,
    TooManyNestedCalls = -1146,
    ServerShutdown = -1153,
    RuntimeNotRunning = -1160,
    SessionExpired = -1197,
    CannotConnect = -1161,
    NetworkError = -1162,
    OutOfMemory = -2,
}

impl InterruptReason {
    pub const ALL: [Self; 8] = [
        Self::Interrupted,
        Self::TooManyNestedCalls,
        Self::ServerShutdown,
        Self::RuntimeNotRunning,
        Self::SessionExpired,
        Self::CannotConnect,
        Self::NetworkError,
        Self::OutOfMemory,
    ];

    /// Map an error code into its InterruptReason.
    /// Codes which are not interrupt reasons map to None.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.code() == code)
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    /// Reasons of the one-argument shape carry a message.
    /// All others discard any message they're given.
    pub fn carries_message(self) -> bool {
        matches!(
            self,
            Self::CannotConnect | Self::NetworkError | Self::OutOfMemory
        )
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Interrupted => "execution was interrupted",
            Self::TooManyNestedCalls => "too many nested stored procedure calls",
            Self::ServerShutdown => "the server is shutting down",
            Self::RuntimeNotRunning => "the stored procedure runtime is not running",
            Self::SessionExpired => "the session has expired",
            Self::CannotConnect => "cannot connect to the stored procedure runtime",
            Self::NetworkError => "network error while talking to the stored procedure runtime",
            Self::OutOfMemory => "out of memory",
        }
    }
}

impl std::fmt::Display for InterruptReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Interrupt is a recorded interrupt reason and its (possibly empty) message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interrupt {
    pub reason: InterruptReason,
    pub message: String,
}

impl std::fmt::Display for Interrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.reason)
        } else {
            write!(f, "{}: {}", self.reason, self.message)
        }
    }
}

/// InterruptState is the sticky, first-wins interrupt state of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InterruptState {
    #[default]
    Clear,
    Interrupted(Interrupt),
}

impl InterruptState {
    /// Transition into Interrupted if currently Clear.
    /// Returns true if this call caused the transition.
    pub fn set(&mut self, reason: InterruptReason, message: &str) -> bool {
        if let Self::Interrupted(_) = self {
            return false; // Do not overwrite the first interrupt.
        }
        let message = if reason.carries_message() {
            message.to_string()
        } else {
            String::new()
        };
        *self = Self::Interrupted(Interrupt { reason, message });
        true
    }

    pub fn clear(&mut self) {
        *self = Self::Clear;
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }

    pub fn get(&self) -> Option<&Interrupt> {
        match self {
            Self::Clear => None,
            Self::Interrupted(interrupt) => Some(interrupt),
        }
    }
}
