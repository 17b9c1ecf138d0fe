//! Error types for the bridge.

use crate::registry::HandleKind;
use rxbridge_codec::CodecError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes reported by the native engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Operation succeeded.
    Ok,
    /// SQL text could not be parsed.
    ParseSql,
    /// Query execution failed.
    QueryExec,
    /// Invalid parameters.
    Params,
    /// Logic error inside the engine.
    Logic,
    /// JSON could not be parsed.
    ParseJson,
    /// DSL query could not be parsed.
    ParseDsl,
    /// Conflicting definition or data.
    Conflict,
    /// Binary payload could not be parsed.
    ParseBin,
    /// Operation forbidden.
    Forbidden,
    /// Lock was re-acquired during the operation.
    WasRelock,
    /// Object is not valid.
    NotValid,
    /// Network failure.
    Network,
    /// Object not found.
    NotFound,
    /// Cached state was invalidated.
    StateInvalidated,
    /// Any other code, kept verbatim.
    Other(i32),
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        match code {
            0 => ErrorCode::Ok,
            1 => ErrorCode::ParseSql,
            2 => ErrorCode::QueryExec,
            3 => ErrorCode::Params,
            4 => ErrorCode::Logic,
            5 => ErrorCode::ParseJson,
            6 => ErrorCode::ParseDsl,
            7 => ErrorCode::Conflict,
            8 => ErrorCode::ParseBin,
            9 => ErrorCode::Forbidden,
            10 => ErrorCode::WasRelock,
            11 => ErrorCode::NotValid,
            12 => ErrorCode::Network,
            13 => ErrorCode::NotFound,
            14 => ErrorCode::StateInvalidated,
            other => ErrorCode::Other(other),
        }
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Ok => 0,
            ErrorCode::ParseSql => 1,
            ErrorCode::QueryExec => 2,
            ErrorCode::Params => 3,
            ErrorCode::Logic => 4,
            ErrorCode::ParseJson => 5,
            ErrorCode::ParseDsl => 6,
            ErrorCode::Conflict => 7,
            ErrorCode::ParseBin => 8,
            ErrorCode::Forbidden => 9,
            ErrorCode::WasRelock => 10,
            ErrorCode::NotValid => 11,
            ErrorCode::Network => 12,
            ErrorCode::NotFound => 13,
            ErrorCode::StateInvalidated => 14,
            ErrorCode::Other(other) => other,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", i32::from(*self))
    }
}

/// Errors surfaced by the bridge.
#[derive(Debug, Error)]
pub enum Error {
    /// The native engine reported a failure. Code and message are verbatim.
    #[error("native error (code {code}): {message}")]
    Native {
        /// Engine error code, never [`ErrorCode::Ok`].
        code: ErrorCode,
        /// Engine error message, never empty.
        message: String,
    },

    /// An argument cannot be represented as a native view.
    ///
    /// Unrecoverable for the call that raised it.
    #[error("cannot marshal {what}: {reason}")]
    Marshal {
        /// Which argument failed.
        what: &'static str,
        /// Why it failed.
        reason: String,
    },

    /// A handle was presented after it was released.
    #[error("{kind} handle {handle:#x} is not open")]
    HandleMisuse {
        /// Kind of handle.
        kind: HandleKind,
        /// Raw handle value.
        handle: usize,
    },

    /// The engine returned a null handle where one was required.
    #[error("native engine returned a null {0} handle")]
    NullHandle(HandleKind),

    /// The embedded server did not become ready.
    #[error("embedded server startup failed: {message}")]
    ServerStartup {
        /// Description of the failure.
        message: String,
    },

    /// Invalid configuration or DSN.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Packed encoding error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl Error {
    /// Creates a native error, filling in a message when the engine gave none.
    pub fn native(code: i32, message: Option<String>) -> Self {
        let message = match message {
            Some(m) if !m.is_empty() => m,
            _ => format!("native call failed with code {code}"),
        };
        Error::Native {
            code: ErrorCode::from(code),
            message,
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    /// Native error code, if this error came from the engine.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Native { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true for an engine conflict (duplicate index, conflicting data).
    pub fn is_conflict(&self) -> bool {
        self.code() == Some(ErrorCode::Conflict)
    }

    /// Returns true when the engine invalidated cached state.
    pub fn is_state_invalidated(&self) -> bool {
        self.code() == Some(ErrorCode::StateInvalidated)
    }

    /// Returns true when the engine reported a missing object.
    pub fn is_not_found(&self) -> bool {
        self.code() == Some(ErrorCode::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_conversion() {
        assert_eq!(ErrorCode::from(7), ErrorCode::Conflict);
        assert_eq!(i32::from(ErrorCode::NotFound), 13);
        assert_eq!(ErrorCode::from(99), ErrorCode::Other(99));
        assert_eq!(i32::from(ErrorCode::Other(-5)), -5);
    }

    #[test]
    fn native_message_is_never_empty() {
        let err = Error::native(3, None);
        match &err {
            Error::Native { code, message } => {
                assert_eq!(*code, ErrorCode::Params);
                assert_eq!(message, "native call failed with code 3");
            }
            other => panic!("unexpected {other:?}"),
        }

        let err = Error::native(13, Some(String::new()));
        assert!(err.is_not_found());
        assert!(!err.to_string().ends_with(": "));
    }

    #[test]
    fn classification() {
        assert!(Error::native(7, Some("dup".into())).is_conflict());
        assert!(Error::native(14, Some("stale".into())).is_state_invalidated());
        assert_eq!(Error::config("x").code(), None);
    }
}
