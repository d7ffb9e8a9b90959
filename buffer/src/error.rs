use std::io;

/// Result type used throughout the connection and framing layers.
pub type NetworkResult<T> = Result<T, NetworkError>;

/// `Wait` signals a non-fatal would-block condition that should be retried on the
/// next readiness event; `Fatal` tears the connection down.
#[derive(Debug, Eq, PartialEq)]
pub enum NetworkError {
    Wait,
    Fatal(ErrorType),
}

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum ErrorType {
    /// A command failed to parse, or carried an unrecognised argument layout.
    Protocol,
    /// A declared payload length would overflow the read buffer.
    OversizedFrame,
    /// A write attempted to commit more bytes than the buffer has free capacity.
    BufferOverrun,
    /// The WebSocket handshake or frame stream violated the subset this crate understands.
    WebSocketViolation,
    /// `RECONNECT` named a player id the registry does not know.
    UnknownPlayer,
    Io(io::ErrorKind),
}

impl From<io::Error> for NetworkError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => NetworkError::Wait,
            kind => NetworkError::Fatal(ErrorType::Io(kind)),
        }
    }
}

/// Lets call sites treat `Wait` as "nothing happened yet" without a nested
/// match on every call.
pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for NetworkResult<T> {
    fn has_failed(&self) -> bool {
        match self {
            Ok(_) => false,
            Err(NetworkError::Wait) => false,
            _ => true,
        }
    }
}
