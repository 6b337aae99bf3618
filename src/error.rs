//! Typed errors at the module seams that face the outside world. Internal
//! hot-path helpers (DVA-copy retries, per-dnode decode) keep returning
//! `Option`/sentinel values as the rest of the crate does; see SPEC_FULL.md
//! section 10 for why that split is intentional rather than an oversight.

use std::fmt;

#[derive(Debug)]
pub enum TransportError {
    /// No entry for this logical device name and no such path either.
    UnknownDevice(String),
    /// The backing file/socket didn't have `count` bytes left to give.
    ShortRead { requested: usize, got: usize },
    Io(std::io::Error),
    /// The network backend's frame header didn't parse, or an `'e'` frame
    /// was received.
    Protocol(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::UnknownDevice(name) => write!(f, "unknown device '{name}'"),
            TransportError::ShortRead { requested, got } => {
                write!(f, "short read: requested {requested} bytes, got {got}")
            }
            TransportError::Io(e) => write!(f, "I/O error: {e}"),
            TransportError::Protocol(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e)
    }
}

#[derive(Debug)]
pub enum DriverError {
    /// No label on the seed disk parsed as a valid nvlist + uberblock array.
    NoValidLabel,
    /// Every uberblock slot failed its magic check, or none had a usable
    /// root block pointer.
    NoActiveUberblock,
    /// The pool geometry uses a feature this reader refuses to touch.
    UnsupportedGeometry(&'static str),
    /// The meta-object-set, or a structure reachable only through it, could
    /// not be read from any of its DVA copies.
    UnreachableMos,
    Transport(TransportError),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::NoValidLabel => write!(f, "no valid label found on seed disk"),
            DriverError::NoActiveUberblock => write!(f, "no active uberblock found"),
            DriverError::UnsupportedGeometry(what) => {
                write!(f, "unsupported pool geometry: {what}")
            }
            DriverError::UnreachableMos => write!(f, "meta-object-set is unreachable"),
            DriverError::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for DriverError {}

impl From<TransportError> for DriverError {
    fn from(e: TransportError) -> Self {
        DriverError::Transport(e)
    }
}
