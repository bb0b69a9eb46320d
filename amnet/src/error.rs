//! Error types for the active message core.
//!
//! Only caller mistakes that a correct program can recover from are
//! reported through [`Error`]. Violations of the messaging contract
//! itself, such as injecting traffic from handler context, are bugs in
//! the caller and panic instead.

use std::fmt;

/// Recoverable failures reported to the caller.
#[derive(Debug)]
pub enum Error {
    /// An argument was outside its documented domain: a rank that does
    /// not exist, a handler index outside the table range, a payload
    /// larger than the advertised maximum.
    BadArgument(String),
    /// A finite resource was exhausted: no free handler slot, or a full
    /// delivery queue under `IMMEDIATE`.
    Resource(String),
    /// The peer is not in a usable state, typically because its
    /// endpoint was never created or has been dropped.
    NotInitialized(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadArgument(msg) => write!(f, "bad argument: {}", msg),
            Error::Resource(msg) => write!(f, "resource exhausted: {}", msg),
            Error::NotInitialized(msg) => write!(f, "peer not initialized: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
