//! # Error Types
//!
//! Error handling for the RPC wire protocol and dispatch engine.
//!
//! Each component reports its own error enum, and all of them convert into the
//! crate-wide [`ProtocolError`] through `#[from]`, so `?` works across layers.
//!
//! ## Error Categories
//! - **Decode errors**: exhausted buffers, bad length prefixes, invalid UTF-8,
//!   unknown type tags, unsupported format versions. Fatal to one message only.
//! - **Encode errors**: a value that does not match the requested wire type.
//! - **Lookup errors**: unknown module id or unknown method within a module.
//! - **Argument errors**: count or type mismatch on the send path. Raised before
//!   any bytes are produced.
//! - **Transport errors**: oversized messages, failed sends, unknown peers.
//!   Reported per target.
//! - **Invocation errors**: a handler returned an error or panicked. Reported per
//!   handler, never stops sibling handlers.
//! - **Local delivery errors**: a call to the local participant that matched no
//!   handler, or whose handlers failed. Carries the per-handler errors.
//!
//! None of these terminate the host process.
//!
//! ## Example Usage
//! ```rust
//! use mycelium_rpc::error::{DecodeError, ProtocolError, Result};
//!
//! fn first_byte(data: &[u8]) -> Result<u8> {
//!     data.first().copied().ok_or_else(|| {
//!         ProtocolError::Decode(DecodeError::Exhausted {
//!             expected: "byte",
//!             needed: 1,
//!             remaining: 0,
//!         })
//!     })
//! }
//!
//! assert!(first_byte(&[]).is_err());
//! ```

use crate::core::types::{PeerId, WireType};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Transport errors
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
    pub const ERR_INBOX_CLOSED: &str = "Peer inbox closed";

    /// Invocation errors
    pub const ERR_HANDLER_PANICKED: &str = "Handler panicked";
}

/// Failure while reading a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Could not read value of type '{expected}': needed {needed} bytes, {remaining} remaining")]
    Exhausted {
        expected: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("Invalid length prefix {length} for value of type '{expected}' ({remaining} bytes remaining)")]
    InvalidLength {
        expected: &'static str,
        length: i32,
        remaining: usize,
    },

    #[error("Invalid UTF-8 in value of type '{expected}'")]
    InvalidUtf8 { expected: &'static str },

    #[error("Unsupported type tag: {0}")]
    UnsupportedType(u8),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),
}

/// Failure while writing a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Could not write value of type '{actual}' as '{expected}'")]
    TypeMismatch { expected: WireType, actual: WireType },

    #[error("Value of type '{expected}' is too long to encode: {length} elements")]
    LengthOverflow {
        expected: &'static str,
        length: usize,
    },
}

/// Registry lookup failure. Distinguishes an unknown module from an unknown
/// method inside a known module.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("The module id {module_id} was not found (loaded modules: {loaded:?})")]
    UnknownModule { module_id: u32, loaded: Vec<u32> },

    #[error("The method ({module_id}: {method}) was not found")]
    UnknownMethod { module_id: u32, method: String },
}

/// Failure reported by, or on the way to, a transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Size of message ({size} bytes) is greater than the max allowed size ({max})")]
    Oversized { size: usize, max: usize },

    #[error("Error sending message to peer {target}: {reason}")]
    SendFailed { target: PeerId, reason: String },

    #[error("Peer {0} is not reachable in this session")]
    UnknownPeer(PeerId),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// Key-value synchronization failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Data key {0} is already defined")]
    DuplicateKey(String),

    #[error("Error setting data for key {0}")]
    Rejected(String),

    #[error("Could not parse data [{key}, {value}] as {target}")]
    Parse {
        key: String,
        value: String,
        target: &'static str,
    },
}

/// A handler asked for an argument that is missing or of another type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Argument {index} is not a '{expected}' (found {found})")]
pub struct ArgumentError {
    pub index: usize,
    pub expected: WireType,
    pub found: String,
}

/// Error type returned by handler bodies.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("RPC call {module_id}: {method} has an invalid number of parameters (it has {actual}, but it should have {expected})")]
    ArgumentCountMismatch {
        module_id: u32,
        method: String,
        expected: usize,
        actual: usize,
    },

    #[error("RPC call {module_id}: {method} has a mismatched parameter type ({actual} should be {expected}) for {param}")]
    ArgumentTypeMismatch {
        module_id: u32,
        method: String,
        param: String,
        index: usize,
        expected: WireType,
        actual: WireType,
    },

    #[error("Error executing RPC {module_id}: {method} from {sender}: {source}")]
    Invocation {
        module_id: u32,
        method: String,
        sender: PeerId,
        #[source]
        source: HandlerError,
    },

    #[error("No handler for {module_id}: {method} with mask {mask}")]
    NoMatchingHandler {
        module_id: u32,
        method: String,
        mask: i32,
    },

    #[error("{} of {matched} handlers for {module_id}: {method} failed", failures.len())]
    HandlersFailed {
        module_id: u32,
        method: String,
        matched: usize,
        failures: Vec<ProtocolError>,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
