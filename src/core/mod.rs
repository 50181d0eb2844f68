//! # Core Protocol Components
//!
//! Low-level message handling: value types and the binary codec.
//!
//! ## Components
//! - **Types**: the closed set of payload types ([`types::WireType`]) and values
//! - **Message**: header encode/decode, bounds-checked readers, writers
//!
//! ## Wire Format
//! ```text
//! [Version(1)] [ModuleId(4)] [NameLen(4)] [Name(N)] [Mask(4)] [Payload...]
//! ```
//!
//! ## Safety
//! - Every read is bounds-checked; malformed input yields a `DecodeError`
//! - Length prefixes are validated against the remaining buffer before use

pub mod message;
pub mod types;
