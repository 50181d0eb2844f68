//! # Mycelium RPC
//!
//! Mod-to-mod remote procedure calls over an existing peer-to-peer transport.
//!
//! Modules register named handlers under a numeric module id. A call is a
//! compact little-endian message carrying the module id, method name, a mask
//! and the arguments; the receiving side routes it to every handler whose
//! module, method and mask match.
//!
//! ## Layout
//! - [`core`]: value types and the binary message codec
//! - [`protocol`]: handler registry and the [`Dispatcher`] session context
//! - [`transport`]: the [`Transport`] contract and an in-memory implementation
//! - [`sync`]: change detection for lobby and player key-value data
//! - [`config`]: TOML and environment configuration
//! - [`utils`]: logging setup and metrics
//!
//! ## Example
//! ```rust
//! use mycelium_rpc::protocol::HandlerResult;
//! use mycelium_rpc::{CallArgs, Dispatcher, HandlerDescriptor, PeerId, Reliability, Value, WireType};
//! use mycelium_rpc::transport::memory::MemoryNetwork;
//! use std::sync::{Arc, Mutex};
//!
//! let network = MemoryNetwork::new();
//! let mut alice = Dispatcher::new(network.join(PeerId(1)));
//! let mut bob = Dispatcher::new(network.join(PeerId(2)));
//!
//! let greetings = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&greetings);
//! let greet = move |args: &CallArgs| -> HandlerResult {
//!     sink.lock().unwrap().push(args.get::<String>(0)?);
//!     Ok(())
//! };
//! alice.register(HandlerDescriptor::new(7, "Greet", |_: &CallArgs| Ok(())).param("text", WireType::String));
//! bob.register(HandlerDescriptor::new(7, "Greet", greet).param("text", WireType::String));
//!
//! alice
//!     .send_to(7, "Greet", PeerId(2), Reliability::Reliable, &[Value::from("hello")])
//!     .unwrap();
//! bob.poll();
//!
//! assert_eq!(*greetings.lock().unwrap(), vec!["hello".to_string()]);
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod sync;
pub mod transport;
pub mod utils;

pub use crate::config::NetworkConfig;
pub use crate::core::types::{PeerId, Quaternion, Value, Vector3, WireType};
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::{
    CallArgs, CallInfo, Dispatcher, HandlerDescriptor, HandlerRegistry, NetworkObject, RpcMethod,
};
pub use crate::transport::{Reliability, Transport};
