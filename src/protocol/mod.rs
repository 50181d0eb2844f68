//! # RPC Protocol
//!
//! Handler registration and message dispatch.
//!
//! ## Components
//! - **Registry**: `(module id, method)` to ordered handler descriptors
//! - **Dispatcher**: session context driving the send and receive paths
//!
//! ## Routing
//! A message reaches every descriptor registered under its module id and
//! method whose mask equals the message mask, in registration order.

pub mod dispatcher;
pub mod registry;

#[cfg(test)]
mod tests;

pub use dispatcher::{BroadcastReport, DispatchReport, Dispatcher, PollReport};
pub use registry::{
    CallArgs, CallInfo, HandlerDescriptor, HandlerRegistry, HandlerResult, NetworkObject, Param,
    RpcMethod,
};
