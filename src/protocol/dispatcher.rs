//! RPC dispatch engine.
//!
//! [`Dispatcher`] is the one context object a session owns: handler registry,
//! transport, cached member list, key-value sync state and metrics. It is
//! driven from a single thread; setup mutates it through `&mut self`, the
//! receive path only needs `&self`.
//!
//! ## Send Path
//! 1. Look up the first descriptor for `(module id, method)`
//! 2. Check argument count, then each argument's type, before encoding anything
//! 3. Encode the header and arguments
//! 4. Per target: reject oversized buffers, deliver locally when the target
//!    is the local participant, otherwise hand the buffer to the transport
//!
//! ## Receive Path
//! 1. Decode the header and check the version
//! 2. Look up every descriptor for the key
//! 3. For each descriptor whose mask equals the message mask, decode the
//!    arguments from the start of the payload and invoke the handler
//!
//! A failing handler, returned error or panic, is logged and recorded in the
//! [`DispatchReport`]; the remaining handlers still run.

use crate::config::{SessionConfig, DEFAULT_MASK};
use crate::core::message::{Message, MessageHeader, MessageWriter};
use crate::core::types::{PeerId, Value};
use crate::error::constants::ERR_HANDLER_PANICKED;
use crate::error::{HandlerError, LookupError, ProtocolError, Result, TransportError};
use crate::protocol::registry::{
    CallArgs, CallInfo, HandlerDescriptor, HandlerRegistry, NetworkObject,
};
use crate::sync::KeyValueSync;
use crate::transport::{ReceivedMessage, Reliability, Transport};
use crate::utils::metrics::Metrics;
use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Outcome of dispatching one received message
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub module_id: u32,
    pub method: String,
    pub mask: i32,
    /// Descriptors whose mask matched
    pub matched: usize,
    /// Handlers that ran to completion
    pub invoked: usize,
    /// Per-handler decode or invocation failures
    pub failures: Vec<ProtocolError>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fails when nothing matched or any matching handler failed
    pub fn into_result(self) -> Result<Self> {
        if self.matched == 0 {
            return Err(ProtocolError::NoMatchingHandler {
                module_id: self.module_id,
                method: self.method,
                mask: self.mask,
            });
        }
        if !self.failures.is_empty() {
            return Err(ProtocolError::HandlersFailed {
                module_id: self.module_id,
                method: self.method,
                matched: self.matched,
                failures: self.failures,
            });
        }
        Ok(self)
    }
}

/// Outcome of a fan-out send. Each member is attempted independently.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: Vec<PeerId>,
    pub failed: Vec<(PeerId, ProtocolError)>,
}

impl BroadcastReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of one [`Dispatcher::poll`] step
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    /// Buffers taken off the transport
    pub received: usize,
    /// Buffers ignored before decoding
    pub dropped: usize,
    /// Buffers whose header and lookup succeeded
    pub dispatched: usize,
    /// Buffers rejected at header decode or lookup
    pub rejected: usize,
    /// Handler failures across all dispatched buffers
    pub handler_failures: usize,
}

/// Where a message came from, for log lines
struct Origin {
    sender: PeerId,
    local: bool,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.local {
            write!(f, "local loopback")
        } else {
            write!(f, "{}", self.sender)
        }
    }
}

/// Session-scoped RPC context
pub struct Dispatcher<T: Transport> {
    registry: HandlerRegistry,
    transport: T,
    config: SessionConfig,
    members: Vec<PeerId>,
    key_sync: KeyValueSync,
    metrics: Metrics,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, SessionConfig::default())
    }

    pub fn with_config(transport: T, config: SessionConfig) -> Self {
        let members = transport.current_session_members();
        Self {
            registry: HandlerRegistry::new(),
            transport,
            config,
            members,
            key_sync: KeyValueSync::new(),
            metrics: Metrics::new(),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.registry
    }

    pub fn register(&mut self, descriptor: HandlerDescriptor) {
        self.registry.register(descriptor);
    }

    pub fn register_object<O: NetworkObject>(&mut self, object: Arc<O>, module_id: u32, mask: i32) -> usize {
        self.registry.register_object(object, module_id, mask)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn key_sync(&self) -> &KeyValueSync {
        &self.key_sync
    }

    pub fn key_sync_mut(&mut self) -> &mut KeyValueSync {
        &mut self.key_sync
    }

    pub fn local_id(&self) -> PeerId {
        self.transport.local_id()
    }

    /// Cached member list, as of the last refresh
    pub fn members(&self) -> &[PeerId] {
        &self.members
    }

    /// Re-read the member list from the transport
    pub fn refresh_members(&mut self) {
        self.members = self.transport.current_session_members();
        debug!(count = self.members.len(), "Session members refreshed");
    }

    /// Clear per-session state after leaving. Registered handlers stay.
    pub fn on_session_left(&mut self) {
        self.members.clear();
        self.key_sync.reset();
        debug!("Session state cleared");
    }

    /// Validate `args` against the first registered descriptor and encode a
    /// message. Nothing is encoded unless every argument checks out.
    pub fn encode_call(&self, module_id: u32, method: &str, mask: i32, args: &[Value]) -> Result<Bytes> {
        let descriptor = self.lookup(module_id, method)?.first().ok_or_else(|| {
            LookupError::UnknownMethod {
                module_id,
                method: method.to_owned(),
            }
        })?;

        let expected = descriptor.expected_args();
        if args.len() != expected {
            let err = ProtocolError::ArgumentCountMismatch {
                module_id,
                method: method.to_owned(),
                expected,
                actual: args.len(),
            };
            error!(error = %err, "Rejected RPC call");
            return Err(err);
        }

        for (index, (param, arg)) in descriptor.params().iter().zip(args).enumerate() {
            if arg.wire_type() != param.ty {
                let err = ProtocolError::ArgumentTypeMismatch {
                    module_id,
                    method: method.to_owned(),
                    param: param.name.clone(),
                    index,
                    expected: param.ty,
                    actual: arg.wire_type(),
                };
                error!(error = %err, "Rejected RPC call");
                return Err(err);
            }
        }

        let mut writer = MessageWriter::new(&MessageHeader::new(module_id, method, mask))?;
        for (param, arg) in descriptor.params().iter().zip(args) {
            writer.write_value(param.ty, arg)?;
        }
        Ok(writer.finish())
    }

    /// Call `method` on one peer with the default mask
    pub fn send_to(
        &mut self,
        module_id: u32,
        method: &str,
        target: PeerId,
        reliability: Reliability,
        args: &[Value],
    ) -> Result<()> {
        self.send_to_masked(module_id, method, target, reliability, DEFAULT_MASK, args)
    }

    pub fn send_to_masked(
        &mut self,
        module_id: u32,
        method: &str,
        target: PeerId,
        reliability: Reliability,
        mask: i32,
        args: &[Value],
    ) -> Result<()> {
        let bytes = self.encode_call(module_id, method, mask, args)?;
        self.send_bytes(&bytes, target, reliability)
    }

    /// Call `method` on every cached member with the default mask
    pub fn broadcast(
        &mut self,
        module_id: u32,
        method: &str,
        reliability: Reliability,
        args: &[Value],
    ) -> Result<BroadcastReport> {
        self.broadcast_masked(module_id, method, reliability, DEFAULT_MASK, args)
    }

    /// Encode once and send to every cached member, local participant
    /// included. A failure for one member does not stop the others.
    pub fn broadcast_masked(
        &mut self,
        module_id: u32,
        method: &str,
        reliability: Reliability,
        mask: i32,
        args: &[Value],
    ) -> Result<BroadcastReport> {
        let bytes = self.encode_call(module_id, method, mask, args)?;

        let targets = self.members.clone();
        if targets.is_empty() {
            debug!(module_id, method, "Broadcast with no session members");
        }

        let mut report = BroadcastReport::default();
        for target in targets {
            match self.send_bytes(&bytes, target, reliability) {
                Ok(()) => report.delivered.push(target),
                Err(e) => report.failed.push((target, e)),
            }
        }
        Ok(report)
    }

    /// Deliver an encoded message to one target.
    ///
    /// A local target is served in-process; the call fails unless at least
    /// one handler matched and every matching handler succeeded.
    pub fn send_bytes(&mut self, bytes: &Bytes, target: PeerId, reliability: Reliability) -> Result<()> {
        let max = self.transport.max_message_size();
        if bytes.len() > max {
            self.metrics.oversized_message();
            let err = TransportError::Oversized {
                size: bytes.len(),
                max,
            };
            error!(target = %target, error = %err, "Message not sent");
            return Err(err.into());
        }

        if target == self.local_id() {
            self.metrics.loopback_delivery();
            self.handle_message(bytes.clone(), target)?.into_result()?;
            return Ok(());
        }

        match self
            .transport
            .send(bytes, target, reliability, self.config.channel)
        {
            Ok(()) => {
                self.metrics.message_sent(bytes.len() as u64);
                trace!(target = %target, size = bytes.len(), "Message sent");
                Ok(())
            }
            Err(e) => {
                self.metrics.transport_error();
                error!(target = %target, error = %e, "Error sending message to user");
                Err(e.into())
            }
        }
    }

    /// Decode one received buffer and invoke every handler whose mask matches.
    ///
    /// Header and lookup failures reject the whole message. Handler failures
    /// are collected in the report.
    pub fn handle_message(&self, bytes: impl Into<Bytes>, sender: PeerId) -> Result<DispatchReport> {
        let bytes = bytes.into();
        let origin = Origin {
            sender,
            local: sender == self.local_id(),
        };
        self.metrics.message_received(bytes.len() as u64);

        let message = Message::from_bytes(bytes).map_err(|e| {
            self.metrics.decode_error();
            warn!(sender = %origin, error = %e, "Dropping message with unreadable header");
            e
        })?;
        let header = message.header();

        let handlers = self.registry.lookup(header.module_id, &header.method).map_err(|e| {
            self.metrics.lookup_error();
            error!(
                sender = %origin,
                destination = %header.destination(),
                error = %e,
                "Error executing RPC"
            );
            e
        })?;

        let mut report = DispatchReport {
            module_id: header.module_id,
            method: header.method.clone(),
            mask: header.mask,
            ..DispatchReport::default()
        };
        for descriptor in handlers.iter().filter(|d| d.mask() == header.mask) {
            report.matched += 1;
            match self.invoke(descriptor, &message, sender) {
                Ok(()) => {
                    self.metrics.handler_invoked();
                    report.invoked += 1;
                }
                Err(e) => {
                    error!(
                        module_id = header.module_id,
                        method = %header.method,
                        sender = %origin,
                        error = %e,
                        "Error executing RPC"
                    );
                    report.failures.push(e);
                }
            }
        }

        if report.matched == 0 {
            debug!(
                destination = %header.destination(),
                mask = header.mask,
                "No handler registered for mask"
            );
        }
        Ok(report)
    }

    /// Drain one batch from the transport and dispatch it
    pub fn poll(&mut self) -> PollReport {
        self.refresh_members();
        let pending = self
            .transport
            .receive_pending(self.config.channel, self.config.max_receive_batch);
        let max = self.transport.max_message_size();

        let mut report = PollReport::default();
        for ReceivedMessage { bytes, sender } in pending {
            report.received += 1;

            if bytes.len() > max {
                self.metrics.oversized_message();
                error!(
                    sender = %sender,
                    "Ignored message because its size was above the max ({}/{})",
                    bytes.len(),
                    max
                );
                report.dropped += 1;
                continue;
            }

            if self.config.drop_non_members && !self.members.contains(&sender) {
                self.metrics.dropped_message();
                warn!(sender = %sender, "Ignored message from peer outside the session");
                report.dropped += 1;
                continue;
            }

            match self.handle_message(bytes, sender) {
                Ok(dispatch) => {
                    report.dispatched += 1;
                    report.handler_failures += dispatch.failures.len();
                }
                Err(_) => report.rejected += 1,
            }
        }

        if report.received > 0 {
            trace!(?report, "Poll step complete");
        }
        report
    }

    fn lookup(&self, module_id: u32, method: &str) -> Result<&[HandlerDescriptor]> {
        self.registry.lookup(module_id, method).map_err(|e| {
            self.metrics.lookup_error();
            error!(error = %e, "Rejected RPC call");
            e.into()
        })
    }

    /// Decode arguments for one descriptor and run it with panics contained
    fn invoke(&self, descriptor: &HandlerDescriptor, message: &Message, sender: PeerId) -> Result<()> {
        let mut reader = message.reader();
        let mut values = Vec::with_capacity(descriptor.params().len());
        for param in descriptor.params() {
            let value = reader.read_value(param.ty).map_err(|e| {
                self.metrics.decode_error();
                e
            })?;
            values.push(value);
        }
        if reader.remaining() > 0 {
            trace!(
                trailing = reader.remaining(),
                method = descriptor.method(),
                "Unread payload bytes"
            );
        }

        let info = descriptor.takes_info().then_some(CallInfo { sender });
        let args = CallArgs::new(values, info);

        let source: HandlerError = match panic::catch_unwind(AssertUnwindSafe(|| descriptor.invoke(&args))) {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e,
            Err(payload) => panic_message(payload).into(),
        };

        self.metrics.invocation_error();
        Err(ProtocolError::Invocation {
            module_id: descriptor.module_id(),
            method: descriptor.method().to_owned(),
            sender,
            source,
        })
    }
}

impl<T: Transport> fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("local_id", &self.local_id())
            .field("config", &self.config)
            .field("members", &self.members)
            .field("handlers", &self.registry.len())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("{ERR_HANDLER_PANICKED}: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("{ERR_HANDLER_PANICKED}: {msg}")
    } else {
        ERR_HANDLER_PANICKED.to_string()
    }
}
