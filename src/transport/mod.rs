//! # Transport Layer
//!
//! The contract the dispatch engine needs from its environment.
//!
//! The engine never owns sockets. A host plugs in whatever peer-to-peer
//! messaging layer it has by implementing [`Transport`]; delivery, retries,
//! and any background I/O are the transport's business. All calls are
//! synchronous and must not block for long, since they run on the poll thread.
//!
//! ## Implementations
//! - [`memory::MemoryNetwork`]: in-process hub for tests and local sessions

pub mod memory;

use crate::core::types::PeerId;
use crate::error::TransportError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Delivery guarantee requested for one send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Reliability {
    /// Best effort, may be batched
    Unreliable,
    /// Guaranteed and ordered within the channel
    #[default]
    Reliable,
    /// Best effort, sent immediately or dropped
    UnreliableNoDelay,
}

/// A buffer received from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub bytes: Bytes,
    pub sender: PeerId,
}

/// Peer-to-peer messaging contract
pub trait Transport {
    /// Identity of the local participant
    fn local_id(&self) -> PeerId;

    /// Largest buffer [`Transport::send`] accepts
    fn max_message_size(&self) -> usize;

    /// Send one buffer to one peer
    fn send(
        &mut self,
        bytes: &Bytes,
        target: PeerId,
        reliability: Reliability,
        channel: u32,
    ) -> Result<(), TransportError>;

    /// Drain up to `max_count` buffers waiting on `channel`
    fn receive_pending(&mut self, channel: u32, max_count: usize) -> Vec<ReceivedMessage>;

    /// Current session members, local participant included
    fn current_session_members(&self) -> Vec<PeerId>;
}
