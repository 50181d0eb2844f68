//! In-process transport.
//!
//! [`MemoryNetwork`] is a hub that any number of [`MemoryTransport`] endpoints
//! join. Each endpoint owns an unbounded inbox; sends push straight into the
//! target's inbox, so every reliability class behaves as reliable and ordered.
//! Messages for channels nobody is polling are held back, up to
//! [`MAX_STASHED_MESSAGES`]; past that the oldest are dropped.
//!
//! ```rust
//! use mycelium_rpc::core::types::PeerId;
//! use mycelium_rpc::transport::memory::MemoryNetwork;
//! use mycelium_rpc::transport::{Reliability, Transport};
//!
//! let network = MemoryNetwork::new();
//! let mut alice = network.join(PeerId(1));
//! let mut bob = network.join(PeerId(2));
//!
//! alice
//!     .send(&bytes::Bytes::from_static(b"hi"), PeerId(2), Reliability::Reliable, 120)
//!     .unwrap();
//! let received = bob.receive_pending(120, 10);
//! assert_eq!(received[0].sender, PeerId(1));
//! ```

use crate::config::{TransportConfig, MAX_MESSAGE_SIZE};
use crate::core::types::PeerId;
use crate::error::{constants, TransportError};
use crate::transport::{ReceivedMessage, Reliability, Transport};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Off-channel messages kept per endpoint before the oldest are dropped
pub const MAX_STASHED_MESSAGES: usize = 1024;

#[derive(Debug)]
struct Envelope {
    bytes: Bytes,
    sender: PeerId,
    channel: u32,
}

#[derive(Debug, Default)]
struct HubState {
    members: Vec<PeerId>,
    inboxes: HashMap<PeerId, mpsc::UnboundedSender<Envelope>>,
}

/// Shared hub connecting in-process endpoints
#[derive(Debug, Clone)]
pub struct MemoryNetwork {
    state: Arc<Mutex<HubState>>,
    max_message_size: usize,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::with_max_message_size(MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState::default())),
            max_message_size,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::with_max_message_size(config.max_message_size)
    }

    /// Add a member and hand back its endpoint. Joining again replaces the
    /// previous inbox.
    pub fn join(&self, id: PeerId) -> MemoryTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.state.lock() {
            Ok(mut state) => {
                if !state.members.contains(&id) {
                    state.members.push(id);
                }
                state.inboxes.insert(id, tx);
            }
            Err(_) => warn!(peer = %id, "{}", constants::ERR_LOCK_POISONED),
        }
        debug!(peer = %id, "Joined memory network");

        MemoryTransport {
            id,
            network: self.clone(),
            inbox: rx,
            stash: VecDeque::new(),
        }
    }

    /// Remove a member and its inbox
    pub fn leave(&self, id: PeerId) {
        if let Ok(mut state) = self.state.lock() {
            state.members.retain(|m| *m != id);
            state.inboxes.remove(&id);
        }
        debug!(peer = %id, "Left memory network");
    }

    /// Keep `id` in the member list but make it unreachable
    pub fn sever(&self, id: PeerId) {
        if let Ok(mut state) = self.state.lock() {
            state.inboxes.remove(&id);
        }
    }

    pub fn members(&self) -> Vec<PeerId> {
        match self.state.lock() {
            Ok(state) => state.members.clone(),
            Err(_) => {
                warn!("{}", constants::ERR_LOCK_POISONED);
                Vec::new()
            }
        }
    }

    fn deliver(&self, envelope: Envelope, target: PeerId) -> Result<(), TransportError> {
        let state = self
            .state
            .lock()
            .map_err(|_| TransportError::Unavailable(constants::ERR_LOCK_POISONED.to_string()))?;

        let inbox = state
            .inboxes
            .get(&target)
            .ok_or(TransportError::UnknownPeer(target))?;

        inbox.send(envelope).map_err(|_| TransportError::SendFailed {
            target,
            reason: constants::ERR_INBOX_CLOSED.to_string(),
        })
    }
}

/// One participant's endpoint on a [`MemoryNetwork`]
#[derive(Debug)]
pub struct MemoryTransport {
    id: PeerId,
    network: MemoryNetwork,
    inbox: mpsc::UnboundedReceiver<Envelope>,
    // Messages drained while polling another channel
    stash: VecDeque<Envelope>,
}

impl MemoryTransport {
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }

    fn stash_envelope(&mut self, envelope: Envelope) {
        if self.stash.len() >= MAX_STASHED_MESSAGES {
            if let Some(dropped) = self.stash.pop_front() {
                debug!(
                    peer = %self.id,
                    sender = %dropped.sender,
                    channel = dropped.channel,
                    "Stash full, dropping oldest message"
                );
            }
        }
        self.stash.push_back(envelope);
    }
}

impl Transport for MemoryTransport {
    fn local_id(&self) -> PeerId {
        self.id
    }

    fn max_message_size(&self) -> usize {
        self.network.max_message_size
    }

    fn send(
        &mut self,
        bytes: &Bytes,
        target: PeerId,
        _reliability: Reliability,
        channel: u32,
    ) -> Result<(), TransportError> {
        if bytes.len() > self.network.max_message_size {
            return Err(TransportError::Oversized {
                size: bytes.len(),
                max: self.network.max_message_size,
            });
        }

        let envelope = Envelope {
            bytes: bytes.clone(),
            sender: self.id,
            channel,
        };
        self.network.deliver(envelope, target)
    }

    fn receive_pending(&mut self, channel: u32, max_count: usize) -> Vec<ReceivedMessage> {
        let mut out = Vec::new();

        let mut kept = VecDeque::with_capacity(self.stash.len());
        while let Some(envelope) = self.stash.pop_front() {
            if out.len() < max_count && envelope.channel == channel {
                out.push(ReceivedMessage {
                    bytes: envelope.bytes,
                    sender: envelope.sender,
                });
            } else {
                kept.push_back(envelope);
            }
        }
        self.stash = kept;

        while out.len() < max_count {
            match self.inbox.try_recv() {
                Ok(envelope) if envelope.channel == channel => out.push(ReceivedMessage {
                    bytes: envelope.bytes,
                    sender: envelope.sender,
                }),
                Ok(envelope) => self.stash_envelope(envelope),
                Err(_) => break,
            }
        }

        out
    }

    fn current_session_members(&self) -> Vec<PeerId> {
        self.network.members()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn test_send_and_receive() {
        let network = MemoryNetwork::new();
        let mut a = network.join(PeerId(1));
        let mut b = network.join(PeerId(2));

        a.send(&Bytes::from_static(b"one"), PeerId(2), Reliability::Reliable, 120)
            .unwrap();
        a.send(&Bytes::from_static(b"two"), PeerId(2), Reliability::Unreliable, 120)
            .unwrap();

        let received = b.receive_pending(120, 10);
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].bytes, Bytes::from_static(b"one"));
        assert_eq!(received[1].sender, PeerId(1));
        assert!(b.receive_pending(120, 10).is_empty());
    }

    #[test]
    fn test_receive_respects_max_count() {
        let network = MemoryNetwork::new();
        let mut a = network.join(PeerId(1));
        let mut b = network.join(PeerId(2));

        for _ in 0..5 {
            a.send(&Bytes::from_static(b"x"), PeerId(2), Reliability::Reliable, 1)
                .unwrap();
        }

        assert_eq!(b.receive_pending(1, 3).len(), 3);
        assert_eq!(b.receive_pending(1, 3).len(), 2);
    }

    #[test]
    fn test_other_channels_are_kept() {
        let network = MemoryNetwork::new();
        let mut a = network.join(PeerId(1));
        let mut b = network.join(PeerId(2));

        a.send(&Bytes::from_static(b"other"), PeerId(2), Reliability::Reliable, 7)
            .unwrap();
        a.send(&Bytes::from_static(b"rpc"), PeerId(2), Reliability::Reliable, 120)
            .unwrap();

        let rpc = b.receive_pending(120, 10);
        assert_eq!(rpc.len(), 1);
        assert_eq!(rpc[0].bytes, Bytes::from_static(b"rpc"));

        let other = b.receive_pending(7, 10);
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].bytes, Bytes::from_static(b"other"));
    }

    #[test]
    fn test_stash_keeps_newest_messages() {
        let network = MemoryNetwork::new();
        let mut a = network.join(PeerId(1));
        let mut b = network.join(PeerId(2));

        let total = MAX_STASHED_MESSAGES + 76;
        for i in 0..total as u32 {
            a.send(
                &Bytes::copy_from_slice(&i.to_le_bytes()),
                PeerId(2),
                Reliability::Reliable,
                7,
            )
            .unwrap();
        }

        // Nothing on 120, so every drained message goes to the stash
        assert!(b.receive_pending(120, total).is_empty());
        assert_eq!(b.stash.len(), MAX_STASHED_MESSAGES);

        let kept = b.receive_pending(7, total);
        assert_eq!(kept.len(), MAX_STASHED_MESSAGES);
        let first = u32::from_le_bytes(kept[0].bytes[..].try_into().unwrap());
        let last = u32::from_le_bytes(kept[kept.len() - 1].bytes[..].try_into().unwrap());
        assert_eq!(first, 76);
        assert_eq!(last, total as u32 - 1);
    }

    #[test]
    fn test_unknown_and_severed_peers() {
        let network = MemoryNetwork::new();
        let mut a = network.join(PeerId(1));
        let _b = network.join(PeerId(2));

        let err = a
            .send(&Bytes::from_static(b"x"), PeerId(9), Reliability::Reliable, 1)
            .unwrap_err();
        assert_eq!(err, TransportError::UnknownPeer(PeerId(9)));

        network.sever(PeerId(2));
        assert!(network.members().contains(&PeerId(2)));
        assert!(a
            .send(&Bytes::from_static(b"x"), PeerId(2), Reliability::Reliable, 1)
            .is_err());
    }

    #[test]
    fn test_oversized_send_rejected() {
        let network = MemoryNetwork::with_max_message_size(4);
        let mut a = network.join(PeerId(1));
        let _b = network.join(PeerId(2));

        let err = a
            .send(&Bytes::from_static(b"12345"), PeerId(2), Reliability::Reliable, 1)
            .unwrap_err();
        assert_eq!(err, TransportError::Oversized { size: 5, max: 4 });
    }

    #[test]
    fn test_membership() {
        let network = MemoryNetwork::new();
        let a = network.join(PeerId(1));
        let _b = network.join(PeerId(2));
        assert_eq!(a.current_session_members(), vec![PeerId(1), PeerId(2)]);

        network.leave(PeerId(2));
        assert_eq!(a.current_session_members(), vec![PeerId(1)]);
    }
}
