// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::config::SessionConfig;
use crate::core::message::{MessageHeader, MessageWriter};
use crate::core::types::{PeerId, Value, WireType};
use crate::error::{DecodeError, LookupError, ProtocolError, TransportError};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::registry::{CallArgs, HandlerDescriptor, HandlerResult};
use crate::transport::{ReceivedMessage, Reliability, Transport};
use bytes::Bytes;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

const LOCAL: PeerId = PeerId(1);

/// Transport double that records every send and serves a scripted inbox
struct RecordingTransport {
    local: PeerId,
    members: Vec<PeerId>,
    max_message_size: usize,
    failing: HashSet<PeerId>,
    sent: Vec<(PeerId, Bytes, Reliability, u32)>,
    inbox: VecDeque<ReceivedMessage>,
}

impl RecordingTransport {
    fn new(members: &[u64]) -> Self {
        Self {
            local: LOCAL,
            members: members.iter().copied().map(PeerId).collect(),
            max_message_size: 1024,
            failing: HashSet::new(),
            sent: Vec::new(),
            inbox: VecDeque::new(),
        }
    }

    fn targets(&self) -> Vec<PeerId> {
        self.sent.iter().map(|(target, ..)| *target).collect()
    }
}

impl Transport for RecordingTransport {
    fn local_id(&self) -> PeerId {
        self.local
    }

    fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    fn send(
        &mut self,
        bytes: &Bytes,
        target: PeerId,
        reliability: Reliability,
        channel: u32,
    ) -> Result<(), TransportError> {
        if self.failing.contains(&target) {
            return Err(TransportError::SendFailed {
                target,
                reason: "link down".to_string(),
            });
        }
        self.sent.push((target, bytes.clone(), reliability, channel));
        Ok(())
    }

    fn receive_pending(&mut self, _channel: u32, max_count: usize) -> Vec<ReceivedMessage> {
        let count = max_count.min(self.inbox.len());
        self.inbox.drain(..count).collect()
    }

    fn current_session_members(&self) -> Vec<PeerId> {
        self.members.clone()
    }
}

type Log = Arc<Mutex<Vec<String>>>;

fn recorder(log: &Log, tag: &'static str) -> impl Fn(&CallArgs) -> HandlerResult + Send + Sync {
    let log = Arc::clone(log);
    move |_| {
        log.lock().unwrap().push(tag.to_string());
        Ok(())
    }
}

fn dispatcher(members: &[u64]) -> Dispatcher<RecordingTransport> {
    Dispatcher::new(RecordingTransport::new(members))
}

#[test]
fn test_mask_selects_matching_handlers_only() {
    let log = Log::default();
    let mut d = dispatcher(&[1]);
    d.register(HandlerDescriptor::new(1, "Hit", recorder(&log, "mask0")));
    d.register(HandlerDescriptor::new(1, "Hit", recorder(&log, "mask5")).with_mask(5));

    let bytes = d.encode_call(1, "Hit", 5, &[]).unwrap();
    let report = d.handle_message(bytes, PeerId(2)).unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["mask5"]);
    assert_eq!(report.matched, 1);
    assert_eq!(report.invoked, 1);
}

#[test]
fn test_no_matching_mask_is_not_an_error() {
    let log = Log::default();
    let mut d = dispatcher(&[1]);
    d.register(HandlerDescriptor::new(1, "Hit", recorder(&log, "mask0")));

    let bytes = d.encode_call(1, "Hit", 7, &[]).unwrap();
    let report = d.handle_message(bytes, PeerId(2)).unwrap();

    assert_eq!(report.matched, 0);
    assert!(report.is_clean());
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_duplicate_handlers_run_in_order_with_same_arguments() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut d = dispatcher(&[1]);
    for tag in ["first", "second"] {
        let seen = Arc::clone(&seen);
        d.register(
            HandlerDescriptor::new(3, "Score", move |args: &CallArgs| {
                seen.lock().unwrap().push((tag, args.get::<i32>(0)?));
                Ok(())
            })
            .param("points", WireType::I32),
        );
    }

    let bytes = d.encode_call(3, "Score", 0, &[Value::I32(40)]).unwrap();
    d.handle_message(bytes, PeerId(2)).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![("first", 40), ("second", 40)]);
}

#[test]
fn test_each_handler_decodes_from_payload_start() {
    let log = Log::default();
    let mut d = dispatcher(&[1]);
    d.register(HandlerDescriptor::new(3, "Mixed", recorder(&log, "wide")).param("v", WireType::I64));
    d.register(HandlerDescriptor::new(3, "Mixed", recorder(&log, "narrow")).param("v", WireType::I32));

    // Four payload bytes: enough for the i32 handler only
    let mut writer = MessageWriter::new(&MessageHeader::new(3, "Mixed", 0)).unwrap();
    writer.write_i32(9);
    let report = d.handle_message(writer.finish(), PeerId(2)).unwrap();

    assert_eq!(report.matched, 2);
    assert_eq!(report.invoked, 1);
    assert!(matches!(
        report.failures[0],
        ProtocolError::Decode(DecodeError::Exhausted { .. })
    ));
    assert_eq!(*log.lock().unwrap(), vec!["narrow"]);
}

#[test]
fn test_failing_handlers_do_not_stop_siblings() {
    let log = Log::default();
    let mut d = dispatcher(&[1]);
    d.register(HandlerDescriptor::new(4, "Boom", |_: &CallArgs| Err("refused".into())));
    d.register(HandlerDescriptor::new(4, "Boom", |_: &CallArgs| -> HandlerResult {
        panic!("handler blew up")
    }));
    d.register(HandlerDescriptor::new(4, "Boom", recorder(&log, "survivor")));

    let bytes = d.encode_call(4, "Boom", 0, &[]).unwrap();
    let report = d.handle_message(bytes, PeerId(2)).unwrap();

    assert_eq!(report.invoked, 1);
    assert_eq!(report.failures.len(), 2);
    assert!(report
        .failures
        .iter()
        .all(|e| matches!(e, ProtocolError::Invocation { sender: PeerId(2), .. })));
    assert!(report.failures[1].to_string().contains("handler blew up"));
    assert_eq!(*log.lock().unwrap(), vec!["survivor"]);
    assert_eq!(d.metrics().snapshot().invocation_errors, 2);
}

#[test]
fn test_call_info_carries_sender() {
    let senders = Arc::new(Mutex::new(Vec::new()));
    let mut d = dispatcher(&[1]);
    let with_info = Arc::clone(&senders);
    d.register(
        HandlerDescriptor::new(5, "Who", move |args: &CallArgs| {
            with_info.lock().unwrap().push(args.sender());
            Ok(())
        })
        .param("tag", WireType::U8)
        .with_call_info(),
    );
    let without_info = Arc::clone(&senders);
    d.register(
        HandlerDescriptor::new(5, "Who", move |args: &CallArgs| {
            without_info.lock().unwrap().push(args.sender());
            Ok(())
        })
        .param("tag", WireType::U8),
    );

    // Call info is not a wire argument
    let bytes = d.encode_call(5, "Who", 0, &[Value::U8(1)]).unwrap();
    d.handle_message(bytes, PeerId(42)).unwrap();

    assert_eq!(*senders.lock().unwrap(), vec![Some(PeerId(42)), None]);
}

#[test]
fn test_broadcast_continues_past_failed_member() {
    let mut d = dispatcher(&[2, 3, 4]);
    d.transport_mut().failing.insert(PeerId(3));
    d.register(HandlerDescriptor::new(6, "Ping", |_: &CallArgs| Ok(())));

    let report = d.broadcast(6, "Ping", Reliability::Unreliable, &[]).unwrap();

    assert_eq!(report.delivered, vec![PeerId(2), PeerId(4)]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, PeerId(3));
    assert!(matches!(
        report.failed[0].1,
        ProtocolError::Transport(TransportError::SendFailed { .. })
    ));
    assert_eq!(d.transport().targets(), vec![PeerId(2), PeerId(4)]);
}

#[test]
fn test_broadcast_sends_identical_bytes_on_rpc_channel() {
    let mut d = dispatcher(&[2, 3]);
    d.register(HandlerDescriptor::new(6, "Ping", |_: &CallArgs| Ok(())).param("n", WireType::U16));

    d.broadcast_masked(6, "Ping", Reliability::Reliable, 2, &[Value::U16(7)])
        .unwrap();

    let sent = &d.transport().sent;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].1, sent[1].1);
    assert!(sent.iter().all(|(_, _, reliability, channel)| {
        *reliability == Reliability::Reliable && *channel == 120
    }));
}

#[test]
fn test_broadcast_includes_local_member_via_loopback() {
    let log = Log::default();
    let mut d = dispatcher(&[1, 2]);
    d.register(HandlerDescriptor::new(6, "Ping", recorder(&log, "local")));

    let report = d.broadcast(6, "Ping", Reliability::Reliable, &[]).unwrap();

    assert_eq!(report.delivered, vec![LOCAL, PeerId(2)]);
    assert_eq!(d.transport().targets(), vec![PeerId(2)]);
    assert_eq!(*log.lock().unwrap(), vec!["local"]);
}

#[test]
fn test_send_to_self_is_loopback_only() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let mut d = dispatcher(&[1]);
    let sink = Arc::clone(&received);
    d.register(
        HandlerDescriptor::new(9, "Echo", move |args: &CallArgs| {
            sink.lock().unwrap().push(args.get::<String>(0)?);
            Ok(())
        })
        .param("text", WireType::String),
    );

    d.send_to(9, "Echo", LOCAL, Reliability::Reliable, &[Value::from("hi")])
        .unwrap();

    assert_eq!(*received.lock().unwrap(), vec!["hi".to_string()]);
    assert!(d.transport().sent.is_empty());
    assert_eq!(d.metrics().snapshot().loopback_deliveries, 1);
}

#[test]
fn test_send_to_self_reports_handler_failure() {
    let mut d = dispatcher(&[1]);
    d.register(
        HandlerDescriptor::new(9, "Echo", |_: &CallArgs| -> HandlerResult { Err("boom".into()) })
            .param("text", WireType::String),
    );

    let err = d
        .send_to(9, "Echo", LOCAL, Reliability::Reliable, &[Value::from("hi")])
        .unwrap_err();

    match err {
        ProtocolError::HandlersFailed {
            module_id,
            method,
            matched,
            failures,
        } => {
            assert_eq!((module_id, method.as_str(), matched), (9, "Echo", 1));
            assert_eq!(failures.len(), 1);
            assert!(matches!(failures[0], ProtocolError::Invocation { sender: LOCAL, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(d.transport().sent.is_empty());
}

#[test]
fn test_send_to_self_without_matching_mask_is_an_error() {
    let log = Log::default();
    let mut d = dispatcher(&[1]);
    d.register(HandlerDescriptor::new(9, "Echo", recorder(&log, "plain")));

    let err = d
        .send_to_masked(9, "Echo", LOCAL, Reliability::Reliable, 3, &[])
        .unwrap_err();

    assert!(matches!(
        err,
        ProtocolError::NoMatchingHandler { module_id: 9, mask: 3, .. }
    ));
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_broadcast_reports_failing_local_handler() {
    let mut d = dispatcher(&[1, 2]);
    d.register(HandlerDescriptor::new(6, "Ping", |_: &CallArgs| -> HandlerResult {
        Err("local only".into())
    }));

    let report = d.broadcast(6, "Ping", Reliability::Reliable, &[]).unwrap();

    assert_eq!(report.delivered, vec![PeerId(2)]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, LOCAL);
    assert!(matches!(report.failed[0].1, ProtocolError::HandlersFailed { .. }));
}

#[test]
fn test_type_mismatch_rejected_before_encoding() {
    let mut d = dispatcher(&[1, 2]);
    d.register(
        HandlerDescriptor::new(2, "Hit", |_: &CallArgs| Ok(()))
            .param("damage", WireType::I32)
            .param("force", WireType::F32),
    );

    let err = d
        .send_to(
            2,
            "Hit",
            PeerId(2),
            Reliability::Reliable,
            &[Value::from("ten"), Value::F32(1.5)],
        )
        .unwrap_err();

    match err {
        ProtocolError::ArgumentTypeMismatch {
            param,
            index,
            expected,
            actual,
            ..
        } => {
            assert_eq!(param, "damage");
            assert_eq!(index, 0);
            assert_eq!(expected, WireType::I32);
            assert_eq!(actual, WireType::String);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(d.transport().sent.is_empty());
}

#[test]
fn test_argument_count_mismatch() {
    let mut d = dispatcher(&[1, 2]);
    d.register(
        HandlerDescriptor::new(2, "Hit", |_: &CallArgs| Ok(()))
            .param("damage", WireType::I32)
            .with_call_info(),
    );

    let err = d
        .send_to(2, "Hit", PeerId(2), Reliability::Reliable, &[])
        .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::ArgumentCountMismatch {
            expected: 1,
            actual: 0,
            ..
        }
    ));
    assert!(d.transport().sent.is_empty());
}

#[test]
fn test_send_to_unregistered_method() {
    let mut d = dispatcher(&[1, 2]);
    let err = d
        .send_to(8, "Missing", PeerId(2), Reliability::Reliable, &[])
        .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Lookup(LookupError::UnknownModule { module_id: 8, .. })
    ));
}

#[test]
fn test_oversized_message_not_sent() {
    let mut d = dispatcher(&[1, 2]);
    d.transport_mut().max_message_size = 64;
    d.register(HandlerDescriptor::new(2, "Say", |_: &CallArgs| Ok(())).param("text", WireType::String));

    let long = "x".repeat(100);
    let err = d
        .send_to(2, "Say", PeerId(2), Reliability::Reliable, &[Value::from(long.as_str())])
        .unwrap_err();

    assert!(matches!(
        err,
        ProtocolError::Transport(TransportError::Oversized { max: 64, .. })
    ));
    assert!(d.transport().sent.is_empty());
    assert_eq!(d.metrics().snapshot().oversized_messages, 1);
}

#[test]
fn test_receive_lookup_failures() {
    let mut d = dispatcher(&[1]);
    d.register(HandlerDescriptor::new(1, "Hit", |_: &CallArgs| Ok(())));

    let unknown_module = MessageWriter::new(&MessageHeader::new(2, "Hit", 0)).unwrap().finish();
    assert!(matches!(
        d.handle_message(unknown_module, PeerId(2)),
        Err(ProtocolError::Lookup(LookupError::UnknownModule { module_id: 2, ref loaded })) if loaded == &[1]
    ));

    let unknown_method = MessageWriter::new(&MessageHeader::new(1, "Miss", 0)).unwrap().finish();
    assert!(matches!(
        d.handle_message(unknown_method, PeerId(2)),
        Err(ProtocolError::Lookup(LookupError::UnknownMethod { .. }))
    ));
    assert_eq!(d.metrics().snapshot().lookup_errors, 2);
}

#[test]
fn test_unsupported_version_rejected() {
    let d = dispatcher(&[1]);
    let mut header = MessageHeader::new(1, "Hit", 0);
    header.version = 2;
    let bytes = MessageWriter::new(&header).unwrap().finish();

    assert!(matches!(
        d.handle_message(bytes, PeerId(2)),
        Err(ProtocolError::Decode(DecodeError::UnsupportedVersion(2)))
    ));
}

#[test]
fn test_poll_drops_oversized_and_non_members() {
    let log = Log::default();
    let mut d = Dispatcher::with_config(
        RecordingTransport::new(&[1, 2]),
        SessionConfig {
            drop_non_members: true,
            ..SessionConfig::default()
        },
    );
    d.transport_mut().max_message_size = 64;
    d.register(HandlerDescriptor::new(1, "Hit", recorder(&log, "hit")));

    let good = d.encode_call(1, "Hit", 0, &[]).unwrap();
    let mut oversized = good.to_vec();
    oversized.resize(100, 0);

    let inbox = &mut d.transport_mut().inbox;
    inbox.push_back(ReceivedMessage { bytes: good.clone(), sender: PeerId(2) });
    inbox.push_back(ReceivedMessage { bytes: good, sender: PeerId(99) });
    inbox.push_back(ReceivedMessage { bytes: Bytes::from(oversized), sender: PeerId(2) });

    let report = d.poll();

    assert_eq!(report.received, 3);
    assert_eq!(report.dropped, 2);
    assert_eq!(report.dispatched, 1);
    assert_eq!(*log.lock().unwrap(), vec!["hit"]);
}

#[test]
fn test_poll_respects_batch_limit() {
    let mut d = Dispatcher::with_config(
        RecordingTransport::new(&[1, 2]),
        SessionConfig {
            max_receive_batch: 2,
            ..SessionConfig::default()
        },
    );
    d.register(HandlerDescriptor::new(1, "Hit", |_: &CallArgs| Ok(())));
    let good = d.encode_call(1, "Hit", 0, &[]).unwrap();
    for _ in 0..3 {
        d.transport_mut().inbox.push_back(ReceivedMessage {
            bytes: good.clone(),
            sender: PeerId(2),
        });
    }

    assert_eq!(d.poll().dispatched, 2);
    assert_eq!(d.poll().dispatched, 1);
    assert_eq!(d.poll().received, 0);
}

#[test]
fn test_session_left_clears_members() {
    let mut d = dispatcher(&[1, 2, 3]);
    d.key_sync_mut().register_lobby_key("map").unwrap();
    assert_eq!(d.members().len(), 3);

    d.on_session_left();
    assert!(d.members().is_empty());
    assert_eq!(d.key_sync().lobby_keys().len(), 1);

    d.refresh_members();
    assert_eq!(d.members().len(), 3);
}
