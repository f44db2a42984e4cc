#![allow(dead_code)]

use async_trait::async_trait;
use dropcall_lib::call::CallStateMachine;
use dropcall_lib::error::{CallError, PeerError};
use dropcall_lib::events::CallEvent;
use dropcall_lib::media::{AudioOutput, LocalAudioTrack, Microphone};
use dropcall_lib::peer::{
    IceCandidate, PeerConnection, PeerConnector, PeerEvent, PeerEventSender, RemoteStream,
    SessionDescription,
};
use dropcall_lib::signaling::{SignalEvent, SignalingMessage, SignalingTransport};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, Notify};

/// Transport that records what the machine sends.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SignalingMessage>>,
    unavailable: AtomicBool,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<SignalingMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Removes and returns everything sent so far.
    pub fn take(&self) -> Vec<SignalingMessage> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn count(&self, event: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.event_name() == event)
            .count()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl SignalingTransport for RecordingTransport {
    fn send(&self, message: SignalingMessage) -> Result<(), CallError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CallError::SignalingUnavailable);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Transport that delivers straight into another machine's inbound queue.
pub struct ChannelTransport {
    peer: mpsc::UnboundedSender<SignalEvent>,
}

impl ChannelTransport {
    pub fn new(peer: mpsc::UnboundedSender<SignalEvent>) -> Self {
        Self { peer }
    }
}

impl SignalingTransport for ChannelTransport {
    fn send(&self, message: SignalingMessage) -> Result<(), CallError> {
        self.peer
            .send(SignalEvent::Message(message))
            .map_err(|_| CallError::SignalingUnavailable)
    }
}

/// Scripted peer backend. Every operation is appended to a shared log;
/// descriptions or candidates whose payload is "bad" are rejected.
#[derive(Default)]
pub struct FakeConnector {
    log: Arc<Mutex<Vec<String>>>,
    senders: Mutex<Vec<PeerEventSender>>,
    refuse: AtomicBool,
}

impl FakeConnector {
    pub fn ops(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn ops_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter(|op| op.starts_with(prefix))
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.senders.lock().unwrap().len()
    }

    pub fn refuse_connections(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    /// Raises `event` on the most recent connection.
    pub fn emit(&self, event: PeerEvent) -> bool {
        let senders = self.senders.lock().unwrap();
        senders.last().is_some_and(|tx| tx.emit(event))
    }

    /// Raises `event` on the `index`-th connection ever opened.
    pub fn emit_on(&self, index: usize, event: PeerEvent) -> bool {
        let senders = self.senders.lock().unwrap();
        senders.get(index).is_some_and(|tx| tx.emit(event))
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(&self, events: PeerEventSender) -> Result<Arc<dyn PeerConnection>, PeerError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(PeerError::Rejected("connection refused".into()));
        }
        self.senders.lock().unwrap().push(events);
        self.log.lock().unwrap().push("connect".into());
        Ok(Arc::new(FakeConnection {
            log: self.log.clone(),
        }))
    }
}

struct FakeConnection {
    log: Arc<Mutex<Vec<String>>>,
}

impl FakeConnection {
    fn record(&self, op: String) {
        self.log.lock().unwrap().push(op);
    }
}

#[async_trait]
impl PeerConnection for FakeConnection {
    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        self.record("create_offer".into());
        Ok(SessionDescription::offer("v=0 fake-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        self.record("create_answer".into());
        Ok(SessionDescription::answer("v=0 fake-answer"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.record(format!("set_local:{:?}", desc.kind));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        if desc.sdp == "bad" {
            return Err(PeerError::Rejected("malformed sdp".into()));
        }
        self.record(format!("set_remote:{:?}", desc.kind));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        if candidate.candidate == "bad" {
            return Err(PeerError::Rejected("malformed candidate".into()));
        }
        self.record(format!("candidate:{}", candidate.candidate));
        Ok(())
    }

    async fn add_track(&self, track: &LocalAudioTrack) -> Result<(), PeerError> {
        self.record(format!("add_track:{}", track.id()));
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.record("close".into());
        Ok(())
    }
}

/// Microphone that can deny access or hold the permission prompt open.
#[derive(Default)]
pub struct FakeMicrophone {
    deny: bool,
    gated: bool,
    entered: Notify,
    gate: Notify,
    opened: Mutex<Vec<LocalAudioTrack>>,
}

impl FakeMicrophone {
    pub fn allowing() -> Self {
        Self::default()
    }

    pub fn denying() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    /// `open` blocks until [`FakeMicrophone::release_gate`] is called.
    pub fn gated() -> Self {
        Self {
            gated: true,
            ..Self::default()
        }
    }

    pub async fn wait_until_requested(&self) {
        self.entered.notified().await;
    }

    pub fn release_gate(&self) {
        self.gate.notify_one();
    }

    pub fn opened(&self) -> Vec<LocalAudioTrack> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl Microphone for FakeMicrophone {
    async fn open(&self) -> Result<LocalAudioTrack, CallError> {
        if self.gated {
            self.entered.notify_one();
            self.gate.notified().await;
        }
        if self.deny {
            return Err(CallError::MediaAccessDenied("permission denied".into()));
        }
        let n = self.opened.lock().unwrap().len();
        let track = LocalAudioTrack::opus(format!("mic-{n}"), "local-stream");
        self.opened.lock().unwrap().push(track.clone());
        Ok(track)
    }
}

/// Audio output that records what it was asked to play.
#[derive(Default)]
pub struct RecordingSpeaker {
    played: Mutex<Vec<String>>,
    blocked: AtomicBool,
    stops: AtomicUsize,
}

impl RecordingSpeaker {
    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }

    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::SeqCst);
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl AudioOutput for RecordingSpeaker {
    fn play(&self, stream: &RemoteStream) -> Result<(), CallError> {
        if self.blocked.load(Ordering::SeqCst) {
            return Err(CallError::PlaybackBlocked("autoplay refused".into()));
        }
        self.played.lock().unwrap().push(stream.stream_id.clone());
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// One party: a state machine over fake collaborators.
pub struct Node {
    pub machine: CallStateMachine,
    pub transport: Arc<RecordingTransport>,
    pub connector: Arc<FakeConnector>,
    pub mic: Arc<FakeMicrophone>,
    pub speaker: Arc<RecordingSpeaker>,
    pub events: broadcast::Receiver<CallEvent>,
}

impl Node {
    pub fn new(id: &str) -> Self {
        Self::with_microphone(id, FakeMicrophone::allowing())
    }

    pub fn with_microphone(id: &str, mic: FakeMicrophone) -> Self {
        let transport = Arc::new(RecordingTransport::default());
        let connector = Arc::new(FakeConnector::default());
        let mic = Arc::new(mic);
        let speaker = Arc::new(RecordingSpeaker::default());
        let machine = CallStateMachine::new(
            id.into(),
            transport.clone(),
            connector.clone(),
            mic.clone(),
            speaker.clone(),
        );
        let events = machine.events().subscribe();
        Self {
            machine,
            transport,
            connector,
            mic,
            speaker,
            events,
        }
    }

    pub fn with_grace_period(mut self, grace: std::time::Duration) -> Self {
        self.machine = self.machine.with_grace_period(grace);
        self
    }

    /// Every event emitted since the last call.
    pub fn drain_events(&mut self) -> Vec<CallEvent> {
        let mut out = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => out.push(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => return out,
            }
        }
    }

    /// Delivers everything `other` has sent so far to this node, in order.
    pub async fn receive_from(&mut self, other: &Node) {
        for message in other.transport.take() {
            self.machine.handle_signal(message).await;
        }
    }
}

pub fn offer(from: &str, to: &str) -> SignalingMessage {
    SignalingMessage::Offer {
        to: to.into(),
        from: from.into(),
        offer: SessionDescription::offer("v=0 remote-offer"),
    }
}

pub fn answer(from: &str, to: &str) -> SignalingMessage {
    SignalingMessage::Answer {
        to: to.into(),
        from: from.into(),
        answer: SessionDescription::answer("v=0 remote-answer"),
    }
}

pub fn candidate(from: &str, to: &str, line: &str) -> SignalingMessage {
    SignalingMessage::IceCandidate {
        to: to.into(),
        from: from.into(),
        candidate: IceCandidate {
            candidate: line.into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        },
    }
}

pub fn end_call(from: &str, to: &str) -> SignalingMessage {
    SignalingMessage::EndCall {
        to: to.into(),
        from: from.into(),
    }
}

pub fn error_kinds(events: &[CallEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            CallEvent::Error { kind, .. } => Some(kind.to_string()),
            _ => None,
        })
        .collect()
}

pub fn states(events: &[CallEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            CallEvent::StateChanged(state) => Some(state.to_string()),
            _ => None,
        })
        .collect()
}
