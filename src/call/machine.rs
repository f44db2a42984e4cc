use crate::call::handle::{CallHandle, HangupSignal, UserAction};
use crate::error::CallError;
use crate::events::{CallEvent, EventEmitter};
use crate::media::{AudioOutput, MediaController, Microphone};
use crate::peer::connection::PeerConnector;
use crate::peer::session::PeerSession;
use crate::peer::types::{
    CallId, IceCandidate, PeerConnectionState, PeerEvent, PeerEventSender, RemoteStream,
    SessionDescription,
};
use crate::session::{CallSession, CallState, PartyId};
use crate::signaling::{SignalEvent, SignalingMessage, SignalingTransport, TransportStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Single owner of the call lifecycle.
///
/// Every input (user action, relay message, peer event) is handled to
/// completion before the next one is looked at. Steps that await check the
/// [`HangupSignal`] once they settle, and abandon the call attempt if the
/// user hung up in the meantime.
pub struct CallStateMachine {
    local_id: PartyId,
    session: CallSession,
    media: MediaController,
    speaker: Arc<dyn AudioOutput>,
    connector: Arc<dyn PeerConnector>,
    transport: Arc<dyn SignalingTransport>,
    events: EventEmitter,
    state_tx: watch::Sender<CallState>,
    hangup: HangupSignal,
    peer_tx: mpsc::UnboundedSender<(CallId, PeerEvent)>,
    peer_rx: mpsc::UnboundedReceiver<(CallId, PeerEvent)>,
    signaling_available: bool,
    next_call_id: CallId,
    grace_period: Duration,
    grace_task: Option<JoinHandle<()>>,
}

impl CallStateMachine {
    pub fn new(
        local_id: PartyId,
        transport: Arc<dyn SignalingTransport>,
        connector: Arc<dyn PeerConnector>,
        microphone: Arc<dyn Microphone>,
        speaker: Arc<dyn AudioOutput>,
    ) -> Self {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(CallState::Idle);
        Self {
            local_id,
            session: CallSession::default(),
            media: MediaController::new(microphone),
            speaker,
            connector,
            transport,
            events: EventEmitter::new(),
            state_tx,
            hangup: HangupSignal::new(),
            peer_tx,
            peer_rx,
            signaling_available: true,
            next_call_id: 1,
            grace_period: DEFAULT_GRACE_PERIOD,
            grace_task: None,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn local_id(&self) -> &PartyId {
        &self.local_id
    }

    pub fn state(&self) -> CallState {
        self.session.state()
    }

    pub fn session(&self) -> &CallSession {
        &self.session
    }

    pub fn media(&self) -> &MediaController {
        &self.media
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn hangup_signal(&self) -> &HangupSignal {
        &self.hangup
    }

    pub fn is_signaling_available(&self) -> bool {
        self.signaling_available
    }

    fn allocate_call_id(&mut self) -> CallId {
        let call_id = self.next_call_id;
        self.next_call_id += 1;
        call_id
    }

    fn peer_events(&self, call_id: CallId) -> PeerEventSender {
        PeerEventSender::new(call_id, self.peer_tx.clone())
    }

    fn set_state(&mut self, state: CallState) {
        let previous = self.session.state();
        self.session.set_state(state);
        info!(
            "call {}: {previous} -> {state}",
            self.session.call_id()
        );
        self.publish_state();
    }

    fn publish_state(&self) {
        let state = self.session.state();
        self.state_tx.send_replace(state);
        self.events.emit_state(state);
    }

    // ========== USER ACTIONS ==========

    /// Places an outgoing call. On success the offer has been sent and the
    /// state is `Dialing`. On failure every resource taken so far is released
    /// and the state is still `Idle`.
    pub async fn start_call(&mut self, remote: PartyId) -> Result<(), CallError> {
        let result = self.try_start_call(remote).await;
        self.report(&result);
        result
    }

    async fn try_start_call(&mut self, remote: PartyId) -> Result<(), CallError> {
        if !self.signaling_available {
            return Err(CallError::SignalingUnavailable);
        }
        if remote.is_empty() || remote == self.local_id {
            return Err(CallError::InvalidParty(remote.to_string()));
        }
        if self.session.state() != CallState::Idle {
            let busy_with = self
                .session
                .remote_id()
                .map(|id| id.to_string())
                .unwrap_or_else(|| self.session.state().to_string());
            return Err(CallError::CallInProgress(busy_with));
        }

        let call_id = self.allocate_call_id();
        self.hangup.begin(call_id);
        info!("call {call_id}: dialing {remote}");

        match self.dial(call_id, &remote).await {
            Ok(peer) => {
                self.session.install(peer);
                self.set_state(CallState::Dialing);
                Ok(())
            }
            Err(e) => {
                self.media.release();
                self.hangup.finish();
                if e == CallError::Cancelled {
                    info!("call {call_id}: dial to {remote} cancelled");
                } else {
                    warn!("call {call_id}: dial to {remote} failed: {e}");
                }
                Err(e)
            }
        }
    }

    async fn dial(&mut self, call_id: CallId, remote: &PartyId) -> Result<PeerSession, CallError> {
        let track = self.media.acquire().await?;
        self.hangup.check(call_id)?;

        let mut peer =
            PeerSession::open(self.connector.as_ref(), remote.clone(), self.peer_events(call_id))
                .await?;

        let sent = async {
            self.hangup.check(call_id)?;
            peer.attach_local_track(&track).await?;
            let offer = peer.create_offer().await?;
            self.hangup.check(call_id)?;
            self.transport.send(SignalingMessage::Offer {
                to: remote.clone(),
                from: self.local_id.clone(),
                offer,
            })
        }
        .await;

        match sent {
            Ok(()) => Ok(peer),
            Err(e) => {
                peer.close().await;
                Err(e)
            }
        }
    }

    /// Answers the ringing call. Any failure after the ring rejects the call
    /// towards the caller and returns to `Idle`.
    pub async fn accept_call(&mut self) -> Result<(), CallError> {
        let result = self.try_accept_call().await;
        self.report(&result);
        result
    }

    async fn try_accept_call(&mut self) -> Result<(), CallError> {
        if self.session.state() != CallState::RingingIncoming {
            return Err(CallError::NoIncomingCall);
        }
        let call_id = self.session.call_id();

        match self.answer(call_id).await {
            Ok(()) => {
                self.set_state(CallState::Active);
                Ok(())
            }
            Err(e) => {
                if e == CallError::Cancelled {
                    info!("call {call_id}: accept cancelled");
                } else {
                    warn!("call {call_id}: accept failed: {e}");
                }
                self.teardown(true).await;
                Err(e)
            }
        }
    }

    async fn answer(&mut self, call_id: CallId) -> Result<(), CallError> {
        let track = self.media.acquire().await?;
        self.hangup.check(call_id)?;

        let peer = self
            .session
            .peer_for(call_id)
            .ok_or(CallError::NoIncomingCall)?;
        peer.attach_local_track(&track).await?;
        let answer = peer.create_answer().await?;
        self.hangup.check(call_id)?;
        self.transport.send(SignalingMessage::Answer {
            to: peer.remote_id().clone(),
            from: self.local_id.clone(),
            answer,
        })
    }

    /// Hangs up `target` (0 for whatever call is current).
    ///
    /// Ending when nothing is in progress reports `NoActiveSession`, unless
    /// `target` names a call that has already been torn down, which is a
    /// silent no-op.
    pub async fn end_call(&mut self, target: CallId) -> Result<(), CallError> {
        let result = self.try_end_call(target).await;
        self.report(&result);
        result
    }

    async fn try_end_call(&mut self, target: CallId) -> Result<(), CallError> {
        if !self.session.state().is_in_call() {
            if target == 0 {
                return Err(CallError::NoActiveSession("no call to end".into()));
            }
            debug!("call {target}: already ended");
            return Ok(());
        }
        if target != 0 && target != self.session.call_id() {
            debug!("call {target}: hangup is stale, current call is {}", self.session.call_id());
            return Ok(());
        }

        self.teardown(true).await;
        Ok(())
    }

    /// Returns the resulting mute flag. With no captured stream this is a
    /// no-op reporting `false`.
    pub fn toggle_mute(&mut self) -> Result<bool, CallError> {
        match self.media.toggle_mute() {
            Some(muted) => {
                self.events.emit(CallEvent::MuteChanged(muted));
                Ok(muted)
            }
            None => {
                debug!("toggle_mute without a captured stream");
                Ok(self.media.is_muted())
            }
        }
    }

    /// Retries remote audio playback after the output refused to start.
    pub fn play_remote_audio(&mut self) -> Result<(), CallError> {
        let result = match self.session.peer().and_then(|peer| peer.remote_stream()) {
            Some(stream) => self.speaker.play(stream),
            None => Err(CallError::NoActiveSession(
                "no remote audio available yet".into(),
            )),
        };
        self.report(&result);
        result
    }

    async fn handle_action(&mut self, action: UserAction) {
        match action {
            UserAction::StartCall { remote, reply } => {
                let _ = reply.send(self.start_call(remote).await);
            }
            UserAction::AcceptCall { reply } => {
                let _ = reply.send(self.accept_call().await);
            }
            UserAction::EndCall { call, reply } => {
                let _ = reply.send(self.end_call(call).await);
            }
            UserAction::ToggleMute { reply } => {
                let _ = reply.send(self.toggle_mute());
            }
            UserAction::PlayRemoteAudio { reply } => {
                let _ = reply.send(self.play_remote_audio());
            }
        }
    }

    fn report<T>(&self, result: &Result<T, CallError>) {
        if let Err(e) = result {
            self.events.emit_error(e);
        }
    }

    // ========== RELAY INPUT ==========

    pub async fn handle_signal(&mut self, message: SignalingMessage) {
        if let Some(to) = message.to() {
            if *to != self.local_id {
                debug!("dropping {} addressed to {to}", message.event_name());
                return;
            }
        }

        match message {
            SignalingMessage::Register { .. } => {
                debug!("ignoring register_user echoed by relay");
            }
            SignalingMessage::Offer { from, offer, .. } => self.on_offer(from, offer).await,
            SignalingMessage::Answer { from, answer, .. } => self.on_answer(from, answer).await,
            SignalingMessage::IceCandidate {
                from, candidate, ..
            } => self.on_remote_candidate(from, candidate).await,
            SignalingMessage::EndCall { from, .. } => self.on_remote_hangup(from).await,
        }
    }

    async fn on_offer(&mut self, from: PartyId, offer: SessionDescription) {
        if from.is_empty() || from == self.local_id {
            debug!("dropping offer with invalid sender {from:?}");
            return;
        }
        if self.session.state() != CallState::Idle {
            debug!(
                "dropping offer from {from}: busy in {} with {:?}",
                self.session.state(),
                self.session.remote_id()
            );
            return;
        }

        let call_id = self.allocate_call_id();
        self.hangup.begin(call_id);

        let mut peer =
            match PeerSession::open(self.connector.as_ref(), from.clone(), self.peer_events(call_id))
                .await
            {
                Ok(peer) => peer,
                Err(e) => {
                    self.hangup.finish();
                    self.events.emit_error(&e);
                    return;
                }
            };
        if let Err(e) = peer.apply_remote_description(offer).await {
            peer.close().await;
            self.hangup.finish();
            self.events.emit_error(&e);
            return;
        }

        info!("call {call_id}: incoming call from {from}");
        self.session.install(peer);
        self.set_state(CallState::RingingIncoming);
        self.events.emit(CallEvent::IncomingCall(from));
    }

    async fn on_answer(&mut self, from: PartyId, answer: SessionDescription) {
        if self.session.state() != CallState::Dialing
            || self.session.remote_id() != Some(&from)
        {
            debug!(
                "dropping answer from {from} in state {}",
                self.session.state()
            );
            return;
        }
        let call_id = self.session.call_id();
        let Some(peer) = self.session.peer_for(call_id) else {
            return;
        };
        let applied = peer.apply_remote_description(answer).await;
        match applied {
            Ok(_) => self.set_state(CallState::Active),
            Err(e) => self.events.emit_error(&e),
        }
    }

    async fn on_remote_candidate(&mut self, from: PartyId, candidate: IceCandidate) {
        if self.session.remote_id() != Some(&from) {
            debug!("dropping candidate from {from}: no session with that party");
            return;
        }
        let call_id = self.session.call_id();
        let Some(peer) = self.session.peer_for(call_id) else {
            return;
        };
        if let Err(e) = peer.add_ice_candidate(candidate).await {
            self.events.emit_error(&e);
        }
    }

    async fn on_remote_hangup(&mut self, from: PartyId) {
        if !self.session.state().is_in_call() || self.session.remote_id() != Some(&from) {
            debug!("dropping endCall from {from}");
            return;
        }
        info!("call {}: {from} hung up", self.session.call_id());
        self.teardown(false).await;
    }

    pub fn handle_transport_status(&mut self, status: TransportStatus) {
        match status {
            TransportStatus::Connected => self.signaling_available = true,
            TransportStatus::Unavailable => {
                if self.signaling_available {
                    warn!("relay unavailable, new calls are blocked");
                    self.signaling_available = false;
                    self.events.emit_error(&CallError::SignalingUnavailable);
                }
            }
            TransportStatus::Connecting | TransportStatus::Reconnecting { .. } => {}
        }
        self.events.emit(CallEvent::SignalingStatus(status));
    }

    // ========== PEER EVENTS ==========

    pub async fn handle_peer_event(&mut self, call_id: CallId, event: PeerEvent) {
        if self.session.peer_for(call_id).is_none() {
            debug!("call {call_id}: dropping stale {event:?}");
            return;
        }

        match event {
            PeerEvent::LocalCandidate(candidate) => self.send_local_candidate(call_id, candidate),
            PeerEvent::GatheringComplete => debug!("call {call_id}: ICE gathering complete"),
            PeerEvent::RemoteTrack(stream) => self.on_remote_stream(call_id, stream),
            PeerEvent::ConnectionState(state) => self.on_connection_state(call_id, state),
            PeerEvent::GraceExpired => self.on_grace_expired(call_id),
        }
    }

    /// Handles every peer event that is already queued, without waiting.
    pub async fn drain_peer_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok((call_id, event)) = self.peer_rx.try_recv() {
            self.handle_peer_event(call_id, event).await;
            handled += 1;
        }
        handled
    }

    fn send_local_candidate(&mut self, call_id: CallId, candidate: IceCandidate) {
        let Some(remote) = self.session.remote_id().cloned() else {
            return;
        };
        if let Err(e) = self.transport.send(SignalingMessage::IceCandidate {
            to: remote,
            from: self.local_id.clone(),
            candidate,
        }) {
            // the media path may already be up; losing a late candidate is not fatal
            warn!("call {call_id}: could not send local candidate: {e}");
        }
    }

    fn on_remote_stream(&mut self, call_id: CallId, stream: RemoteStream) {
        let Some(peer) = self.session.peer_for(call_id) else {
            return;
        };
        if !peer.accept_remote_stream(stream.clone()) {
            debug!("call {call_id}: duplicate remote stream {}", stream.stream_id);
            return;
        }
        info!("call {call_id}: remote stream {} available", stream.stream_id);
        self.events
            .emit(CallEvent::RemoteStreamAvailable(stream.clone()));
        if let Err(e) = self.speaker.play(&stream) {
            self.events.emit_error(&e);
        }
    }

    fn on_connection_state(&mut self, call_id: CallId, state: PeerConnectionState) {
        let Some(peer) = self.session.peer_for(call_id) else {
            return;
        };
        if peer.connection_state() == state {
            return;
        }
        peer.set_connection_state(state);
        info!("call {call_id}: peer connection {state:?}");
        self.events.emit(CallEvent::ConnectionChanged(state));

        match state {
            PeerConnectionState::Connected => self.cancel_grace_timer(),
            PeerConnectionState::Disconnected | PeerConnectionState::Failed => {
                self.start_grace_timer(call_id)
            }
            _ => {}
        }
    }

    fn start_grace_timer(&mut self, call_id: CallId) {
        if self
            .grace_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            return;
        }
        let tx = self.peer_tx.clone();
        let grace = self.grace_period;
        debug!("call {call_id}: waiting {grace:?} for the connection to recover");
        self.grace_task = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = tx.send((call_id, PeerEvent::GraceExpired));
        }));
    }

    fn cancel_grace_timer(&mut self) {
        if let Some(task) = self.grace_task.take() {
            task.abort();
        }
    }

    fn on_grace_expired(&mut self, call_id: CallId) {
        self.grace_task = None;
        let Some(peer) = self.session.peer_for(call_id) else {
            return;
        };
        if peer.connection_state() == PeerConnectionState::Connected {
            return;
        }
        warn!(
            "call {call_id}: connection did not recover within {:?}",
            self.grace_period
        );
        self.events.emit(CallEvent::ConnectionLost);
    }

    // ========== TEARDOWN ==========

    /// Ending -> Ended -> Idle, releasing the peer session and microphone.
    /// With `notify`, the remote party is told first.
    async fn teardown(&mut self, notify: bool) {
        self.cancel_grace_timer();
        self.set_state(CallState::Ending);

        if let Some(mut peer) = self.session.take_peer() {
            if notify {
                let bye = SignalingMessage::EndCall {
                    to: peer.remote_id().clone(),
                    from: self.local_id.clone(),
                };
                if let Err(e) = self.transport.send(bye) {
                    warn!("call {}: could not notify {}: {e}", peer.call_id(), peer.remote_id());
                }
            }
            peer.close().await;
        }
        self.media.release();
        self.speaker.stop();
        self.hangup.finish();

        self.set_state(CallState::Ended);
        self.session.reset();
        self.publish_state();
    }

    // ========== EVENT LOOP ==========

    /// Moves the machine onto its own task, fed by `signals` and the
    /// returned handle.
    pub fn spawn(self, signals: mpsc::UnboundedReceiver<SignalEvent>) -> CallHandle {
        let (actions_tx, actions_rx) = mpsc::unbounded_channel();
        let handle = CallHandle::new(
            actions_tx,
            self.hangup.clone(),
            self.events.clone(),
            self.state_tx.subscribe(),
        );
        tokio::spawn(self.run(actions_rx, signals));
        handle
    }

    /// Processes inputs one at a time until every handle is dropped.
    pub async fn run(
        mut self,
        mut actions: mpsc::UnboundedReceiver<UserAction>,
        mut signals: mpsc::UnboundedReceiver<SignalEvent>,
    ) {
        let mut signals_open = true;
        loop {
            tokio::select! {
                action = actions.recv() => match action {
                    Some(action) => self.handle_action(action).await,
                    None => break,
                },
                Some((call_id, event)) = self.peer_rx.recv() => {
                    self.handle_peer_event(call_id, event).await;
                }
                signal = signals.recv(), if signals_open => match signal {
                    Some(SignalEvent::Message(message)) => self.handle_signal(message).await,
                    Some(SignalEvent::Status(status)) => self.handle_transport_status(status),
                    None => {
                        signals_open = false;
                        self.handle_transport_status(TransportStatus::Unavailable);
                    }
                },
            }
        }

        if self.session.state().is_in_call() {
            self.teardown(true).await;
        }
        debug!("call state machine stopped");
    }
}
