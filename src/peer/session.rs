use crate::error::CallError;
use crate::logger::dump_candidate;
use crate::media::LocalAudioTrack;
use crate::peer::connection::{PeerConnection, PeerConnector};
use crate::peer::ice::IceCandidateQueue;
use crate::peer::types::{
    CallId, IceCandidate, PeerConnectionState, PeerEventSender, RemoteStream, SdpKind,
    SessionDescription,
};
use crate::session::PartyId;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to a remote candidate handed to [`PeerSession::add_ice_candidate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    Applied,
    Queued,
}

/// The peer connection to exactly one remote party, plus the local tracks
/// attached to it and the candidates waiting for its remote description.
pub struct PeerSession {
    call_id: CallId,
    remote_id: PartyId,
    connection: Arc<dyn PeerConnection>,
    local_tracks: Vec<LocalAudioTrack>,
    remote_stream: Option<RemoteStream>,
    seen_streams: HashSet<String>,
    local_description_set: bool,
    remote_description_set: bool,
    pending: IceCandidateQueue,
    connection_state: PeerConnectionState,
    closed: bool,
}

impl PeerSession {
    /// Opens a new connection for `remote_id`; its events are tagged with `call_id`.
    pub async fn open(
        connector: &dyn PeerConnector,
        remote_id: PartyId,
        events: PeerEventSender,
    ) -> Result<Self, CallError> {
        let call_id = events.call_id();
        let connection = connector.connect(events).await?;
        debug!("call {call_id}: peer session opened for {remote_id}");
        Ok(Self {
            call_id,
            remote_id,
            connection,
            local_tracks: Vec::new(),
            remote_stream: None,
            seen_streams: HashSet::new(),
            local_description_set: false,
            remote_description_set: false,
            pending: IceCandidateQueue::new(),
            connection_state: PeerConnectionState::New,
            closed: false,
        })
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn remote_id(&self) -> &PartyId {
        &self.remote_id
    }

    pub fn local_description_set(&self) -> bool {
        self.local_description_set
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    pub fn local_tracks(&self) -> &[LocalAudioTrack] {
        &self.local_tracks
    }

    pub fn remote_stream(&self) -> Option<&RemoteStream> {
        self.remote_stream.as_ref()
    }

    pub fn connection_state(&self) -> PeerConnectionState {
        self.connection_state
    }

    pub fn set_connection_state(&mut self, state: PeerConnectionState) {
        self.connection_state = state;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<(), CallError> {
        if self.closed {
            return Err(CallError::NegotiationFailed(format!(
                "peer session with {} is closed",
                self.remote_id
            )));
        }
        Ok(())
    }

    pub async fn attach_local_track(&mut self, track: &LocalAudioTrack) -> Result<(), CallError> {
        self.ensure_open()?;
        self.connection.add_track(track).await?;
        self.local_tracks.push(track.clone());
        debug!("call {}: attached local track {}", self.call_id, track.id());
        Ok(())
    }

    /// Creates an offer and commits it as the local description.
    pub async fn create_offer(&mut self) -> Result<SessionDescription, CallError> {
        self.ensure_open()?;
        let offer = self.connection.create_offer().await?;
        self.commit_local(offer).await
    }

    /// Creates an answer to the applied remote offer and commits it locally.
    pub async fn create_answer(&mut self) -> Result<SessionDescription, CallError> {
        self.ensure_open()?;
        if !self.remote_description_set {
            return Err(CallError::NegotiationFailed(
                "cannot answer before the remote offer is applied".into(),
            ));
        }
        let answer = self.connection.create_answer().await?;
        self.commit_local(answer).await
    }

    async fn commit_local(
        &mut self,
        desc: SessionDescription,
    ) -> Result<SessionDescription, CallError> {
        self.connection.set_local_description(desc.clone()).await?;
        self.local_description_set = true;
        debug!("call {}: local {:?} committed", self.call_id, desc.kind);
        Ok(desc)
    }

    /// Commits the remote description, then applies buffered candidates in
    /// arrival order. Returns how many buffered candidates were applied.
    pub async fn apply_remote_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<usize, CallError> {
        self.ensure_open()?;
        if self.remote_description_set {
            return Err(CallError::NegotiationFailed(format!(
                "remote description already applied, ignoring {:?}",
                desc.kind
            )));
        }
        if desc.kind == SdpKind::Answer && !self.local_description_set {
            return Err(CallError::NegotiationFailed(
                "answer received before a local offer".into(),
            ));
        }

        self.connection.set_remote_description(desc).await?;
        self.remote_description_set = true;

        let queued = self.pending.drain();
        let mut applied = 0;
        for candidate in queued {
            dump_candidate("REMOTE (queued)", &candidate);
            match self.connection.add_ice_candidate(candidate).await {
                Ok(()) => applied += 1,
                Err(e) => warn!("call {}: failed to apply queued candidate: {e}", self.call_id),
            }
        }
        if applied > 0 {
            info!("call {}: applied {applied} queued candidates", self.call_id);
        }
        Ok(applied)
    }

    /// Applies the candidate now if the remote description is set, otherwise queues it.
    pub async fn add_ice_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<CandidateDisposition, CallError> {
        self.ensure_open()?;
        dump_candidate("REMOTE", &candidate);
        if !self.remote_description_set {
            self.pending.push(candidate);
            debug!(
                "call {}: remote description not set yet, queued candidate ({} pending)",
                self.call_id,
                self.pending.len()
            );
            return Ok(CandidateDisposition::Queued);
        }
        self.connection.add_ice_candidate(candidate).await?;
        Ok(CandidateDisposition::Applied)
    }

    /// Records an inbound stream. Returns false for a stream already seen.
    pub fn accept_remote_stream(&mut self, stream: RemoteStream) -> bool {
        if self.closed || !self.seen_streams.insert(stream.stream_id.clone()) {
            return false;
        }
        self.remote_stream = Some(stream);
        true
    }

    /// Releases the connection and forgets pending candidates. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pending.clear();
        self.remote_stream = None;
        self.local_tracks.clear();
        if let Err(e) = self.connection.close().await {
            warn!("call {}: error while closing peer connection: {e}", self.call_id);
        }
        info!("call {}: peer session with {} closed", self.call_id, self.remote_id);
    }
}
