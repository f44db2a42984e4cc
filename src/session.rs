use crate::peer::session::PeerSession;
use crate::peer::types::CallId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Registration key of a participant on the relay.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct PartyId(String);

impl PartyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartyId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PartyId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Lifecycle of the single call a process can hold.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallState {
    #[default]
    Idle,
    Dialing,
    RingingIncoming,
    Active,
    Ending,
    Ended,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "Idle",
            CallState::Dialing => "Dialing",
            CallState::RingingIncoming => "RingingIncoming",
            CallState::Active => "Active",
            CallState::Ending => "Ending",
            CallState::Ended => "Ended",
        }
    }

    /// UI shows the accept button only in this state.
    pub fn is_incoming(&self) -> bool {
        matches!(self, CallState::RingingIncoming)
    }

    /// A user hangup is meaningful in these states.
    pub fn is_in_call(&self) -> bool {
        matches!(
            self,
            CallState::Dialing | CallState::RingingIncoming | CallState::Active
        )
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The call currently owned by the state machine. The remote party is only
/// known through the peer session, so one exists exactly when the other does.
#[derive(Default)]
pub struct CallSession {
    state: CallState,
    call_id: CallId,
    peer: Option<PeerSession>,
}

impl CallSession {
    pub fn state(&self) -> CallState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: CallState) {
        self.state = state;
    }

    /// Zero while no call has been set up.
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn remote_id(&self) -> Option<&PartyId> {
        self.peer.as_ref().map(|p| p.remote_id())
    }

    pub fn peer(&self) -> Option<&PeerSession> {
        self.peer.as_ref()
    }

    /// Peer session of `call_id`, if that call is still the current one.
    pub(crate) fn peer_for(&mut self, call_id: CallId) -> Option<&mut PeerSession> {
        self.peer.as_mut().filter(|p| p.call_id() == call_id)
    }

    pub(crate) fn install(&mut self, peer: PeerSession) {
        self.call_id = peer.call_id();
        self.peer = Some(peer);
    }

    pub(crate) fn take_peer(&mut self) -> Option<PeerSession> {
        self.peer.take()
    }

    /// Back to a fresh `Idle` session ready for a new call.
    pub(crate) fn reset(&mut self) {
        self.state = CallState::Idle;
        self.call_id = 0;
        self.peer = None;
    }
}
