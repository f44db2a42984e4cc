use crate::error::{CallError, ErrorKind};
use crate::peer::types::{PeerConnectionState, RemoteStream};
use crate::session::{CallState, PartyId};
use crate::signaling::TransportStatus;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Everything the UI layer can observe about the call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    StateChanged(CallState),
    IncomingCall(PartyId),
    RemoteStreamAvailable(RemoteStream),
    MuteChanged(bool),
    Error { kind: ErrorKind, message: String },
    SignalingStatus(TransportStatus),
    ConnectionChanged(PeerConnectionState),
    /// The media path did not recover within the grace period.
    ConnectionLost,
}

const EVENT_CAPACITY: usize = 64;

/// Fan-out of [`CallEvent`]s to any number of UI subscribers.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<CallEvent>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventEmitter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: CallEvent) {
        debug!("emit {event:?}");
        // no subscribers is fine, the UI may attach later
        let _ = self.tx.send(event);
    }

    pub fn emit_state(&self, state: CallState) {
        self.emit(CallEvent::StateChanged(state));
    }

    pub fn emit_error(&self, err: &CallError) {
        if !err.is_reported() {
            return;
        }
        warn!("call error {}: {err}", err.kind());
        self.emit(CallEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_errors_with_kind() {
        let emitter = EventEmitter::new();
        let mut rx = emitter.subscribe();
        emitter.emit_error(&CallError::NoIncomingCall);
        emitter.emit_error(&CallError::Cancelled);
        emitter.emit_state(CallState::Idle);

        match rx.recv().await.unwrap() {
            CallEvent::Error { kind, .. } => assert_eq!(kind, ErrorKind::NoIncomingCall),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            rx.recv().await.unwrap(),
            CallEvent::StateChanged(CallState::Idle)
        );
    }

    #[test]
    fn emitting_without_subscribers_does_not_fail() {
        EventEmitter::new().emit(CallEvent::MuteChanged(true));
    }
}
