use crate::error::CallError;
use crate::events::{CallEvent, EventEmitter};
use crate::peer::types::CallId;
use crate::session::{CallState, PartyId};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

pub type Reply<T> = oneshot::Sender<Result<T, CallError>>;

/// User intent queued for the state machine.
#[derive(Debug)]
pub enum UserAction {
    StartCall { remote: PartyId, reply: Reply<()> },
    AcceptCall { reply: Reply<()> },
    /// `call` is the call that was current when the user hung up, 0 if none.
    EndCall { call: CallId, reply: Reply<()> },
    ToggleMute { reply: Reply<bool> },
    PlayRemoteAudio { reply: Reply<()> },
}

#[derive(Debug, Default)]
struct HangupState {
    current: AtomicU64,
    requested: AtomicU64,
}

/// Out-of-band hangup flag shared between handles and the state machine.
///
/// A hangup is recorded here before the `EndCall` action is queued, so a
/// step that is still awaiting (microphone permission, negotiation) sees it
/// as soon as it settles and can discard its result.
#[derive(Debug, Clone, Default)]
pub struct HangupSignal {
    inner: Arc<HangupState>,
}

impl HangupSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `call_id` as the live call.
    pub fn begin(&self, call_id: CallId) {
        self.inner.current.store(call_id, Ordering::SeqCst);
    }

    pub fn finish(&self) {
        self.inner.current.store(0, Ordering::SeqCst);
    }

    pub fn current(&self) -> CallId {
        self.inner.current.load(Ordering::SeqCst)
    }

    /// Requests hangup of the live call and returns its id (0 if none).
    pub fn request(&self) -> CallId {
        let call_id = self.current();
        if call_id != 0 {
            self.inner.requested.store(call_id, Ordering::SeqCst);
        }
        call_id
    }

    pub fn is_requested(&self, call_id: CallId) -> bool {
        call_id != 0 && self.inner.requested.load(Ordering::SeqCst) == call_id
    }

    pub fn check(&self, call_id: CallId) -> Result<(), CallError> {
        if self.is_requested(call_id) {
            return Err(CallError::Cancelled);
        }
        Ok(())
    }
}

/// Cloneable front door to a running call state machine.
#[derive(Clone)]
pub struct CallHandle {
    actions: mpsc::UnboundedSender<UserAction>,
    hangup: HangupSignal,
    events: EventEmitter,
    state: watch::Receiver<CallState>,
}

impl CallHandle {
    pub(crate) fn new(
        actions: mpsc::UnboundedSender<UserAction>,
        hangup: HangupSignal,
        events: EventEmitter,
        state: watch::Receiver<CallState>,
    ) -> Self {
        Self {
            actions,
            hangup,
            events,
            state,
        }
    }

    async fn request<T>(
        &self,
        action: impl FnOnce(Reply<T>) -> UserAction,
    ) -> Result<T, CallError> {
        let (reply, rx) = oneshot::channel();
        self.actions
            .send(action(reply))
            .map_err(|_| CallError::Shutdown)?;
        rx.await.map_err(|_| CallError::Shutdown)?
    }

    pub async fn start_call(&self, remote: impl Into<PartyId>) -> Result<(), CallError> {
        let remote = remote.into();
        self.request(|reply| UserAction::StartCall { remote, reply })
            .await
    }

    pub async fn accept_call(&self) -> Result<(), CallError> {
        self.request(|reply| UserAction::AcceptCall { reply }).await
    }

    /// Hangs up. The hangup is registered when this is called, not when the
    /// returned future is first polled, and is honoured even while a previous
    /// action is still awaiting.
    pub fn end_call(&self) -> impl Future<Output = Result<(), CallError>> + '_ {
        let call = self.hangup.request();
        self.request(move |reply| UserAction::EndCall { call, reply })
    }

    /// Returns the resulting mute flag.
    pub async fn toggle_mute(&self) -> Result<bool, CallError> {
        self.request(|reply| UserAction::ToggleMute { reply }).await
    }

    pub async fn play_remote_audio(&self) -> Result<(), CallError> {
        self.request(|reply| UserAction::PlayRemoteAudio { reply })
            .await
    }

    pub fn state(&self) -> CallState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<CallState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.actions.is_closed()
    }
}
