pub mod call;
pub mod config;
pub mod error;
pub mod events;
pub mod logger;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use call::{CallHandle, CallStateMachine};
pub use config::CallConfig;
pub use error::{CallError, ErrorKind, StartupError};
pub use events::CallEvent;
pub use session::{CallState, PartyId};

use media::{AudioOutput, OpusMicrophone, RtpDrainOutput};
use peer::WebRtcConnector;
use signaling::RelayClient;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// A call client wired to the relay, webrtc-rs and the default media
/// endpoints. Must be created inside a tokio runtime.
pub struct CallClient {
    local_id: PartyId,
    handle: CallHandle,
    relay: Arc<RelayClient>,
    speaker: Arc<RtpDrainOutput>,
}

impl CallClient {
    pub fn connect(config: CallConfig, local_id: impl Into<PartyId>) -> Result<Self, StartupError> {
        let local_id = local_id.into();
        if local_id.is_empty() {
            return Err(StartupError::LocalId(local_id.to_string()));
        }
        config.validate()?;
        logger::init(&config.logging);

        let connector = Arc::new(WebRtcConnector::new(&config.ice_servers)?);
        let speaker = Arc::new(RtpDrainOutput::new());

        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let relay = Arc::new(RelayClient::spawn(
            config.relay.clone(),
            local_id.clone(),
            signals_tx,
        ));

        let handle = CallStateMachine::new(
            local_id.clone(),
            relay.clone(),
            connector,
            Arc::new(OpusMicrophone),
            speaker.clone() as Arc<dyn AudioOutput>,
        )
        .with_grace_period(config.grace_period())
        .spawn(signals_rx);

        info!("Call client for {local_id} started, relay {}", config.relay.url);
        Ok(Self {
            local_id,
            handle,
            relay,
            speaker,
        })
    }

    pub fn local_id(&self) -> &PartyId {
        &self.local_id
    }

    pub fn handle(&self) -> &CallHandle {
        &self.handle
    }

    /// RTP packets received from the remote party so far.
    pub fn packets_received(&self) -> u64 {
        self.speaker.packets_received()
    }

    pub fn is_relay_running(&self) -> bool {
        self.relay.is_running()
    }

    /// Hangs up any call in progress, then closes the relay connection once
    /// the hangup has been written out.
    pub async fn shutdown(self) {
        if self.handle.state().is_in_call() {
            let _ = self.handle.end_call().await;
        }
        self.relay.shutdown().await;
    }
}
