use crate::error::CallError;
use crate::signaling::message::SignalingMessage;

/// Connection status of the relay channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Reconnection budget exhausted; no further attempts are made.
    Unavailable,
}

/// Inbound traffic from the relay, delivered in arrival order to one consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    Message(SignalingMessage),
    Status(TransportStatus),
}

/// Outgoing half of the relay channel.
pub trait SignalingTransport: Send + Sync {
    /// Queues `message` for delivery to its `to` party. Fails with
    /// `SignalingUnavailable` once the channel is permanently gone.
    fn send(&self, message: SignalingMessage) -> Result<(), CallError>;
}
