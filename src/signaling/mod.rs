pub mod message;
pub mod relay;
pub mod transport;

pub use message::SignalingMessage;
pub use relay::RelayClient;
pub use transport::{SignalEvent, SignalingTransport, TransportStatus};
