pub mod connection;
pub mod ice;
pub mod session;
pub mod types;

pub use connection::{PeerConnection, PeerConnector, WebRtcConnector};
pub use ice::IceCandidateQueue;
pub use session::{CandidateDisposition, PeerSession};
pub use types::{
    CallId, IceCandidate, PeerConnectionState, PeerEvent, PeerEventSender, RemoteStream, SdpKind,
    SessionDescription,
};
