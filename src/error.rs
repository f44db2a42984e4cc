use std::fmt;
use thiserror::Error;

/// Category of a call failure, as reported to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SignalingUnavailable,
    MediaAccessDenied,
    NegotiationFailed,
    NoIncomingCall,
    NoActiveSession,
    PlaybackBlocked,
    CallInProgress,
    InvalidParty,
    Cancelled,
    Shutdown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SignalingUnavailable => "SignalingUnavailable",
            ErrorKind::MediaAccessDenied => "MediaAccessDenied",
            ErrorKind::NegotiationFailed => "NegotiationFailed",
            ErrorKind::NoIncomingCall => "NoIncomingCall",
            ErrorKind::NoActiveSession => "NoActiveSession",
            ErrorKind::PlaybackBlocked => "PlaybackBlocked",
            ErrorKind::CallInProgress => "CallInProgress",
            ErrorKind::InvalidParty => "InvalidParty",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Shutdown => "Shutdown",
        }
    }

    /// Only an unreachable relay blocks new calls; everything else can be retried.
    pub fn is_blocking(&self) -> bool {
        matches!(self, ErrorKind::SignalingUnavailable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a call operation. Every asynchronous failure is converted into
/// one of these at its call site.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("signaling relay is unavailable")]
    SignalingUnavailable,
    #[error("microphone access denied: {0}")]
    MediaAccessDenied(String),
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),
    #[error("there is no incoming call to accept")]
    NoIncomingCall,
    #[error("no active session: {0}")]
    NoActiveSession(String),
    #[error("remote audio playback blocked: {0}")]
    PlaybackBlocked(String),
    #[error("a call with {0} is already in progress")]
    CallInProgress(String),
    #[error("invalid remote party: {0}")]
    InvalidParty(String),
    #[error("call attempt was cancelled")]
    Cancelled,
    #[error("call service has shut down")]
    Shutdown,
}

impl CallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::SignalingUnavailable => ErrorKind::SignalingUnavailable,
            CallError::MediaAccessDenied(_) => ErrorKind::MediaAccessDenied,
            CallError::NegotiationFailed(_) => ErrorKind::NegotiationFailed,
            CallError::NoIncomingCall => ErrorKind::NoIncomingCall,
            CallError::NoActiveSession(_) => ErrorKind::NoActiveSession,
            CallError::PlaybackBlocked(_) => ErrorKind::PlaybackBlocked,
            CallError::CallInProgress(_) => ErrorKind::CallInProgress,
            CallError::InvalidParty(_) => ErrorKind::InvalidParty,
            CallError::Cancelled => ErrorKind::Cancelled,
            CallError::Shutdown => ErrorKind::Shutdown,
        }
    }

    /// Whether this failure should be surfaced to the UI as an `error` event.
    pub fn is_reported(&self) -> bool {
        !matches!(self, CallError::Cancelled | CallError::Shutdown)
    }
}

/// Failure inside a peer connection backend.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error(transparent)]
    WebRtc(#[from] webrtc::Error),
    #[error("peer connection is closed")]
    Closed,
    #[error("{0}")]
    Rejected(String),
}

impl From<PeerError> for CallError {
    fn from(err: PeerError) -> Self {
        CallError::NegotiationFailed(err.to_string())
    }
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid relay url: {0}")]
    RelayUrl(#[from] url::ParseError),
    #[error("{0}")]
    Invalid(String),
}

/// Failure to bring up a call client.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to initialise media stack: {0}")]
    Peer(#[from] PeerError),
    #[error("invalid local identity {0:?}")]
    LocalId(String),
}
