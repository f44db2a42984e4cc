use crate::config::LoggingConfig;
use crate::peer::types::IceCandidate;
use once_cell::sync::OnceCell;
use tracing::debug;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

static INIT: OnceCell<()> = OnceCell::new();

/// Installs the global `tracing` subscriber with timestamped output.
///
/// Safe to call more than once; only the first call has an effect. `RUST_LOG`
/// overrides the configured filter.
pub fn init(config: &LoggingConfig) {
    if !config.enabled {
        return;
    }

    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.filter));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
            .with_target(false)
            .try_init();
    });
}

/// Network path type of an ICE candidate line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateType {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relay,
    Unknown,
}

pub fn candidate_type(candidate: &IceCandidate) -> CandidateType {
    let mut fields = candidate.candidate.split_whitespace();
    while let Some(field) = fields.next() {
        if field == "typ" {
            return match fields.next() {
                Some("host") => CandidateType::Host,
                Some("srflx") => CandidateType::ServerReflexive,
                Some("prflx") => CandidateType::PeerReflexive,
                Some("relay") => CandidateType::Relay,
                _ => CandidateType::Unknown,
            };
        }
    }
    CandidateType::Unknown
}

/// Trickle-ICE trace of a candidate as it is sent or received.
pub fn dump_candidate(label: &str, candidate: &IceCandidate) {
    debug!(
        "Trickle {label}: type={:?} candidate={} sdp_mid={:?} sdp_mline_index={:?}",
        candidate_type(candidate),
        candidate.candidate,
        candidate.sdp_mid,
        candidate.sdp_mline_index
    );
}
