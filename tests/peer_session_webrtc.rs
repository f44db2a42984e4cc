use dropcall_lib::media::LocalAudioTrack;
use dropcall_lib::peer::{
    CandidateDisposition, IceCandidate, PeerEventSender, PeerSession, SdpKind, WebRtcConnector,
};
use tokio::sync::mpsc;

fn host_candidate(port: u16) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:1 1 udp 2130706431 127.0.0.1 {port} typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn offer_answer_over_real_connections() {
    // no ICE servers: host candidates only, nothing leaves the machine
    let connector = WebRtcConnector::new(&[]).expect("media engine");
    let (tx, _rx) = mpsc::unbounded_channel();

    let mut caller = PeerSession::open(&connector, "userB".into(), PeerEventSender::new(1, tx.clone()))
        .await
        .expect("caller connection");
    let mut callee = PeerSession::open(&connector, "driverA".into(), PeerEventSender::new(2, tx))
        .await
        .expect("callee connection");

    caller
        .attach_local_track(&LocalAudioTrack::opus("caller-audio", "caller"))
        .await
        .unwrap();
    let offer = caller.create_offer().await.unwrap();
    assert_eq!(offer.kind, SdpKind::Offer);
    assert!(offer.sdp.contains("opus"));
    assert!(caller.local_description_set());

    // a candidate that races ahead of the answer waits in the queue
    assert_eq!(
        caller.add_ice_candidate(host_candidate(50000)).await.unwrap(),
        CandidateDisposition::Queued
    );

    assert_eq!(callee.apply_remote_description(offer).await.unwrap(), 0);
    callee
        .attach_local_track(&LocalAudioTrack::opus("callee-audio", "callee"))
        .await
        .unwrap();
    let answer = callee.create_answer().await.unwrap();
    assert_eq!(answer.kind, SdpKind::Answer);

    assert_eq!(caller.apply_remote_description(answer).await.unwrap(), 1);
    assert!(caller.remote_description_set());
    assert_eq!(caller.pending_candidates(), 0);
    assert_eq!(
        caller.add_ice_candidate(host_candidate(50001)).await.unwrap(),
        CandidateDisposition::Applied
    );

    caller.close().await;
    callee.close().await;
    assert!(caller.is_closed());
    assert!(caller.create_offer().await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn garbage_offer_is_rejected_without_committing() {
    let connector = WebRtcConnector::new(&[]).expect("media engine");
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut callee = PeerSession::open(&connector, "driverA".into(), PeerEventSender::new(1, tx))
        .await
        .unwrap();

    let result = callee
        .apply_remote_description(dropcall_lib::peer::SessionDescription::offer("garbage"))
        .await;
    assert!(result.is_err());
    assert!(!callee.remote_description_set());
    assert!(callee.create_answer().await.is_err());
    callee.close().await;
}
