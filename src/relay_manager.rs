use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::capability::RtpSource;
use crate::id_types::SessionId;
use crate::metrics::{RELAYS_STARTED_TOTAL, RELAYS_STOPPED_TOTAL};
use crate::relay::{OutTrack, Relay};

/// Maintains `SessionId -> Relay` for every speaker currently producing
/// media. Concurrent map, matching this codebase's `DashMap`-per-registry
/// idiom.
#[derive(Default)]
pub struct RelayManager {
    relays: DashMap<SessionId, Arc<Relay>>,
}

impl RelayManager {
    pub fn new() -> Self {
        RelayManager {
            relays: DashMap::new(),
        }
    }

    /// If a relay for `sid` already exists, its outbound tracks are marked
    /// `Delete` and it is cancelled before the new one is installed and
    /// spawned.
    pub fn start_relay(&self, sid: SessionId, src: Arc<dyn RtpSource>) -> Arc<Relay> {
        if let Some((_, old)) = self.relays.remove(&sid) {
            info!(sid = %sid, "replacing existing relay");
            old.cancel();
        }
        let relay = Relay::new(sid.clone(), src);
        self.relays.insert(sid, relay.clone());
        tokio::spawn(relay.clone().run());
        RELAYS_STARTED_TOTAL.inc();
        relay
    }

    pub fn has_relay(&self, sid: &SessionId) -> bool {
        self.relays.contains_key(sid)
    }

    pub fn get(&self, sid: &SessionId) -> Option<Arc<Relay>> {
        self.relays.get(sid).map(|r| r.clone())
    }

    /// Inserts an `OutTrack{state=Ok}` into the source relay; a no-op if the
    /// relay is gone.
    pub async fn add_subscriber(&self, src_sid: &SessionId, dst_sid: SessionId, out: Arc<OutTrack>) {
        if let Some(relay) = self.relays.get(src_sid) {
            relay.add_out_track(dst_sid, out).await;
        }
    }

    /// Non-blocking: flips the outtrack's atomic state. The next forward
    /// iteration removes it.
    pub async fn mark_subscriber_delete(&self, src_sid: &SessionId, dst_sid: &SessionId) {
        if let Some(relay) = self.relays.get(src_sid) {
            relay.mark_delete(dst_sid).await;
        }
    }

    /// Removes the relay from the map and marks all its outbound tracks
    /// `Delete`.
    pub async fn stop_relay(&self, sid: &SessionId) {
        if let Some((_, relay)) = self.relays.remove(sid) {
            relay.mark_all_delete().await;
            relay.cancel();
            RELAYS_STOPPED_TOTAL.inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use webrtc::rtp::packet::Packet;
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
    use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

    use crate::error::SfuError;

    struct NeverReadsSource;

    #[async_trait]
    impl RtpSource for NeverReadsSource {
        fn id(&self) -> String {
            "t".into()
        }
        fn stream_id(&self) -> String {
            "s".into()
        }
        fn ssrc(&self) -> u32 {
            1
        }
        fn codec_capability(&self) -> RTCRtpCodecCapability {
            RTCRtpCodecCapability::default()
        }
        async fn read_rtp(&self) -> Result<Packet, SfuError> {
            std::future::pending().await
        }
    }

    struct ErroringSource;

    #[async_trait]
    impl RtpSource for ErroringSource {
        fn id(&self) -> String {
            "t".into()
        }
        fn stream_id(&self) -> String {
            "s".into()
        }
        fn ssrc(&self) -> u32 {
            2
        }
        fn codec_capability(&self) -> RTCRtpCodecCapability {
            RTCRtpCodecCapability::default()
        }
        async fn read_rtp(&self) -> Result<Packet, SfuError> {
            Err(SfuError::Transport("gone".into()))
        }
    }

    fn local_track() -> Arc<TrackLocalStaticRTP> {
        Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability::default(),
            "out".into(),
            "stream".into(),
        ))
    }

    #[tokio::test]
    async fn start_relay_replaces_existing_and_marks_delete() {
        let mgr = RelayManager::new();
        let sid = SessionId::from("speaker");

        let first = mgr.start_relay(sid.clone(), Arc::new(NeverReadsSource));
        let out = Arc::new(OutTrack::new(local_track()));
        first.add_out_track(SessionId::from("sub"), out.clone()).await;

        let second = mgr.start_relay(sid.clone(), Arc::new(NeverReadsSource));
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(mgr.has_relay(&sid));

        // Give the cancelled relay's task a chance to observe cancellation.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(out.state(), crate::relay::TrackState::Delete);
    }

    #[tokio::test]
    async fn stop_relay_removes_and_marks_delete() {
        let mgr = RelayManager::new();
        let sid = SessionId::from("speaker");
        let relay = mgr.start_relay(sid.clone(), Arc::new(NeverReadsSource));
        let out = Arc::new(OutTrack::new(local_track()));
        relay.add_out_track(SessionId::from("sub"), out.clone()).await;

        mgr.stop_relay(&sid).await;

        assert!(!mgr.has_relay(&sid));
        assert_eq!(out.state(), crate::relay::TrackState::Delete);
    }

    #[tokio::test]
    async fn mark_subscriber_delete_is_noop_when_relay_gone() {
        let mgr = RelayManager::new();
        let sid = SessionId::from("speaker");
        // No relay started; this must not panic.
        mgr.mark_subscriber_delete(&sid, &SessionId::from("dst")).await;
    }

    #[tokio::test]
    async fn relay_read_error_tears_itself_down() {
        let mgr = RelayManager::new();
        let sid = SessionId::from("speaker");
        let relay = mgr.start_relay(sid.clone(), Arc::new(ErroringSource));
        let out = Arc::new(OutTrack::new(local_track()));
        relay.add_out_track(SessionId::from("sub"), out.clone()).await;

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(out.state(), crate::relay::TrackState::Delete);
    }
}
