use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;

use crate::capability::RtpSource;
use crate::id_types::SessionId;
use crate::metrics::{OUT_TRACKS_DELETED_TOTAL, RTP_PACKETS_DROPPED_TOTAL, RTP_PACKETS_FORWARDED_TOTAL};

/// Per-outtrack state, a single atomic word so `mark_delete` never needs the
/// relay's lock.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Ok = 0,
    Muted = 1,
    Delete = 2,
}

impl From<u8> for TrackState {
    fn from(v: u8) -> Self {
        match v {
            0 => TrackState::Ok,
            1 => TrackState::Muted,
            _ => TrackState::Delete,
        }
    }
}

/// One subscriber's outbound side of a relay.
pub struct OutTrack {
    pub track: Arc<TrackLocalStaticRTP>,
    state: AtomicU8,
}

impl OutTrack {
    pub fn new(track: Arc<TrackLocalStaticRTP>) -> Self {
        OutTrack {
            track,
            state: AtomicU8::new(TrackState::Ok as u8),
        }
    }

    pub fn state(&self) -> TrackState {
        TrackState::from(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: TrackState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// The per-speaker forwarder: one inbound RTP source fanned out to one local
/// outbound track per subscriber in the same room.
pub struct Relay {
    speaker: SessionId,
    src: Arc<dyn RtpSource>,
    out_tracks: RwLock<HashMap<SessionId, Arc<OutTrack>>>,
    cancel: CancellationToken,
}

impl Relay {
    pub fn new(speaker: SessionId, src: Arc<dyn RtpSource>) -> Arc<Self> {
        Arc::new(Relay {
            speaker,
            src,
            out_tracks: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn src_ssrc(&self) -> u32 {
        self.src.ssrc()
    }

    pub fn src_codec(&self) -> webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability {
        self.src.codec_capability()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn add_out_track(&self, dst: SessionId, out: Arc<OutTrack>) {
        self.out_tracks.write().await.insert(dst, out);
    }

    pub async fn mark_delete(&self, dst: &SessionId) {
        if let Some(ot) = self.out_tracks.read().await.get(dst) {
            ot.set_state(TrackState::Delete);
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.out_tracks.read().await.len()
    }

    pub async fn mark_all_delete(&self) {
        for ot in self.out_tracks.read().await.values() {
            ot.set_state(TrackState::Delete);
        }
    }

    /// Runs the dedicated read loop for this relay until `src.read_rtp()`
    /// errors or `cancel()` fires. Spawned once by `RelayManager::start_relay`.
    pub async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(speaker = %self.speaker, "relay cancelled, marking all out tracks for delete");
                    self.mark_all_delete().await;
                    return;
                }
                pkt = self.src.read_rtp() => {
                    match pkt {
                        Ok(packet) => self.forward(&packet).await,
                        Err(err) => {
                            error!(speaker = %self.speaker, %err, "relay read RTP error, stopping");
                            self.mark_all_delete().await;
                            return;
                        }
                    }
                }
            }
        }
    }

    fn media_type(&self) -> &'static str {
        if self.src.codec_capability().mime_type.to_lowercase().starts_with("audio") {
            "audio"
        } else {
            "video"
        }
    }

    /// Fans `packet` out to every subscriber out-track, pruning any marked
    /// `Delete` or that failed to write. Called from `run`'s read loop; also
    /// exposed directly for benchmarking the fan-out cost in isolation.
    pub async fn forward(&self, packet: &webrtc::rtp::packet::Packet) {
        // Snapshot under the read lock so slow `write_rtp` calls never block
        // `add_out_track`/`mark_delete`.
        let snapshot: Vec<(SessionId, Arc<OutTrack>)> = {
            let guard = self.out_tracks.read().await;
            guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        let media_type = self.media_type();
        let mut dirty = Vec::new();
        for (dst, ot) in snapshot {
            match ot.state() {
                TrackState::Delete => dirty.push(dst),
                TrackState::Muted => continue,
                TrackState::Ok => {
                    if let Err(err) = ot.track.write_rtp(packet).await {
                        warn!(speaker = %self.speaker, dst = %dst, %err, "relay write RTP error, marking outtrack for delete");
                        ot.set_state(TrackState::Delete);
                        dirty.push(dst);
                        RTP_PACKETS_DROPPED_TOTAL.with_label_values(&["write_error"]).inc();
                    } else {
                        RTP_PACKETS_FORWARDED_TOTAL.with_label_values(&[media_type]).inc();
                    }
                }
            }
        }

        if !dirty.is_empty() {
            let mut guard = self.out_tracks.write().await;
            for dst in dirty {
                debug!(speaker = %self.speaker, dst = %dst, "removing deleted outtrack");
                guard.remove(&dst);
                OUT_TRACKS_DELETED_TOTAL.inc();
            }
        }
    }
}
