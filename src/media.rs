//! The concrete WebRTC `MediaConnection`/`RtpSource` adapter. Everything
//! else in this crate only ever sees the `capability` traits; this module
//! is where `webrtc-rs` actually lives.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry as InterceptorRegistry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTCRtpHeaderExtensionCapability, RTPCodecType,
};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::capability::{
    IceCandidateInit, MediaConnection, OnClosedCallback, OnIceCandidateCallback, OnTrackCallback,
    RtpSource,
};
use crate::error::SfuError;

/// How long `create_and_set_answer` waits for ICE gathering before returning
/// whatever candidates are in hand. Trickle ICE over signaling makes waiting
/// longer than this pointless.
const ICE_GATHER_TIMEOUT: Duration = Duration::from_millis(1500);

/// Builds the shared media engine: Opus, VP8, H264, plus the header
/// extensions the rest of the stack (simulcast, transport-wide congestion
/// control) expects to see negotiated.
pub fn build_api() -> webrtc::api::API {
    let mut media_engine = MediaEngine::default();

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: "audio/opus".to_owned(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                    ..Default::default()
                },
                payload_type: 111,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )
        .unwrap_or_else(|e| panic!("failed to register opus codec: {}", e));

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: "video/VP8".to_owned(),
                    clock_rate: 90000,
                    ..Default::default()
                },
                payload_type: 96,
                ..Default::default()
            },
            RTPCodecType::Video,
        )
        .unwrap_or_else(|e| panic!("failed to register vp8 codec: {}", e));

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: "video/H264".to_owned(),
                    clock_rate: 90000,
                    sdp_fmtp_line:
                        "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                            .to_owned(),
                    ..Default::default()
                },
                payload_type: 102,
                ..Default::default()
            },
            RTPCodecType::Video,
        )
        .unwrap_or_else(|e| error!("failed to register h264 codec: {}", e));

    let extensions = [
        "urn:ietf:params:rtp-hdrext:sdes:mid",
        "urn:ietf:params:rtp-hdrext:sdes:rtp-stream-id",
        "urn:ietf:params:rtp-hdrext:sdes:repaired-rtp-stream-id",
        "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time",
        "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01",
        "urn:ietf:params:rtp-hdrext:ssrc-audio-level",
        "urn:ietf:params:rtp-hdrext:toffset",
        "urn:3gpp:video-orientation",
        "http://www.webrtc.org/experiments/rtp-hdrext/video-content-type",
    ];
    for uri in extensions {
        let cap = RTCRtpHeaderExtensionCapability { uri: uri.to_string() };
        let _ = media_engine.register_header_extension(cap.clone(), RTPCodecType::Video, None);
        let _ = media_engine.register_header_extension(cap, RTPCodecType::Audio, None);
    }

    let mut registry = InterceptorRegistry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .unwrap_or_else(|e| panic!("failed to register default interceptors: {}", e));

    APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build()
}

/// Builds the `RTCConfiguration` from a single STUN URL; the caller reads
/// the URL out of the loaded config.
pub fn build_rtc_config(stun_url: &str) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: vec![stun_url.to_string()],
            ..Default::default()
        }],
        bundle_policy: RTCBundlePolicy::MaxBundle,
        ..Default::default()
    }
}

/// One peer's WebRTC session with the server.
pub struct WebrtcMediaConnection {
    pc: Arc<RTCPeerConnection>,
}

impl WebrtcMediaConnection {
    pub async fn new(api: &webrtc::api::API, config: RTCConfiguration) -> Result<Self, SfuError> {
        let pc = api
            .new_peer_connection(config)
            .await
            .map_err(|e| SfuError::Media(e.to_string()))?;
        Ok(WebrtcMediaConnection { pc: Arc::new(pc) })
    }
}

#[async_trait]
impl MediaConnection for WebrtcMediaConnection {
    async fn apply_offer(&self, sdp: String) -> Result<(), SfuError> {
        let desc = RTCSessionDescription::offer(sdp).map_err(|e| SfuError::Media(e.to_string()))?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| SfuError::Media(e.to_string()))
    }

    async fn apply_answer(&self, sdp: String) -> Result<(), SfuError> {
        let desc = RTCSessionDescription::answer(sdp).map_err(|e| SfuError::Media(e.to_string()))?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| SfuError::Media(e.to_string()))
    }

    async fn create_and_set_answer(&self) -> Result<String, SfuError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| SfuError::Media(e.to_string()))?;
        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| SfuError::Media(e.to_string()))?;
        let _ = tokio::time::timeout(ICE_GATHER_TIMEOUT, gather_complete.recv()).await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| SfuError::Media("no local description after set_local_description".into()))?;
        Ok(local.sdp)
    }

    async fn create_offer_and_gather(&self) -> Result<String, SfuError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| SfuError::Media(e.to_string()))?;
        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| SfuError::Media(e.to_string()))?;
        let _ = tokio::time::timeout(ICE_GATHER_TIMEOUT, gather_complete.recv()).await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| SfuError::Media("no local description after set_local_description".into()))?;
        Ok(local.sdp)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), SfuError> {
        if candidate.candidate.is_empty() {
            return Ok(());
        }
        let init = webrtc::ice_transport::ice_candidate::RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            ..Default::default()
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| SfuError::Media(e.to_string()))
    }

    async fn add_local_track(&self, track: Arc<TrackLocalStaticRTP>) -> Result<(), SfuError> {
        self.pc
            .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| SfuError::Media(e.to_string()))?;
        Ok(())
    }

    fn on_ice_candidate(&self, cb: OnIceCandidateCallback) {
        let cb = Arc::new(cb);
        self.pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let cb = cb.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                let Ok(init) = candidate.to_json() else { return };
                cb(IceCandidateInit {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                });
            })
        }));
    }

    fn on_track(&self, cb: OnTrackCallback) {
        let cb = Arc::new(cb);
        self.pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let cb = cb.clone();
            Box::pin(async move {
                cb(track);
            })
        }));
    }

    fn on_closed(&self, cb: OnClosedCallback) {
        let cb = Arc::new(cb);
        self.pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let cb = cb.clone();
            Box::pin(async move {
                if matches!(
                    state,
                    RTCPeerConnectionState::Closed
                        | RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Disconnected
                ) {
                    cb();
                }
            })
        }));
    }

    async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            warn!(%err, "peer connection close failed, likely already closed");
        }
    }
}

#[async_trait]
impl RtpSource for TrackRemote {
    fn id(&self) -> String {
        self.id()
    }
    fn stream_id(&self) -> String {
        self.stream_id()
    }
    fn ssrc(&self) -> u32 {
        self.ssrc()
    }
    fn codec_capability(&self) -> RTCRtpCodecCapability {
        self.codec().capability
    }
    async fn read_rtp(&self) -> Result<Packet, SfuError> {
        self.read_rtp()
            .await
            .map(|(packet, _attrs)| packet)
            .map_err(|e| SfuError::Transport(e.to_string()))
    }
}
