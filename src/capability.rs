//! Abstract boundary between the core (registry/room/relay/orchestrator) and
//! the concrete transports. Nothing in this module depends on `webrtc-rs` or
//! `axum` directly except through the RTP packet/codec types that are part
//! of the wire format itself; the concrete `MediaConnection`/`SignalConnection`
//! implementations live in `media.rs`/`signal_ws.rs`.

use std::sync::Arc;

use async_trait::async_trait;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

use crate::error::SfuError;

/// One signaling frame: a JSON object serialized to bytes.
pub type Frame = Vec<u8>;

/// Outcome of `Room::broadcast`: who received the frame, who didn't because
/// their outbound queue was full.
#[derive(Debug, Default, Clone)]
pub struct PublishResult<Id> {
    pub sent_to: Vec<Id>,
    pub dropped: Vec<Id>,
}

/// A bidirectional signaling endpoint. `try_send` is non-blocking: a full
/// outbound queue yields `SfuError::Backpressure` rather than awaiting
/// capacity, matching the spec's "bounded-capacity channel send... is
/// non-blocking and yields Backpressure when full".
#[async_trait]
pub trait SignalConnection: Send + Sync {
    /// Enqueues `frame` for delivery. Never blocks.
    fn try_send(&self, frame: Frame) -> Result<(), SfuError>;

    /// Idempotent: closing twice is a no-op.
    async fn close(&self);
}

/// One inbound RTP source (a speaker's published track). Mirrors the
/// `RemoteTrackSource` shape used elsewhere in this codebase's track
/// handling, generalized enough that the relay's read loop can be driven by
/// a test double instead of a live `webrtc::track::track_remote::TrackRemote`.
#[async_trait]
pub trait RtpSource: Send + Sync {
    fn id(&self) -> String;
    fn stream_id(&self) -> String;
    fn ssrc(&self) -> u32;
    fn codec_capability(&self) -> RTCRtpCodecCapability;

    /// Blocks until the next RTP packet arrives, or returns an error when
    /// the underlying transport is gone. The relay's read loop marks every
    /// outbound track `Delete` and exits on the first error.
    async fn read_rtp(&self) -> Result<Packet, SfuError>;
}

/// A negotiated ICE candidate as received over signaling.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

pub type OnTrackCallback = Box<dyn Fn(Arc<dyn RtpSource>) + Send + Sync>;
pub type OnClosedCallback = Box<dyn Fn() + Send + Sync>;
pub type OnIceCandidateCallback = Box<dyn Fn(IceCandidateInit) + Send + Sync>;

/// The peer-to-server media session: offer/answer, ICE, and the track/close
/// callbacks the orchestrator wires up in `bind_media_handlers`.
#[async_trait]
pub trait MediaConnection: Send + Sync {
    async fn apply_offer(&self, sdp: String) -> Result<(), SfuError>;
    async fn apply_answer(&self, sdp: String) -> Result<(), SfuError>;

    /// Creates and sets a local answer, waits (bounded) for ICE gathering,
    /// and returns the fully-iced SDP.
    async fn create_and_set_answer(&self) -> Result<String, SfuError>;

    /// Creates and sets a local offer for server-initiated renegotiation.
    async fn create_offer_and_gather(&self) -> Result<String, SfuError>;

    /// An empty candidate string signals end-of-candidates and is ignored.
    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), SfuError>;

    /// Attaches a subscriber's copy of a speaker's track; used by
    /// `Orchestrator::subscribe`.
    async fn add_local_track(&self, track: Arc<TrackLocalStaticRTP>) -> Result<(), SfuError>;

    fn on_ice_candidate(&self, cb: OnIceCandidateCallback);
    fn on_track(&self, cb: OnTrackCallback);
    fn on_closed(&self, cb: OnClosedCallback);

    /// Idempotent.
    async fn close(&self);
}
