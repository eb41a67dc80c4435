use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec,
    IntGauge,
};

lazy_static! {
    pub static ref ACTIVE_ROOMS: IntGauge =
        register_int_gauge!("sfu_active_rooms", "Number of currently active rooms").unwrap();
    pub static ref ACTIVE_SESSIONS: IntGauge =
        register_int_gauge!("sfu_active_sessions", "Number of currently bound signaling sessions")
            .unwrap();
    pub static ref RELAYS_STARTED_TOTAL: IntCounter = register_int_counter!(
        "sfu_relays_started_total",
        "Total number of per-speaker relays started"
    )
    .unwrap();
    pub static ref RELAYS_STOPPED_TOTAL: IntCounter = register_int_counter!(
        "sfu_relays_stopped_total",
        "Total number of per-speaker relays stopped"
    )
    .unwrap();
    pub static ref OUT_TRACKS_DELETED_TOTAL: IntCounter = register_int_counter!(
        "sfu_out_tracks_deleted_total",
        "Total number of subscriber out-tracks marked for deletion"
    )
    .unwrap();
    pub static ref BACKPRESSURE_KICKS_TOTAL: IntCounter = register_int_counter!(
        "sfu_backpressure_kicks_total",
        "Total number of sessions kicked by the backpressure policy"
    )
    .unwrap();
    pub static ref RTP_PACKETS_FORWARDED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "sfu_rtp_packets_forwarded_total",
        "Total number of RTP packets forwarded by a relay",
        &["media_type"]
    )
    .unwrap();
    pub static ref RTP_PACKETS_DROPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "sfu_rtp_packets_dropped_total",
        "Total number of RTP packets dropped while forwarding",
        &["reason"]
    )
    .unwrap();
}

/// Forces lazy initialization of every metric, so `/metrics` reports a zero
/// value before the first event rather than omitting the series entirely.
pub fn register() {
    let _ = ACTIVE_ROOMS.get();
    let _ = ACTIVE_SESSIONS.get();
    let _ = RELAYS_STARTED_TOTAL.get();
    let _ = RELAYS_STOPPED_TOTAL.get();
    let _ = OUT_TRACKS_DELETED_TOTAL.get();
    let _ = BACKPRESSURE_KICKS_TOTAL.get();
    let _ = RTP_PACKETS_FORWARDED_TOTAL.with_label_values(&["video"]).get();
    let _ = RTP_PACKETS_DROPPED_TOTAL.with_label_values(&["none"]).get();
}

/// Renders the Prometheus text exposition format for the `/metrics` route.
pub fn render() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let _ = encoder.encode(&metric_families, &mut buffer);
    String::from_utf8(buffer).unwrap_or_default()
}
