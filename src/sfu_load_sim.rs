//! Standalone load simulator for the relay fan-out hot path: one speaker
//! relay with many subscriber out-tracks, fed packets as fast as the relay
//! can drain them. Out-tracks here are never bound to a real peer
//! connection, so `write_rtp` is a pure buffer-copy no-op — this measures
//! the relay's own fan-out cost, not network throughput.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sfu::capability::RtpSource;
use sfu::error::SfuError;
use sfu::id_types::SessionId;
use sfu::relay::{OutTrack, Relay};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

const SUBSCRIBER_COUNT: u32 = 500;
const RUN_FOR: Duration = Duration::from_secs(30);

struct FauxSource {
    rx: tokio::sync::Mutex<mpsc::Receiver<Packet>>,
}

#[async_trait]
impl RtpSource for FauxSource {
    fn id(&self) -> String {
        "speaker-track".into()
    }
    fn stream_id(&self) -> String {
        "speaker-stream".into()
    }
    fn ssrc(&self) -> u32 {
        12345
    }
    fn codec_capability(&self) -> RTCRtpCodecCapability {
        RTCRtpCodecCapability {
            mime_type: "video/VP8".into(),
            clock_rate: 90000,
            ..Default::default()
        }
    }
    async fn read_rtp(&self) -> Result<Packet, SfuError> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| SfuError::Transport("load sim feed closed".into()))
    }
}

fn local_track() -> Arc<TrackLocalStaticRTP> {
    Arc::new(TrackLocalStaticRTP::new(
        RTCRtpCodecCapability {
            mime_type: "video/VP8".into(),
            clock_rate: 90000,
            ..Default::default()
        },
        "out".to_string(),
        "out-stream".to_string(),
    ))
}

fn main() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        println!("Starting relay fan-out load simulator...");

        let (tx, rx) = mpsc::channel(1024);
        let source = Arc::new(FauxSource {
            rx: tokio::sync::Mutex::new(rx),
        });
        let relay = Relay::new(SessionId::from("speaker"), source);

        println!("Adding {SUBSCRIBER_COUNT} subscribers...");
        for i in 0..SUBSCRIBER_COUNT {
            let out = Arc::new(OutTrack::new(local_track()));
            relay.add_out_track(SessionId::from(format!("sub-{i}")), out).await;
        }

        let forwarded = Arc::new(AtomicU32::new(0));
        tokio::spawn(relay.clone().run());

        println!("Feeding 60fps-equivalent video traffic for {:?}...", RUN_FOR);
        let start = Instant::now();
        let mut loop_start = Instant::now();
        let mut seq: u16 = 0;
        let mut count = 0u64;

        while start.elapsed() < RUN_FOR {
            seq = seq.wrapping_add(1);
            let packet = Packet {
                header: Header {
                    sequence_number: seq,
                    timestamp: (seq as u32).wrapping_mul(3000),
                    ssrc: 12345,
                    payload_type: 96,
                    version: 2,
                    ..Default::default()
                },
                payload: vec![0u8; 1200].into(),
            };
            if tx.send(packet).await.is_err() {
                break;
            }
            forwarded.fetch_add(1, Ordering::Relaxed);
            count += 1;

            if count % 1000 == 0 {
                let elapsed = loop_start.elapsed().as_secs_f64();
                if elapsed > 1.0 {
                    println!(
                        "  {:.0} packets/sec sent ({:.1} Mbps effective fan-out)",
                        count as f64 / elapsed,
                        (count as f64 * 1200.0 * 8.0 * SUBSCRIBER_COUNT as f64) / elapsed / 1_000_000.0
                    );
                    count = 0;
                    loop_start = Instant::now();
                }
            }
        }

        relay.cancel();
        println!("Simulation complete.");
    });
}
