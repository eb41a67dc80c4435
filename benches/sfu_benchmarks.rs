use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

use sfu::capability::RtpSource;
use sfu::domain::{Member, User};
use sfu::error::SfuError;
use sfu::id_types::{RoomId, RoomName, SessionId, UserId};
use sfu::member_session::MemberSession;
use sfu::relay::{OutTrack, Relay};
use sfu::room::Room;
use sfu::room_manager::RoomManager;

struct PendingSource;

#[async_trait]
impl RtpSource for PendingSource {
    fn id(&self) -> String {
        "bench-track".into()
    }
    fn stream_id(&self) -> String {
        "bench-stream".into()
    }
    fn ssrc(&self) -> u32 {
        11223344
    }
    fn codec_capability(&self) -> RTCRtpCodecCapability {
        RTCRtpCodecCapability {
            mime_type: "video/VP8".into(),
            clock_rate: 90000,
            ..Default::default()
        }
    }
    async fn read_rtp(&self) -> Result<Packet, SfuError> {
        std::future::pending().await
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

// 1. Benchmark Packet Cloning (Hot Path Simulation)
fn bench_packet_cloning(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_operations");

    let payload = vec![0u8; 1200];
    let packet = Packet {
        header: Header {
            version: 2,
            payload_type: 96,
            sequence_number: 1234,
            timestamp: 987654321,
            ssrc: 11223344,
            ..Default::default()
        },
        payload: payload.into(),
    };

    group.bench_function("clone_packet", |b| {
        b.iter(|| {
            let _ = packet.clone();
        })
    });

    group.finish();
}

// 2. Benchmark Arc vs String Cloning (Optimization Candidate)
fn bench_string_cloning(c: &mut Criterion) {
    let mut group = c.benchmark_group("string_vs_arc");
    let user_id = "user_123456789_abcdef_long_string";

    group.bench_function("clone_string", |b| {
        let s = user_id.to_string();
        b.iter(|| {
            let _ = s.clone();
        })
    });

    group.bench_function("clone_arc_str", |b| {
        let s: Arc<str> = Arc::from(user_id);
        b.iter(|| {
            let _ = s.clone();
        })
    });

    group.finish();
}

// 3. Benchmark Relay Fan-Out (Async Hot Path)
// Measures `Relay::forward`'s cost fanning a single packet out to 100
// unbound out-tracks (write_rtp is a no-op without a bound sender).
fn bench_relay_forward(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let relay = Relay::new(SessionId::from("speaker"), Arc::new(PendingSource));

    rt.block_on(async {
        for i in 0..100 {
            let out = Arc::new(OutTrack::new(local_track()));
            relay.add_out_track(SessionId::from(format!("sub-{i}")), out).await;
        }
    });

    let packet = Packet {
        header: Header {
            ssrc: 11223344,
            payload_type: 96,
            ..Default::default()
        },
        payload: vec![0u8; 1200].into(),
    };

    let mut group = c.benchmark_group("relay");
    group.bench_function("forward_100_subscribers", |b| {
        b.to_async(&rt).iter(|| {
            let relay = relay.clone();
            let packet = packet.clone();
            async move {
                relay.forward(&packet).await;
            }
        })
    });

    group.finish();
}

// 4. Benchmark Room Manager (State Operations)
fn bench_room_manager(c: &mut Criterion) {
    let mut group = c.benchmark_group("room_manager");

    group.bench_function("create_room", |b| {
        let room_manager = RoomManager::new();
        b.iter(|| {
            let _ = room_manager.create_room(RoomName::from("bench_room"));
        })
    });

    group.bench_function("list_rooms", |b| {
        let rt = Runtime::new().unwrap();
        let room_manager = RoomManager::new();
        for _ in 0..100 {
            room_manager.create_room(RoomName::from("bench_room"));
        }
        b.to_async(&rt).iter(|| {
            let room_manager = &room_manager;
            async move {
                let _ = room_manager.list().await;
            }
        })
    });

    group.finish();
}

fn member_session(name: &str) -> MemberSession {
    MemberSession::new(Member::new(User::guest(UserId::from(name))))
}

// 5. Benchmark Room Broadcast Scaling (Linearity Check)
fn bench_broadcast_scaling(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("broadcast_scaling");
    group.sample_size(10);

    for subscriber_count in [100, 1000, 5000].iter() {
        group.bench_with_input(
            criterion::BenchmarkId::from_parameter(subscriber_count),
            subscriber_count,
            |b, &count| {
                let room = Room::new(RoomId::from("bench"), RoomName::from("bench"));
                rt.block_on(async {
                    for i in 0..count {
                        let sid = SessionId::from(format!("sub-{i}"));
                        room.add_member(sid, member_session(&format!("sub-{i}")), UserId::from(format!("u-{i}")))
                            .await;
                    }
                });

                let from_sid = SessionId::from("speaker-not-a-member");
                b.to_async(&rt).iter(|| {
                    let room = &room;
                    let from_sid = from_sid.clone();
                    async move {
                        let _ = room.broadcast(&from_sid, b"x".to_vec()).await;
                    }
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_packet_cloning,
    bench_string_cloning,
    bench_relay_forward,
    bench_room_manager,
    bench_broadcast_scaling
);
criterion_main!(benches);
