use std::sync::Arc;

use tracing::{info, warn};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

use crate::capability::{Frame, MediaConnection, RtpSource};
use crate::error::SfuError;
use crate::id_types::{RoomId, SessionId};
use crate::member_session::MemberSession;
use crate::metrics::BACKPRESSURE_KICKS_TOTAL;
use crate::policy::{BackpressureAction, KickOnBackpressure, Policy};
use crate::registry::Registry;
use crate::relay::OutTrack;
use crate::relay_manager::RelayManager;
use crate::room_manager::RoomManager;

/// The only component that mutates registry, room sets, and relay graph
/// together. Every method here is safe to call concurrently from
/// signaling, media-callback, or HTTP call sites; it carries no tasks of
/// its own and runs entirely on the caller's task.
pub struct Orchestrator {
    pub registry: Arc<Registry>,
    pub rooms: Arc<RoomManager>,
    pub relays: Arc<RelayManager>,
    pub policy: Arc<dyn Policy>,
}

impl Orchestrator {
    pub fn new(registry: Arc<Registry>, rooms: Arc<RoomManager>, relays: Arc<RelayManager>) -> Self {
        Orchestrator {
            registry,
            rooms,
            relays,
            policy: Arc::new(KickOnBackpressure),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policy = policy;
        self
    }

    /// Idempotent: if the caller is already in a room, logs and no-ops.
    pub async fn join(&self, sid: &SessionId, room_id: RoomId) -> Result<(), SfuError> {
        if let Some((existing, _)) = self.registry.room_of(sid) {
            info!(sid = %sid, room = %existing, "join: already in a room, no-op");
            return Ok(());
        }
        let session = self
            .registry
            .get_session(sid)
            .ok_or_else(|| SfuError::NotFound(format!("no session {sid}")))?;
        let room = self
            .rooms
            .get_room(&room_id)
            .ok_or_else(|| SfuError::NotFound(format!("no room {room_id}")))?;
        let user_id = session.meta().await.user.id;
        room.add_member(sid.clone(), session, user_id).await;
        self.registry.update_room(sid, room_id.clone());
        info!(sid = %sid, room = %room_id, "joined room");
        Ok(())
    }

    pub async fn kick_by_sid(&self, sid: &SessionId) {
        self.cleanup_media(sid).await;
        self.cleanup_membership(sid).await;
    }

    /// Mark-delete on roommates happens strictly before registry
    /// disassociation, so `room_mates` still returns them while we unwind
    /// the speaker's relay.
    async fn cleanup_media(&self, sid: &SessionId) {
        if self.relays.has_relay(sid) {
            self.relays.stop_relay(sid).await;
        }
        for (mate_sid, _) in self.registry.room_mates(sid) {
            self.relays.mark_subscriber_delete(&mate_sid, sid).await;
        }
        if let Some(session) = self.registry.get_session(sid) {
            session.close_media().await;
        }
    }

    async fn cleanup_membership(&self, sid: &SessionId) {
        if let Some((room_id, _)) = self.registry.room_of(sid) {
            if let Some(room) = self.rooms.get_room(&room_id) {
                room.remove_member(sid).await;
            }
        }
        self.registry.remove_room(sid);
    }

    /// If not bound or already in the target room, short-circuits.
    pub async fn move_to(&self, sid: &SessionId, to_room: RoomId) -> Result<bool, SfuError> {
        let Some((from_room, session)) = self.registry.room_of(sid) else {
            return Ok(false);
        };
        if from_room == to_room {
            return Ok(true);
        }
        let dst = self
            .rooms
            .get_room(&to_room)
            .ok_or_else(|| SfuError::NotFound(format!("no room {to_room}")))?;

        for (mate_sid, _) in self.registry.room_mates(sid) {
            self.relays.mark_subscriber_delete(&mate_sid, sid).await;
        }
        if let Some(src) = self.rooms.get_room(&from_room) {
            src.remove_member(sid).await;
        }
        let user_id = session.meta().await.user.id;
        dst.add_member(sid.clone(), session, user_id).await;
        let moved = self.registry.update_room(sid, to_room.clone());
        self.on_media_ready(sid).await;
        Ok(moved)
    }

    pub async fn evict_room(&self, room_id: &RoomId) {
        let members = self.registry.members_of_room(room_id);
        for (sid, _) in members {
            self.kick_by_sid(&sid).await;
        }
        self.rooms.stop_room(room_id);
    }

    /// Signaling-layer broadcast used outside of media (chat-style frames);
    /// applies the configured `Policy` to every session the broadcast
    /// couldn't reach.
    pub async fn on_frame_received(&self, sid: &SessionId, data: Frame) {
        let Some((room_id, _)) = self.registry.room_of(sid) else {
            return;
        };
        let Some(room) = self.rooms.get_room(&room_id) else {
            return;
        };
        let result = room.broadcast(sid, data).await;
        for slow in result.dropped {
            match self.policy.on_backpressure(&room_id, &slow) {
                BackpressureAction::KickMember => {
                    BACKPRESSURE_KICKS_TOTAL.inc();
                    self.kick_by_sid(&slow).await;
                }
                BackpressureAction::MarkSlow
                | BackpressureAction::DropFrame
                | BackpressureAction::NoAction => {}
            }
        }
    }

    /// Registers `on_track`/`on_closed` callbacks that fan in to this
    /// orchestrator. Callbacks must be safe to invoke after the session is
    /// gone; every entry point here resolves `SessionId -> session` first
    /// and returns silently if absent.
    pub fn bind_media_handlers(self: Arc<Self>, mc: &Arc<dyn MediaConnection>, sid: SessionId) {
        let orch = self.clone();
        let track_sid = sid.clone();
        mc.on_track(Box::new(move |track| {
            let orch = orch.clone();
            let sid = track_sid.clone();
            tokio::spawn(async move {
                orch.on_track(sid, track).await;
            });
        }));

        let orch = self;
        let closed_sid = sid;
        mc.on_closed(Box::new(move || {
            let orch = orch.clone();
            let sid = closed_sid.clone();
            tokio::spawn(async move {
                orch.on_media_disconnect(&sid).await;
            });
        }));
    }

    pub async fn on_track(&self, sid: SessionId, track: Arc<dyn RtpSource>) {
        if self.registry.get_session(&sid).is_none() {
            return;
        }
        self.relays.start_relay(sid.clone(), track);
        for (mate_sid, _) in self.registry.room_mates(&sid) {
            self.subscribe(&sid, &mate_sid).await;
        }
    }

    /// For every other member `M` of `sid`'s room whose relay has a source
    /// track, subscribe `sid` to `M`.
    pub async fn on_media_ready(&self, sid: &SessionId) {
        for (mate_sid, _) in self.registry.room_mates(sid) {
            if mate_sid == *sid {
                continue;
            }
            if self.relays.has_relay(&mate_sid) {
                self.subscribe(&mate_sid, sid).await;
            }
        }
    }

    /// Builds a new local track from the source's codec/id/stream id,
    /// attaches it to `dst`'s media, and registers it in the src relay. If
    /// any step fails, logs and skips — `add_subscriber` is the last step,
    /// so partial state is never visible.
    pub async fn subscribe(&self, src_sid: &SessionId, dst_sid: &SessionId) {
        let Some(relay) = self.relays.get(src_sid) else {
            return;
        };
        let Some(dst_session) = self.registry.get_session(dst_sid) else {
            return;
        };
        let Some(dst_media) = dst_session.media().await else {
            warn!(src = %src_sid, dst = %dst_sid, "subscribe: destination has no media connection");
            return;
        };

        let codec = relay.src_codec();
        let local_track = Arc::new(TrackLocalStaticRTP::new(
            codec,
            src_sid.to_string(),
            format!("{src_sid}-stream"),
        ));

        if let Err(err) = dst_media.add_local_track(local_track.clone()).await {
            warn!(src = %src_sid, dst = %dst_sid, %err, "subscribe: add_local_track failed, skipping");
            return;
        }

        let out = Arc::new(OutTrack::new(local_track));
        self.relays
            .add_subscriber(src_sid, dst_sid.clone(), out)
            .await;
    }

    /// Does **not** remove room membership — signaling remains live so the
    /// client may renegotiate.
    pub async fn on_media_disconnect(&self, sid: &SessionId) {
        self.cleanup_media(sid).await;
    }

    /// Full teardown on transport disconnect: closes media, drops room
    /// membership, and removes the registry entry entirely. Unlike
    /// `kick_by_sid`, which keeps the session bound so it can keep
    /// signaling (e.g. after a policy kick or an explicit `leave`), this is
    /// for when the signaling socket itself is gone.
    pub async fn on_disconnect(&self, sid: &SessionId) {
        self.cleanup_media(sid).await;
        if let Some((room_id, _)) = self.registry.room_of(sid) {
            if let Some(room) = self.rooms.get_room(&room_id) {
                room.remove_member(sid).await;
            }
        }
        self.registry.unbind(sid);
    }
}
