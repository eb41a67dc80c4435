//! Stateless translation from inbound JSON signaling frames to
//! `Orchestrator` calls, and from orchestrator/room state back into
//! outbound frames. Carries no per-session state of its own; everything
//! it needs (`session`, `sid`) is passed in by the caller per frame.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::capability::{Frame, IceCandidateInit, MediaConnection};
use crate::domain::clamp_room_name;
use crate::error::SfuError;
use crate::id_types::{RoomId, RoomName, SessionId};
use crate::member_session::MemberSession;
use crate::metrics::BACKPRESSURE_KICKS_TOTAL;
use crate::orchestrator::Orchestrator;
use crate::policy::BackpressureAction;

/// Builds a fresh, unbound `MediaConnection` for an `offer` frame. The
/// dispatcher never depends on the concrete webrtc adapter directly;
/// construction is async because the webrtc adapter creates a peer
/// connection under the hood.
pub type MediaFuture = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Arc<dyn MediaConnection>, SfuError>> + Send>>;
pub type MediaFactory = Arc<dyn Fn() -> MediaFuture + Send + Sync>;

pub struct Dispatcher {
    orchestrator: Arc<Orchestrator>,
    media_factory: MediaFactory,
}

impl Dispatcher {
    pub fn new(orchestrator: Arc<Orchestrator>, media_factory: MediaFactory) -> Self {
        Dispatcher {
            orchestrator,
            media_factory,
        }
    }

    /// Entry point: one call per inbound signaling frame. Never panics on
    /// malformed input — unparseable JSON is dropped silently, a known
    /// type with a bad payload replies `error="bad_payload"`, an unknown
    /// type is logged and dropped.
    pub async fn dispatch(&self, sid: &SessionId, session: &MemberSession, frame: &[u8]) {
        let value: Value = match serde_json::from_slice(frame) {
            Ok(v) => v,
            Err(_) => return,
        };
        let Some(msg_type) = value.get("type").and_then(Value::as_str).map(str::to_string) else {
            return;
        };

        let result = match msg_type.as_str() {
            "create_room" => self.handle_create_room(sid, session, value).await,
            "join" => self.handle_join(sid, session, value).await,
            "leave" => self.handle_leave(sid, session).await,
            "rename" => self.handle_rename(sid, session, value).await,
            "whoami" => self.handle_whoami(sid, session).await,
            "ping" => self.handle_ping(session).await,
            "offer" => self.handle_offer(sid, session, value).await,
            "answer" => self.handle_answer(session, value).await,
            "candidate" => self.handle_candidate(session, value).await,
            other => {
                debug!(frame_type = other, "dispatcher: unrecognized frame type, dropping");
                return;
            }
        };

        if let Err(err) = result {
            warn!(sid = %sid, %err, "dispatcher: handler failed");
            self.reply(session, err.to_signal_frame()).await;
        }
    }

    async fn reply(&self, session: &MemberSession, frame: Value) {
        if let Some(signal) = session.signal().await {
            let bytes = to_frame(&frame);
            let _ = signal.try_send(bytes);
        }
    }

    /// Applies the configured backpressure policy to every session a
    /// broadcast couldn't reach.
    async fn apply_policy_drops(&self, room_id: &RoomId, dropped: Vec<SessionId>) {
        for slow in dropped {
            match self.orchestrator.policy.on_backpressure(room_id, &slow) {
                BackpressureAction::KickMember => {
                    BACKPRESSURE_KICKS_TOTAL.inc();
                    self.orchestrator.kick_by_sid(&slow).await;
                }
                BackpressureAction::MarkSlow | BackpressureAction::DropFrame | BackpressureAction::NoAction => {}
            }
        }
    }

    async fn handle_create_room(
        &self,
        sid: &SessionId,
        session: &MemberSession,
        value: Value,
    ) -> Result<(), SfuError> {
        #[derive(Deserialize)]
        struct Payload {
            name: String,
        }
        let payload: Payload =
            serde_json::from_value(value).map_err(|_| SfuError::Validation("bad_payload".into()))?;

        if self.orchestrator.registry.room_of(sid).is_some() {
            self.reply(session, json!({"type": "error", "error": "you already in room"}))
                .await;
            return Ok(());
        }

        let name = RoomName::from(clamp_room_name(&payload.name));
        let room = self.orchestrator.rooms.create_room(name);
        self.reply(session, json!({"type": "room_created", "room": room.id.to_string()}))
            .await;
        Ok(())
    }

    async fn handle_join(
        &self,
        sid: &SessionId,
        session: &MemberSession,
        value: Value,
    ) -> Result<(), SfuError> {
        #[derive(Deserialize)]
        struct Payload {
            room: String,
            #[serde(default)]
            name: Option<String>,
        }
        let payload: Payload =
            serde_json::from_value(value).map_err(|_| SfuError::Validation("bad_payload".into()))?;

        if let Some(name) = payload.name.as_deref() {
            if let Err(err) = self.orchestrator.registry.update_username(sid, name).await {
                self.reply(session, err.to_signal_frame()).await;
                return Ok(());
            }
        }

        let room_id = RoomId::from(payload.room);
        self.orchestrator.join(sid, room_id.clone()).await?;

        let room = self.orchestrator.rooms.get_room(&room_id);
        let members = match &room {
            Some(room) => room.members_snapshot().await,
            None => Vec::new(),
        };
        let room_name = room.as_ref().map(|r| r.name.to_string()).unwrap_or_default();
        self.reply(
            session,
            json!({
                "type": "room_state",
                "room": room_id.to_string(),
                "room_name": room_name,
                "count": members.len(),
                "members": members.iter().map(|(id, name)| json!({"id": id.to_string(), "username": name})).collect::<Vec<_>>(),
            }),
        )
        .await;

        let meta = session.meta().await;
        let member_joined = json!({
            "type": "member_joined",
            "user": {"id": meta.user.id.to_string(), "username": meta.user.username},
        });
        self.orchestrator
            .on_frame_received(sid, to_frame(&member_joined))
            .await;
        Ok(())
    }

    async fn handle_leave(&self, sid: &SessionId, session: &MemberSession) -> Result<(), SfuError> {
        let room = self
            .orchestrator
            .registry
            .room_of(sid)
            .and_then(|(room_id, _)| self.orchestrator.rooms.get_room(&room_id));
        let meta = session.meta().await;

        self.orchestrator.kick_by_sid(sid).await;

        if let Some(room) = room {
            let frame = json!({
                "type": "member_left",
                "user": {"id": meta.user.id.to_string(), "username": meta.user.username},
            });
            let result = room.broadcast(sid, to_frame(&frame)).await;
            self.apply_policy_drops(&room.id, result.dropped).await;
        }

        self.reply(session, json!({"type": "left"})).await;
        Ok(())
    }

    async fn handle_rename(
        &self,
        sid: &SessionId,
        session: &MemberSession,
        value: Value,
    ) -> Result<(), SfuError> {
        #[derive(Deserialize)]
        struct Payload {
            name: String,
        }
        let payload: Payload =
            serde_json::from_value(value).map_err(|_| SfuError::Validation("bad_payload".into()))?;

        if let Err(err) = self.orchestrator.registry.update_username(sid, &payload.name).await {
            let message = match &err {
                SfuError::Validation(msg) => msg.clone(),
                _ => "invalid_name".to_string(),
            };
            self.reply(session, json!({"type": "error", "error": message})).await;
            return Ok(());
        }

        let meta = session.meta().await;
        self.reply(session, json!({"type": "whoami", "username": meta.user.username}))
            .await;

        let member_updated = json!({
            "type": "member_updated",
            "user": {"id": meta.user.id.to_string(), "username": meta.user.username},
        });
        self.orchestrator
            .on_frame_received(sid, to_frame(&member_updated))
            .await;
        Ok(())
    }

    async fn handle_whoami(&self, sid: &SessionId, session: &MemberSession) -> Result<(), SfuError> {
        let meta = session.meta().await;
        let mut frame = json!({"type": "whoami", "username": meta.user.username});

        if let Some((room_id, _)) = self.orchestrator.registry.room_of(sid) {
            if let Some(room) = self.orchestrator.rooms.get_room(&room_id) {
                frame["room"] = json!(room.id.to_string());
                frame["room_name"] = json!(room.name.to_string());
            }
        }
        self.reply(session, frame).await;
        Ok(())
    }

    async fn handle_ping(&self, session: &MemberSession) -> Result<(), SfuError> {
        self.reply(session, json!({"type": "pong"})).await;
        Ok(())
    }

    async fn handle_offer(
        &self,
        sid: &SessionId,
        session: &MemberSession,
        value: Value,
    ) -> Result<(), SfuError> {
        #[derive(Deserialize)]
        struct Payload {
            sdp: String,
        }
        let payload: Payload =
            serde_json::from_value(value).map_err(|_| SfuError::Validation("bad_payload".into()))?;

        let mc: Arc<dyn MediaConnection> = (self.media_factory)().await?;

        let ice_session = session.clone();
        mc.on_ice_candidate(Box::new(move |candidate| {
            let session = ice_session.clone();
            tokio::spawn(async move {
                if let Some(signal) = session.signal().await {
                    let frame = json!({
                        "type": "candidate",
                        "candidate": candidate.candidate,
                        "sdpMid": candidate.sdp_mid,
                        "sdpMLineIndex": candidate.sdp_mline_index,
                    });
                    let _ = signal.try_send(to_frame(&frame));
                }
            });
        }));

        self.orchestrator.clone().bind_media_handlers(&mc, sid.clone());

        if let Err(err) = mc.apply_offer(payload.sdp).await {
            mc.close().await;
            return Err(err);
        }
        let answer_sdp = match mc.create_and_set_answer().await {
            Ok(sdp) => sdp,
            Err(err) => {
                mc.close().await;
                return Err(err);
            }
        };

        session.update_media(mc).await;
        self.orchestrator.on_media_ready(sid).await;

        self.reply(session, json!({"type": "answer", "sdp": answer_sdp})).await;
        Ok(())
    }

    async fn handle_answer(&self, session: &MemberSession, value: Value) -> Result<(), SfuError> {
        #[derive(Deserialize)]
        struct Payload {
            sdp: String,
        }
        let payload: Payload =
            serde_json::from_value(value).map_err(|_| SfuError::Validation("bad_payload".into()))?;

        let Some(media) = session.media().await else {
            return Err(SfuError::NotFound("no media connection".into()));
        };
        media.apply_answer(payload.sdp).await
    }

    async fn handle_candidate(&self, session: &MemberSession, value: Value) -> Result<(), SfuError> {
        let candidate: IceCandidateInit =
            serde_json::from_value(value).map_err(|_| SfuError::Validation("bad_payload".into()))?;

        if candidate.candidate.is_empty() {
            return Ok(());
        }

        let Some(media) = session.media().await else {
            return Err(SfuError::NotFound("no media connection".into()));
        };
        media.add_ice_candidate(candidate).await
    }
}

fn to_frame(value: &Value) -> Frame {
    serde_json::to_vec(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{OnClosedCallback, OnIceCandidateCallback, OnTrackCallback, SignalConnection};
    use crate::domain::Member;
    use crate::registry::Registry;
    use crate::relay_manager::RelayManager;
    use crate::room_manager::RoomManager;
    use async_trait::async_trait;
    use tokio::sync::Mutex;
    use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

    struct RecordingSignal {
        frames: Arc<Mutex<Vec<Value>>>,
    }

    #[async_trait]
    impl SignalConnection for RecordingSignal {
        fn try_send(&self, frame: Frame) -> Result<(), SfuError> {
            let value: Value = serde_json::from_slice(&frame).unwrap();
            self.frames.try_lock().unwrap().push(value);
            Ok(())
        }
        async fn close(&self) {}
    }

    struct StubMedia;
    #[async_trait]
    impl MediaConnection for StubMedia {
        async fn apply_offer(&self, _sdp: String) -> Result<(), SfuError> {
            Ok(())
        }
        async fn apply_answer(&self, _sdp: String) -> Result<(), SfuError> {
            Ok(())
        }
        async fn create_and_set_answer(&self) -> Result<String, SfuError> {
            Ok("v=0 answer".into())
        }
        async fn create_offer_and_gather(&self) -> Result<String, SfuError> {
            Ok(String::new())
        }
        async fn add_ice_candidate(&self, _candidate: IceCandidateInit) -> Result<(), SfuError> {
            Ok(())
        }
        async fn add_local_track(&self, _track: Arc<TrackLocalStaticRTP>) -> Result<(), SfuError> {
            Ok(())
        }
        fn on_ice_candidate(&self, _cb: OnIceCandidateCallback) {}
        fn on_track(&self, _cb: OnTrackCallback) {}
        fn on_closed(&self, _cb: OnClosedCallback) {}
        async fn close(&self) {}
    }

    fn build() -> (Arc<Orchestrator>, Dispatcher) {
        let orch = Arc::new(Orchestrator::new(
            Arc::new(Registry::new()),
            Arc::new(RoomManager::new()),
            Arc::new(RelayManager::new()),
        ));
        let dispatcher = Dispatcher::new(
            orch.clone(),
            Arc::new(|| Box::pin(async { Ok(Arc::new(StubMedia) as Arc<dyn MediaConnection>) })),
        );
        (orch, dispatcher)
    }

    async fn bind(orch: &Orchestrator, sid: &SessionId) -> (MemberSession, Arc<Mutex<Vec<Value>>>) {
        let user = orch.registry.get_or_create_user(sid);
        let session = MemberSession::new(Member::new(user));
        let frames = Arc::new(Mutex::new(Vec::new()));
        session
            .update_signal(Arc::new(RecordingSignal {
                frames: frames.clone(),
            }))
            .await;
        orch.registry
            .bind_signal(sid.clone(), session.clone(), tokio_util::sync::CancellationToken::new());
        (session, frames)
    }

    async fn last_frame(frames: &Mutex<Vec<Value>>) -> Value {
        frames.lock().await.last().cloned().unwrap()
    }

    #[tokio::test]
    async fn create_room_rejects_when_already_in_room() {
        let (orch, dispatcher) = build();
        let sid = SessionId::from("a");
        let (session, frames) = bind(&orch, &sid).await;
        let room = orch.rooms.create_room(RoomName::from("lab"));
        orch.join(&sid, room.id.clone()).await.unwrap();

        dispatcher
            .dispatch(&sid, &session, br#"{"type":"create_room","name":"other"}"#)
            .await;

        let frame = last_frame(&frames).await;
        assert_eq!(frame["error"], "you already in room");
    }

    #[tokio::test]
    async fn join_replies_room_state_and_broadcasts() {
        let (orch, dispatcher) = build();
        let room = orch.rooms.create_room(RoomName::from("lab"));

        let a = SessionId::from("a");
        let (a_session, a_frames) = bind(&orch, &a).await;
        let b = SessionId::from("b");
        let (b_session, b_frames) = bind(&orch, &b).await;

        dispatcher
            .dispatch(&a, &a_session, format!(r#"{{"type":"join","room":"{}"}}"#, room.id).as_bytes())
            .await;
        let frame = last_frame(&a_frames).await;
        assert_eq!(frame["type"], "room_state");
        assert_eq!(frame["room_name"], "lab");
        assert_eq!(frame["count"], 1);

        dispatcher
            .dispatch(&b, &b_session, format!(r#"{{"type":"join","room":"{}"}}"#, room.id).as_bytes())
            .await;
        let broadcast = last_frame(&a_frames).await;
        assert_eq!(broadcast["type"], "member_joined");
        let b_frame = last_frame(&b_frames).await;
        assert_eq!(b_frame["count"], 2);
    }

    #[tokio::test]
    async fn ping_replies_pong() {
        let (orch, dispatcher) = build();
        let sid = SessionId::from("a");
        let (session, frames) = bind(&orch, &sid).await;

        dispatcher.dispatch(&sid, &session, br#"{"type":"ping"}"#).await;
        assert_eq!(last_frame(&frames).await["type"], "pong");
    }

    #[tokio::test]
    async fn unknown_type_is_dropped() {
        let (orch, dispatcher) = build();
        let sid = SessionId::from("a");
        let (session, frames) = bind(&orch, &sid).await;

        dispatcher.dispatch(&sid, &session, br#"{"type":"unheard_of"}"#).await;
        assert!(frames.lock().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_silently_dropped() {
        let (orch, dispatcher) = build();
        let sid = SessionId::from("a");
        let (session, frames) = bind(&orch, &sid).await;

        dispatcher.dispatch(&sid, &session, b"not json").await;
        assert!(frames.lock().await.is_empty());
    }

    #[tokio::test]
    async fn rename_rejects_empty_name() {
        let (orch, dispatcher) = build();
        let sid = SessionId::from("a");
        let (session, frames) = bind(&orch, &sid).await;

        dispatcher
            .dispatch(&sid, &session, br#"{"type":"rename","name":""}"#)
            .await;
        let frame = last_frame(&frames).await;
        assert_eq!(frame["error"], "empty name");
    }

    #[tokio::test]
    async fn rename_rejects_too_long_name() {
        let (orch, dispatcher) = build();
        let sid = SessionId::from("a");
        let (session, frames) = bind(&orch, &sid).await;

        let long_name = "a".repeat(37);
        dispatcher
            .dispatch(&sid, &session, to_frame(&json!({"type": "rename", "name": long_name})).as_slice())
            .await;
        let frame = last_frame(&frames).await;
        assert_eq!(frame["error"], "invalid_name");
    }

    #[tokio::test]
    async fn offer_replies_with_answer_and_attaches_media() {
        let (orch, dispatcher) = build();
        let sid = SessionId::from("a");
        let (session, frames) = bind(&orch, &sid).await;

        dispatcher
            .dispatch(&sid, &session, br#"{"type":"offer","sdp":"v=0"}"#)
            .await;

        let frame = last_frame(&frames).await;
        assert_eq!(frame["type"], "answer");
        assert!(session.media().await.is_some());
    }

    #[tokio::test]
    async fn leave_replies_left_and_broadcasts_member_left() {
        let (orch, dispatcher) = build();
        let room = orch.rooms.create_room(RoomName::from("lab"));
        let a = SessionId::from("a");
        let (a_session, a_frames) = bind(&orch, &a).await;
        let b = SessionId::from("b");
        let (b_session, b_frames) = bind(&orch, &b).await;
        orch.join(&a, room.id.clone()).await.unwrap();
        orch.join(&b, room.id.clone()).await.unwrap();

        dispatcher.dispatch(&a, &a_session, br#"{"type":"leave"}"#).await;

        assert_eq!(last_frame(&a_frames).await["type"], "left");
        assert_eq!(last_frame(&b_frames).await["type"], "member_left");
        assert!(orch.registry.room_of(&a).is_none());
    }
}
