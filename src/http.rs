//! axum `Router`: static file serving, room listing/detail, leave/move,
//! the signaling upgrade, and `/metrics`. A cookie middleware establishes
//! `SessionId` from the `ct` cookie before any handler runs, minting and
//! signing one if the client has none yet.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Extension, Path, Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::{Cookie, Key, SameSite};
use axum_extra::extract::SignedCookieJar;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::SfuError;
use crate::id_types::{RoomId, RoomName, SessionId};
use crate::metrics;
use crate::orchestrator::Orchestrator;

const SESSION_COOKIE: &str = "ct";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<Config>,
    pub key: Key,
}

impl axum::extract::FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.key.clone()
    }
}

pub fn build_router(state: AppState) -> Router {
    let static_path = state.config.static_path.clone();
    let index_service = ServeFile::new(format!("{static_path}/index.html"));
    let static_service = ServeDir::new(static_path);

    Router::new()
        .route("/api/rooms", get(list_rooms))
        .route("/api/rooms/{name}", get(room_detail))
        .route("/api/me/leave", post(leave))
        .route("/api/me/move", post(move_room))
        .route("/api/ws/signal", get(ws_signal))
        .route("/metrics", get(render_metrics))
        .route_service("/", index_service)
        .nest_service("/static", static_service)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn_with_state(state.clone(), session_cookie_mw))
        .with_state(state)
}

/// Establishes `SessionId` from the signed `ct` cookie, minting and
/// signing a fresh one if absent, and inserts it as a request extension
/// for downstream extractors.
async fn session_cookie_mw(jar: SignedCookieJar, mut req: Request, next: Next) -> Response {
    match jar.get(SESSION_COOKIE) {
        Some(cookie) => {
            let sid = SessionId::from(cookie.value().to_string());
            req.extensions_mut().insert(sid);
            next.run(req).await
        }
        None => {
            let sid = SessionId::generate();
            req.extensions_mut().insert(sid.clone());
            let cookie = Cookie::build((SESSION_COOKIE, sid.to_string()))
                .http_only(true)
                .path("/")
                .same_site(SameSite::Lax)
                .max_age(time::Duration::days(7))
                .build();
            let jar = jar.add(cookie);
            let response = next.run(req).await;
            (jar, response).into_response()
        }
    }
}

#[derive(Serialize)]
struct RoomSummaryBody {
    id: String,
    name: String,
    member_count: usize,
}

async fn list_rooms(State(state): State<AppState>) -> impl IntoResponse {
    let rooms = state
        .orchestrator
        .rooms
        .list()
        .await
        .into_iter()
        .map(|r| RoomSummaryBody {
            id: r.id.to_string(),
            name: r.name.to_string(),
            member_count: r.member_count,
        })
        .collect::<Vec<_>>();
    Json(rooms)
}

#[derive(Serialize)]
struct MemberBody {
    id: String,
    username: String,
}

#[derive(Serialize)]
struct RoomDetailBody {
    id: String,
    name: String,
    members: Vec<MemberBody>,
}

async fn room_detail(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<RoomDetailBody>, SfuError> {
    let room = state
        .orchestrator
        .rooms
        .find_by_name(&RoomName::from(name))
        .ok_or_else(|| SfuError::NotFound("no such room".into()))?;
    let members = room
        .members_snapshot()
        .await
        .into_iter()
        .map(|(id, username)| MemberBody { id: id.to_string(), username })
        .collect();
    Ok(Json(RoomDetailBody {
        id: room.id.to_string(),
        name: room.name.to_string(),
        members,
    }))
}

async fn leave(State(state): State<AppState>, Extension(sid): Extension<SessionId>) -> impl IntoResponse {
    state.orchestrator.kick_by_sid(&sid).await;
    Json(json!({"status": "ok"}))
}

#[derive(Deserialize)]
struct MoveQuery {
    to: String,
}

async fn move_room(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    Query(query): Query<MoveQuery>,
) -> Result<Json<serde_json::Value>, SfuError> {
    let moved = state.orchestrator.move_to(&sid, RoomId::from(query.to)).await?;
    Ok(Json(json!({"moved": moved})))
}

/// Signaling channel depth in frames, independent of `read_limit` (which
/// bounds a single frame's byte size).
const SIGNAL_CHANNEL_CAPACITY: usize = 64;

async fn ws_signal(
    State(state): State<AppState>,
    Extension(sid): Extension<SessionId>,
    ws: WebSocketUpgrade,
) -> Response {
    let orchestrator = state.orchestrator.clone();
    let dispatcher = state.dispatcher.clone();
    let read_limit = state.config.read_limit;
    let ping_period = state.config.ping_period();

    ws.on_upgrade(move |socket| {
        crate::signal_ws::handle_socket(
            socket,
            sid,
            orchestrator,
            dispatcher,
            read_limit,
            SIGNAL_CHANNEL_CAPACITY,
            ping_period,
        )
    })
}

async fn render_metrics() -> impl IntoResponse {
    metrics::render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use tower::ServiceExt;
    use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

    use crate::capability::{IceCandidateInit, MediaConnection, OnClosedCallback, OnIceCandidateCallback, OnTrackCallback};
    use crate::orchestrator::Orchestrator;
    use crate::registry::Registry;
    use crate::relay_manager::RelayManager;
    use crate::room_manager::RoomManager;

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

    fn build_state() -> AppState {
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(Registry::new()),
            Arc::new(RoomManager::new()),
            Arc::new(RelayManager::new()),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            orchestrator.clone(),
            Arc::new(|| Box::pin(async { Ok(Arc::new(StubMedia) as Arc<dyn MediaConnection>) })),
        ));
        AppState {
            orchestrator,
            dispatcher,
            config: Arc::new(Config::default()),
            key: Key::derive_from(b"test-secret-not-for-production-use-0123456789"),
        }
    }

    #[tokio::test]
    async fn list_rooms_is_empty_with_no_rooms_created() {
        let app = build_router(build_state());
        let response = app
            .oneshot(HttpRequest::get("/api/rooms").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"[]");
    }

    #[tokio::test]
    async fn room_detail_404s_for_unknown_room() {
        let app = build_router(build_state());
        let response = app
            .oneshot(HttpRequest::get("/api/rooms/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn room_detail_returns_member_snapshot() {
        let state = build_state();
        let room = state.orchestrator.rooms.create_room(RoomName::from("lab"));
        let _ = room;
        let app = build_router(state);
        let response = app
            .oneshot(HttpRequest::get("/api/rooms/lab").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn a_request_without_a_cookie_gets_one_minted() {
        let app = build_router(build_state());
        let response = app
            .oneshot(HttpRequest::get("/api/rooms").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let set_cookie = response.headers().get(axum::http::header::SET_COOKIE);
        assert!(set_cookie.is_some(), "first request should mint a session cookie");
        assert!(set_cookie.unwrap().to_str().unwrap().starts_with("ct="));
    }

    #[tokio::test]
    async fn leave_responds_ok_even_with_no_session_bound() {
        let app = build_router(build_state());
        let response = app
            .oneshot(
                HttpRequest::post("/api/me/leave")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
