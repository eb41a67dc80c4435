use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use crate::capability::{Frame, PublishResult};
use crate::error::SfuError;
use crate::id_types::{RoomId, RoomName, SessionId, UserId};
use crate::member_session::MemberSession;

struct RoomState {
    by_sid: HashMap<SessionId, MemberSession>,
    by_user: HashMap<UserId, SessionId>,
}

/// Per-room membership set and fan-out of signaling frames. Two indices:
/// by `SessionId` (authoritative) and by `UserId` (lookup only — the core
/// does not enforce at-most-one-session-per-user).
pub struct Room {
    pub id: RoomId,
    pub name: RoomName,
    state: RwLock<RoomState>,
}

impl Room {
    pub fn new(id: RoomId, name: RoomName) -> Self {
        Room {
            id,
            name,
            state: RwLock::new(RoomState {
                by_sid: HashMap::new(),
                by_user: HashMap::new(),
            }),
        }
    }

    /// Upserts `sid`; also records `UserId -> sid`.
    pub async fn add_member(&self, sid: SessionId, session: MemberSession, user_id: UserId) {
        let mut guard = self.state.write().await;
        guard.by_sid.insert(sid.clone(), session);
        guard.by_user.insert(user_id, sid);
    }

    /// Removes `sid` from both indices.
    pub async fn remove_member(&self, sid: &SessionId) {
        let mut guard = self.state.write().await;
        guard.by_sid.remove(sid);
        guard.by_user.retain(|_, v| v != sid);
    }

    pub async fn member_count(&self) -> usize {
        self.state.read().await.by_sid.len()
    }

    pub async fn contains(&self, sid: &SessionId) -> bool {
        self.state.read().await.by_sid.contains_key(sid)
    }

    /// List of `{user_id, username}` for API consumers.
    pub async fn members_snapshot(&self) -> Vec<(UserId, String)> {
        let guard = self.state.read().await;
        let mut out = Vec::with_capacity(guard.by_sid.len());
        for session in guard.by_sid.values() {
            let meta = session.meta().await;
            out.push((meta.user.id.clone(), meta.user.username.clone()));
        }
        out
    }

    /// Iterates under a read lock, calling `try_send` on each member other
    /// than `from_sid`. Never holds the room lock across signal I/O beyond
    /// what the non-blocking `try_send` promises.
    pub async fn broadcast(&self, from_sid: &SessionId, data: Frame) -> PublishResult<SessionId> {
        let guard = self.state.read().await;
        let mut result = PublishResult::default();

        for (sid, session) in guard.by_sid.iter() {
            if sid == from_sid {
                continue;
            }
            let Some(signal) = session.signal().await else {
                continue;
            };
            match signal.try_send(data.clone()) {
                Ok(()) => result.sent_to.push(sid.clone()),
                Err(SfuError::Backpressure) => {
                    debug!(sid = %sid, "dropping frame for slow subscriber");
                    result.dropped.push(sid.clone());
                }
                Err(_) => result.dropped.push(sid.clone()),
            }
        }
        result
    }
}
