use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::{Member, User};
use crate::error::SfuError;
use crate::id_types::{RoomId, SessionId, UserId};
use crate::member_session::MemberSession;
use crate::metrics::ACTIVE_SESSIONS;

struct SessionEntry {
    user: User,
    room: Option<RoomId>,
    member_session: MemberSession,
    cancel: CancellationToken,
}

/// Process-wide concurrent map of active sessions; owns cancellation
/// handles. A single RW-style lock (here, `DashMap`'s internal sharded
/// locking) protects the map; no write is ever held across a callback into
/// another component.
#[derive(Default)]
pub struct Registry {
    sessions: DashMap<SessionId, SessionEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            sessions: DashMap::new(),
        }
    }

    /// Returns the existing user for `sid`, or lazily creates a guest user
    /// (default username "guest"). Idempotent.
    pub fn get_or_create_user(&self, sid: &SessionId) -> User {
        if let Some(entry) = self.sessions.get(sid) {
            return entry.user.clone();
        }
        let user = User::guest(UserId::from(sid.as_ref()));
        let entry = SessionEntry {
            user: user.clone(),
            room: None,
            member_session: MemberSession::new(Member::new(user.clone())),
            cancel: CancellationToken::new(),
        };
        self.sessions.insert(sid.clone(), entry);
        user
    }

    /// Fails with `Validation` (*UsernameEmpty*/*UsernameTooLong*); otherwise
    /// atomic.
    pub async fn update_username(&self, sid: &SessionId, name: &str) -> Result<(), SfuError> {
        let member_session = match self.sessions.get(sid) {
            Some(entry) => entry.member_session.clone(),
            None => return Err(SfuError::NotFound(format!("no session {sid}"))),
        };
        let mut meta = member_session.meta().await;
        meta.user.set_username(name)?;
        member_session.set_meta(meta.clone()).await;
        if let Some(mut entry) = self.sessions.get_mut(sid) {
            entry.user = meta.user;
        }
        Ok(())
    }

    /// Installs or replaces the session entry for `sid`. Any prior `cancel`
    /// is invoked before replacement. A room association already on record
    /// (a reconnect presenting the same token) is preserved.
    pub fn bind_signal(&self, sid: SessionId, session: MemberSession, cancel: CancellationToken) {
        let (user, room) = match self.sessions.get(&sid) {
            Some(existing) => {
                existing.cancel.cancel();
                (existing.user.clone(), existing.room.clone())
            }
            None => {
                ACTIVE_SESSIONS.inc();
                (User::guest(UserId::from(sid.as_ref())), None)
            }
        };
        self.sessions.insert(
            sid,
            SessionEntry {
                user,
                room,
                member_session: session,
                cancel,
            },
        );
    }

    pub fn get_session(&self, sid: &SessionId) -> Option<MemberSession> {
        self.sessions.get(sid).map(|e| e.member_session.clone())
    }

    /// Invokes the stored cancel then removes the entry.
    pub fn unbind(&self, sid: &SessionId) {
        if let Some((_, entry)) = self.sessions.remove(sid) {
            debug!(sid = %sid, "unbinding session");
            entry.cancel.cancel();
            ACTIVE_SESSIONS.dec();
        }
    }

    pub fn room_of(&self, sid: &SessionId) -> Option<(RoomId, MemberSession)> {
        let entry = self.sessions.get(sid)?;
        let room = entry.room.clone()?;
        Some((room, entry.member_session.clone()))
    }

    /// Returns `false` if `sid` is not bound.
    pub fn update_room(&self, sid: &SessionId, room_id: RoomId) -> bool {
        match self.sessions.get_mut(sid) {
            Some(mut entry) => {
                entry.room = Some(room_id);
                true
            }
            None => false,
        }
    }

    /// Clears the room association but keeps the session entry.
    pub fn remove_room(&self, sid: &SessionId) {
        if let Some(mut entry) = self.sessions.get_mut(sid) {
            entry.room = None;
        }
    }

    /// Read-only snapshot of every session currently associated with
    /// `room_id`.
    pub fn members_of_room(&self, room_id: &RoomId) -> Vec<(SessionId, MemberSession)> {
        self.sessions
            .iter()
            .filter(|e| e.room.as_ref() == Some(room_id))
            .map(|e| (e.key().clone(), e.member_session.clone()))
            .collect()
    }

    /// Equivalent to `members_of_room(room_of(sid).room)`.
    pub fn room_mates(&self, sid: &SessionId) -> Vec<(SessionId, MemberSession)> {
        match self.room_of(sid) {
            Some((room_id, _)) => self.members_of_room(&room_id),
            None => Vec::new(),
        }
    }
}
