use serde::Serialize;

use crate::error::SfuError;
use crate::id_types::{clamp_name, UserId, MAX_NAME_LEN};

/// A registered user identity. Usernames default to "guest" and are
/// mutable; the ID itself is stable for the lifetime of the value.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

impl User {
    pub fn guest(id: UserId) -> Self {
        User {
            id,
            username: "guest".to_string(),
        }
    }

    /// Fails with `Validation` (*UsernameEmpty*/*UsernameTooLong*) rather
    /// than silently clamping — clamping is reserved for room names, which
    /// the dispatcher truncates instead of rejecting.
    pub fn set_username(&mut self, name: &str) -> Result<(), SfuError> {
        if name.is_empty() {
            return Err(SfuError::username_empty());
        }
        if name.len() > MAX_NAME_LEN {
            return Err(SfuError::username_too_long());
        }
        self.username = name.to_string();
        Ok(())
    }
}

/// A user's in-room meta. Carries no transport; `signal`/`media` live on
/// `MemberSession`.
#[derive(Debug, Clone, Serialize)]
pub struct Member {
    pub user: User,
    pub muted: bool,
}

impl Member {
    pub fn new(user: User) -> Self {
        Member {
            user,
            muted: false,
        }
    }
}

/// Clamps a room name to the shared 36-byte budget; used by `create_room`
/// and nowhere else (usernames are rejected rather than clamped).
pub fn clamp_room_name(name: &str) -> String {
    clamp_name(name)
}
