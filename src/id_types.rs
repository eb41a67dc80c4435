use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// Opaque session token, established at first HTTP contact and presented on
/// every signaling reconnect. Wraps an `Arc<String>` for cheap cloning across
/// the registry, rooms, and relays that all key on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub Arc<String>);

/// Stable identifier for a `User`, independent of any one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(pub Arc<String>);

/// Server-assigned, unique room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(pub Arc<String>);

/// Display label for a room, clamped to 36 bytes by callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomName(pub Arc<String>);

/// Maximum byte length for a username or room name (spec invariant).
pub const MAX_NAME_LEN: usize = 36;

/// Clamps a name to `MAX_NAME_LEN` bytes without splitting a UTF-8 sequence.
pub fn clamp_name(name: &str) -> String {
    if name.len() <= MAX_NAME_LEN {
        return name.to_string();
    }
    let mut end = MAX_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

impl SessionId {
    /// Mints a fresh random session id, suitable for the `ct` cookie value.
    pub fn generate() -> Self {
        SessionId(Arc::new(Uuid::new_v4().simple().to_string()))
    }
}

impl RoomId {
    pub fn generate() -> Self {
        RoomId(Arc::new(Uuid::new_v4().simple().to_string()))
    }
}

macro_rules! id_newtype {
    ($t:ty) => {
        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $t {
            fn from(s: String) -> Self {
                Self(Arc::new(s))
            }
        }

        impl From<&str> for $t {
            fn from(s: &str) -> Self {
                Self(Arc::new(s.to_string()))
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

id_newtype!(SessionId);
id_newtype!(UserId);
id_newtype!(RoomId);
id_newtype!(RoomName);
