use crate::id_types::{RoomId, SessionId};

/// Decision returned by `Policy::on_backpressure` for a session whose
/// outbound signaling queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressureAction {
    NoAction,
    MarkSlow,
    DropFrame,
    KickMember,
}

/// Pluggable backpressure response. The default policy kicks.
pub trait Policy: Send + Sync {
    fn on_backpressure(&self, room: &RoomId, member: &SessionId) -> BackpressureAction;
}

pub struct KickOnBackpressure;

impl Policy for KickOnBackpressure {
    fn on_backpressure(&self, _room: &RoomId, _member: &SessionId) -> BackpressureAction {
        BackpressureAction::KickMember
    }
}

impl Default for KickOnBackpressure {
    fn default() -> Self {
        KickOnBackpressure
    }
}
