use std::sync::Arc;

use tokio::sync::RwLock;

use crate::capability::{MediaConnection, SignalConnection};
use crate::domain::Member;

/// Binds a member's meta with its current signal and media endpoints. The
/// two endpoint slots are independently lockable: readers take a read lock,
/// writers exclusive, so a signaling renegotiation never blocks on media I/O
/// or vice versa.
#[derive(Clone)]
pub struct MemberSession {
    meta: Arc<RwLock<Member>>,
    signal: Arc<RwLock<Option<Arc<dyn SignalConnection>>>>,
    media: Arc<RwLock<Option<Arc<dyn MediaConnection>>>>,
}

impl MemberSession {
    pub fn new(meta: Member) -> Self {
        MemberSession {
            meta: Arc::new(RwLock::new(meta)),
            signal: Arc::new(RwLock::new(None)),
            media: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn meta(&self) -> Member {
        self.meta.read().await.clone()
    }

    pub async fn set_meta(&self, meta: Member) {
        *self.meta.write().await = meta;
    }

    pub async fn signal(&self) -> Option<Arc<dyn SignalConnection>> {
        self.signal.read().await.clone()
    }

    /// Publishes a new signal endpoint atomically; readers always observe
    /// either the prior or the new endpoint, never a torn state.
    pub async fn update_signal(&self, conn: Arc<dyn SignalConnection>) {
        *self.signal.write().await = Some(conn);
    }

    pub async fn media(&self) -> Option<Arc<dyn MediaConnection>> {
        self.media.read().await.clone()
    }

    pub async fn update_media(&self, conn: Arc<dyn MediaConnection>) {
        *self.media.write().await = Some(conn);
    }

    /// Requests tear-down of the current media endpoint, if any. The session
    /// never owns the close path itself — the transport adapter does — but
    /// may ask for an explicit close during cleanup.
    pub async fn close_media(&self) {
        if let Some(media) = self.media.write().await.take() {
            media.close().await;
        }
    }
}
