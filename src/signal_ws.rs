//! The concrete axum-websocket `SignalConnection` adapter: a bounded
//! channel backs `try_send`, a dedicated write-loop task owns the sink and
//! applies a per-frame write deadline plus a keepalive ping ticker, and a
//! dedicated read-loop task owns the stream and enforces `read_limit`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::capability::{Frame, SignalConnection};
use crate::dispatcher::Dispatcher;
use crate::domain::Member;
use crate::error::SfuError;
use crate::id_types::SessionId;
use crate::member_session::MemberSession;
use crate::orchestrator::Orchestrator;

const WRITE_DEADLINE: Duration = Duration::from_secs(5);

struct WsSignalConnection {
    tx: mpsc::Sender<Frame>,
    cancel: CancellationToken,
}

#[async_trait]
impl SignalConnection for WsSignalConnection {
    fn try_send(&self, frame: Frame) -> Result<(), SfuError> {
        self.tx.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SfuError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => SfuError::Transport("signal channel closed".into()),
        })
    }

    // `CancellationToken::cancel` is already idempotent, so this needs no
    // separate once-guard.
    async fn close(&self) {
        self.cancel.cancel();
    }
}

/// Owns the socket for its lifetime: binds a fresh `MemberSession` into
/// `registry`, runs the read/write pumps, and unbinds on exit. Meant to be
/// awaited directly from an axum `WebSocketUpgrade` handler.
pub async fn handle_socket(
    ws: WebSocket,
    sid: SessionId,
    orchestrator: Arc<Orchestrator>,
    dispatcher: Arc<Dispatcher>,
    read_limit: usize,
    send_capacity: usize,
    ping_period: Duration,
) {
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::channel::<Frame>(send_capacity);
    let cancel = CancellationToken::new();

    let conn: Arc<dyn SignalConnection> = Arc::new(WsSignalConnection {
        tx,
        cancel: cancel.clone(),
    });

    let user = orchestrator.registry.get_or_create_user(&sid);
    let session = MemberSession::new(Member::new(user));
    session.update_signal(conn).await;
    orchestrator
        .registry
        .bind_signal(sid.clone(), session.clone(), cancel.clone());

    let write_cancel = cancel.clone();
    let write_sid = sid.clone();
    let write_task = tokio::spawn(async move {
        let mut pings = tokio::time::interval(ping_period);
        pings.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                _ = write_cancel.cancelled() => break,
                _ = pings.tick() => {
                    if timeout(WRITE_DEADLINE, sink.send(Message::Ping(Vec::new().into()))).await.is_err() {
                        debug!(sid = %write_sid, "write deadline exceeded on keepalive ping");
                        break;
                    }
                }
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    if timeout(WRITE_DEADLINE, sink.send(Message::Binary(frame.into()))).await.is_err() {
                        debug!(sid = %write_sid, "write deadline exceeded, closing");
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if data.len() > read_limit {
                            warn!(sid = %sid, len = data.len(), read_limit, "frame exceeds read_limit, closing");
                            break;
                        }
                        dispatcher.dispatch(&sid, &session, &data).await;
                    }
                    Some(Ok(Message::Text(data))) => {
                        if data.len() > read_limit {
                            warn!(sid = %sid, len = data.len(), read_limit, "frame exceeds read_limit, closing");
                            break;
                        }
                        dispatcher.dispatch(&sid, &session, data.as_bytes()).await;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        debug!(sid = %sid, %err, "read error, closing signal connection");
                        break;
                    }
                }
            }
        }
    }

    cancel.cancel();
    orchestrator.on_disconnect(&sid).await;
    let _ = write_task.await;
}
