//! WebSocket transport for one session.

use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage, Utf8Bytes, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use rtchat_core::ChatError;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::session::ConnectionSession;

/// How long the writer may take to flush after the session ends.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Drive `session` over `socket` until either side closes.
///
/// One task reads client frames and inbox events and feeds them to the
/// session in arrival order; a writer task forwards rendered payloads and
/// sends heartbeat pings. The session is always disconnected on exit,
/// whatever ended the loop.
pub async fn run_session(
    socket: WebSocket,
    mut session: ConnectionSession,
    outbound: mpsc::Receiver<String>,
    heartbeat: Duration,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut inbox = match session.connect().await {
        Ok(inbox) => inbox,
        Err(e) => {
            warn!(
                user_id = %session.user_id(),
                group_id = %session.group_id(),
                error = %e,
                "connect failed after upgrade"
            );
            let _ = ws_tx.send(close_frame(&e)).await;
            return;
        }
    };

    let mut writer = tokio::spawn(write_loop(ws_tx, outbound, heartbeat));
    let mut writer_done = false;

    loop {
        tokio::select! {
            frame = ws_rx.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Err(e) = session.receive(text.as_str()).await {
                        match e {
                            ChatError::MalformedInput(_) => {
                                debug!(error = %e, "ignored client frame")
                            }
                            _ => warn!(error = %e, error_kind = e.error_kind(), "receive failed"),
                        }
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "socket read error");
                    break;
                }
            },
            event = inbox.recv() => match event {
                Some(event) => {
                    if let Err(e) = session.on_event(event).await {
                        warn!(error = %e, "event handling failed");
                    }
                }
                None => break,
            },
            _ = &mut writer => {
                debug!("writer finished");
                writer_done = true;
                break;
            }
        }
    }

    if let Err(e) = session.disconnect().await {
        warn!(error = %e, "disconnect cleanup reported an error");
    }
    // Dropping the session closes the outbound channel; let the writer
    // flush what is queued and send Close.
    drop(session);
    if !writer_done && tokio::time::timeout(FLUSH_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<String>,
    heartbeat: Duration,
) {
    let mut ping = tokio::time::interval(heartbeat.max(Duration::from_secs(1)));
    ping.tick().await; // first tick is immediate

    loop {
        tokio::select! {
            payload = outbound.recv() => match payload {
                Some(text) => {
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = ping.tick() => {
                if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                trace!("sent ping");
            }
        }
    }
    let _ = ws_tx.close().await;
}

fn close_frame(error: &ChatError) -> WsMessage {
    let code = if error.rejects_connection() {
        close_code::POLICY
    } else {
        close_code::ERROR
    };
    WsMessage::Close(Some(CloseFrame {
        code,
        reason: Utf8Bytes::from_static(error.error_kind()),
    }))
}
