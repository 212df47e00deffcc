//! HTTP surface: one WebSocket per room member.
//!
//! A member that falls behind the room's broadcast buffer is disconnected
//! with close code 1013 rather than left with a gap; it reconnects and
//! reloads the sheet.

use crate::hub::{Frame, Hub, MemberId};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};

pub fn router(hub: Hub) -> Router {
    Router::new()
        .route("/room/ws/:room_id", get(room_socket))
        .route("/health", get(health))
        .with_state(hub)
}

async fn health() -> &'static str {
    "ok"
}

async fn room_socket(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    State(hub): State<Hub>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_member(socket, hub, room_id))
}

async fn serve_member(socket: WebSocket, hub: Hub, room: String) {
    let (member, frames) = hub.join(&room);
    let (sink, mut stream) = socket.split();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<String>();
    let mut writer = tokio::spawn(write_frames(sink, member, frames, reply_rx));

    loop {
        let message = tokio::select! {
            _ = &mut writer => break,
            message = stream.next() => match message {
                Some(Ok(message)) => message,
                _ => break,
            },
        };
        match message {
            WsMessage::Text(raw) => {
                let reply = hub.handle(&room, member, &raw);
                match reply.to_json() {
                    Ok(json) => {
                        if reply_tx.send(json).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to encode reply"),
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    hub.leave(&room, member);
}

/// What the writer does with one broadcast result.
#[derive(Debug)]
enum Outgoing {
    Send(String),
    Skip,
    Close(CloseFrame<'static>),
    Stop,
}

fn route_frame(member: MemberId, frame: Result<Frame, broadcast::error::RecvError>) -> Outgoing {
    match frame {
        Ok(frame) if frame.from == member => Outgoing::Skip,
        Ok(frame) => Outgoing::Send(frame.raw),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            tracing::warn!(member, skipped, "Member fell behind; closing so it resyncs");
            Outgoing::Close(CloseFrame {
                code: close_code::AGAIN,
                reason: "fell behind the room; reload the sheet".into(),
            })
        }
        Err(broadcast::error::RecvError::Closed) => Outgoing::Stop,
    }
}

/// Forward replies and other members' frames to one socket.
async fn write_frames(
    mut sink: futures::stream::SplitSink<WebSocket, WsMessage>,
    member: MemberId,
    mut frames: broadcast::Receiver<Frame>,
    mut replies: mpsc::UnboundedReceiver<String>,
) {
    loop {
        let text = tokio::select! {
            reply = replies.recv() => match reply {
                Some(text) => text,
                None => break,
            },
            frame = frames.recv() => match route_frame(member, frame) {
                Outgoing::Send(text) => text,
                Outgoing::Skip => continue,
                Outgoing::Close(close) => {
                    if let Err(e) = sink.send(WsMessage::Close(Some(close))).await {
                        tracing::debug!(member, error = %e, "Failed to send close frame");
                    }
                    break;
                }
                Outgoing::Stop => break,
            },
        };
        if let Err(e) = sink.send(WsMessage::Text(text)).await {
            tracing::error!(member, error = %e, "Failed to write to socket");
            break;
        }
    }
}
