use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout};

use crate::hub::client::{self, Client};
use crate::state::AppState;
use crate::ws::protocol;

/// Close code sent when the hub revokes a connection (replaced or shut down).
const CLOSE_GOING_AWAY: u16 = 1001;

/// How long the writer may take to flush after the connection ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// The connection is registered with the hub as a [`Client`], then split:
/// - Writer task: owns the sink, drains the client's outbound queue plus a
///   private control channel (pongs, pings, error frames)
/// - Reader task: decodes chat intents and hands them to the gateway
///
/// Either side stops when the hub signals `done`.
pub async fn run_connection(
    socket: WebSocket,
    state: AppState,
    user_id: i64,
    room_id: Option<i64>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (client, outbound) = Client::new(user_id, room_id, state.outbound_capacity);

    if let Err(e) = state.hub.register(client.clone()).await {
        tracing::warn!(user_id, error = %e, "Rejecting connection");
        let _ = ws_sender.send(close_message("server shutting down")).await;
        return;
    }

    tracing::info!(
        user_id,
        room_id = ?room_id,
        conn_id = %client.conn_id(),
        "WebSocket actor started"
    );

    let (control_tx, control_rx) = mpsc::unbounded_channel::<Message>();
    let mut writer_handle = tokio::spawn(writer_task(
        ws_sender,
        outbound,
        control_rx,
        client.done(),
    ));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Ping task: sends periodic pings and monitors pong responses
    let ping_tx = control_tx.clone();
    let ping_interval = state.ws.ping_interval();
    let pong_timeout = state.ws.pong_timeout();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(ping_interval);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(Bytes::from_static(b"hb"))).is_err() {
                // Writer task has died, connection is gone
                break;
            }

            match timeout(pong_timeout, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!(user_id, "Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: CLOSE_GOING_AWAY,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    let revoked = client::revoked(client.done());
    tokio::pin!(revoked);

    loop {
        let frame = tokio::select! {
            _ = &mut revoked => {
                tracing::info!(user_id, conn_id = %client.conn_id(), "Connection revoked by hub");
                break;
            }
            frame = ws_receiver.next() => frame,
        };

        match frame {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_frame(text.as_bytes(), &control_tx, &state, user_id).await;
                }
                Message::Binary(data) => {
                    protocol::handle_frame(&data, &control_tx, &state, user_id).await;
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = control_tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(user_id, reason = ?frame, "Client initiated close");
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(user_id, error = %e, "WebSocket receive error");
                break;
            }
            None => {
                tracing::info!(user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    ping_handle.abort();

    // Removes the client if it is still the registered one; closing its
    // outbound queue lets the writer finish.
    if state.hub.unregister(&client).await.is_err() {
        // Hub already stopped; stop() closed every client.
        client.close();
    }
    drop(control_tx);

    if timeout(WRITER_DRAIN_TIMEOUT, &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }

    tracing::info!(user_id, conn_id = %client.conn_id(), "WebSocket actor stopped");
}

/// Writer task: forwards queued payloads and control frames to the sink.
/// Hub payloads are sent as text frames when they are valid UTF-8.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Bytes>,
    mut control: mpsc::UnboundedReceiver<Message>,
    done: watch::Receiver<bool>,
) {
    let revoked = client::revoked(done);
    tokio::pin!(revoked);

    loop {
        let msg = tokio::select! {
            biased;
            Some(msg) = control.recv() => msg,
            payload = outbound.recv() => match payload {
                Some(payload) => payload_message(payload),
                // Queue closed by the hub
                None => break,
            },
            _ = &mut revoked => break,
        };

        let is_close = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed, connection is broken
            return;
        }
        if is_close {
            return;
        }
    }

    let _ = ws_sender.send(close_message("connection closed by server")).await;
}

fn payload_message(payload: Bytes) -> Message {
    match std::str::from_utf8(&payload) {
        Ok(text) => Message::Text(text.to_owned().into()),
        Err(_) => Message::Binary(payload),
    }
}

fn close_message(reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code: CLOSE_GOING_AWAY,
        reason: reason.into(),
    }))
}
