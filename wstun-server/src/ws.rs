//! WebSocket session adapter
//!
//! Splits an upgraded socket into a writer task draining the connection's
//! [`PeerHandle`] queue and a frame stream fed to the relay's inbound flow.

use axum::extract::ws::{Message, WebSocket};
use futures::{future, SinkExt, StreamExt};
use wstun_core::{Frame, PeerHandle};

use crate::api::AppState;

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Binary(data) => Message::Binary(data),
        Frame::Text(text) => Message::Text(text),
    }
}

fn to_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Binary(data) => Some(Frame::Binary(data)),
        Message::Text(text) => Some(Frame::Text(text)),
        // Ping/pong are answered by the protocol layer
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) => None,
    }
}

/// Run one client connection until it closes
pub(crate) async fn handle_socket(socket: WebSocket, state: AppState) {
    let (peer, mut queue) = PeerHandle::channel(state.peer_queue);
    let id = peer.id();
    log::debug!("Connection {} opened", id);

    let (mut sink, stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = queue.recv().await {
            if let Err(e) = sink.send(to_message(frame)).await {
                log::debug!("Connection {} write failed: {}", id, e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    let frames = stream
        .take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
        .filter_map(|message| {
            future::ready(match message {
                Ok(message) => to_frame(message).map(Ok),
                Err(e) => Some(Err(wstun_core::Error::Transport(e.to_string()))),
            })
        });

    let result = state.relay.inbound(peer, Box::pin(frames)).await;

    // Bindings may still hold the peer handle, so the queue never closes on
    // its own
    writer.abort();

    match result {
        Ok(()) => log::debug!("Connection {} closed", id),
        Err(e) if e.is_interface_failure() => {
            log::error!("Connection {}: interface write failed: {}", id, e);
            let _ = state.fatal.send(e);
        }
        Err(e) => log::debug!("Connection {} terminated: {}", id, e),
    }
}
