//! HTTP and WebSocket surface of the relay.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::trace::TraceLayer;

use super::rooms::{is_valid_room_name, Room, RoomRegistry};

/// Builds the relay's router.
///
/// - `GET /health`: health check
/// - `GET /ws/diagram/{room}/`: WebSocket endpoint for `room`
pub fn router(registry: Arc<RoomRegistry>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws/diagram/{room}/", get(ws_handler))
        .with_state(registry)
        .layer(TraceLayer::new_for_http())
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    rooms: usize,
}

async fn health(State(registry): State<Arc<RoomRegistry>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        rooms: registry.room_count().await,
    })
}

async fn ws_handler(
    Path(room): Path<String>,
    ws: WebSocketUpgrade,
    State(registry): State<Arc<RoomRegistry>>,
) -> Response {
    if !is_valid_room_name(&room) {
        return (StatusCode::NOT_FOUND, "unknown room").into_response();
    }
    let room = registry.room(&room).await;
    ws.on_upgrade(move |socket| handle_socket(socket, room))
}

async fn handle_socket(socket: WebSocket, room: Arc<Room>) {
    let mut membership = room.join().await;
    let participant_id = membership.participant_id.clone();
    let (mut sender, mut receiver) = socket.split();

    if sender
        .send(Message::Text(membership.init.clone().into()))
        .await
        .is_err()
    {
        room.leave(&participant_id).await;
        return;
    }

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    room.handle_frame(&participant_id, text.as_str()).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(participant_id = %participant_id, error = %e, "socket error");
                    break;
                }
            },
            frame = next_room_frame(&room, &participant_id, &mut membership.frames) => {
                let Some(frame) = frame else {
                    break;
                };
                if sender.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    room.leave(&participant_id).await;
}

/// Next frame to forward to a participant.
///
/// `None` once the room channel is closed or the participant fell behind
/// and missed frames. The socket is closed then, and the client's
/// reconnect brings a fresh `init` with the whole document and lock table.
async fn next_room_frame(
    room: &Room,
    participant_id: &str,
    frames: &mut broadcast::Receiver<String>,
) -> Option<String> {
    match frames.recv().await {
        Ok(frame) => Some(frame),
        Err(RecvError::Lagged(skipped)) => {
            tracing::warn!(
                room = %room.name(),
                participant_id = %participant_id,
                skipped,
                "participant fell behind, closing its socket"
            );
            None
        }
        Err(RecvError::Closed) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_lagging_participant_is_cut_off() {
        let registry = RoomRegistry::new();
        let room = registry.room("lagging").await;
        let alice = room.join().await;
        let mut bob = room.join().await;

        // users(2) plus one lock per frame, without bob reading any of them.
        for i in 0..70 {
            let frame = format!(r#"{{"type":"lock_element","element_id":"Task_{}"}}"#, i);
            room.handle_frame(&alice.participant_id, &frame).await;
        }
        assert_eq!(room.locks().await.len(), 70);

        assert_eq!(
            next_room_frame(&room, &bob.participant_id, &mut bob.frames).await,
            None
        );
    }

    #[tokio::test]
    async fn test_room_frames_are_forwarded_in_order() {
        let registry = RoomRegistry::new();
        let room = registry.room("steady").await;
        let mut alice = room.join().await;

        room.handle_frame(
            &alice.participant_id,
            r#"{"type":"lock_element","element_id":"Task_1"}"#,
        )
        .await;

        let users = next_room_frame(&room, &alice.participant_id, &mut alice.frames).await;
        assert!(users.unwrap().contains(r#""type":"users""#));
        let lock = next_room_frame(&room, &alice.participant_id, &mut alice.frames).await;
        assert!(lock.unwrap().contains("Task_1"));
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(Arc::new(RoomRegistry::new()));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invalid_room_name_is_rejected() {
        let registry = Arc::new(RoomRegistry::new());
        let app = router(registry.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ws/diagram/bad-name/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_ne!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(registry.room_count().await, 0);
    }
}
