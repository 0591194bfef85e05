//! WebSocket subscribers for live view counts
//!
//! Each connection is registered with the broadcast coordinator and then
//! served by two tasks: a reader that discards inbound frames and enforces
//! the pong deadline, and a writer that drains the subscriber queue and
//! pings the peer. When either task ends the subscriber is unregistered.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::analytics::broadcast::{Broadcaster, ChannelSet, Frame, SubscriberHandle};
use crate::api::handlers::AppState;
use crate::config::WebSocketConfig;

/// Query parameters for the WebSocket endpoint
#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Comma-separated channels, e.g. `global,page:/blog`. All when absent.
    pub channels: Option<String>,
}

/// Why the reader stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEnd {
    Closed,
    DeadlineElapsed,
    Error,
}

/// Why the writer stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteEnd {
    QueueClosed,
    WriteFailed,
    PingFailed,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let channels = ChannelSet::from_query(params.channels.as_deref());
    let broadcaster = state.analytics.broadcaster.clone();
    let settings = state.websocket.clone();

    ws.max_message_size(settings.max_message_bytes)
        .on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| serve_subscriber(socket, broadcaster, channels, settings))
}

async fn serve_subscriber(
    socket: WebSocket,
    broadcaster: Broadcaster,
    channels: ChannelSet,
    settings: WebSocketConfig,
) {
    let Some(SubscriberHandle { id, frames }) = broadcaster.subscribe(channels).await else {
        warn!("broadcast coordinator unavailable, closing websocket");
        return;
    };
    info!(subscriber = id, "websocket subscriber connected");

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(sink, frames, settings.ping_interval()));
    let mut reader = tokio::spawn(read_loop(stream, settings.pong_wait()));

    tokio::select! {
        end = &mut reader => {
            debug!(subscriber = id, reason = ?end.ok(), "reader finished");
            broadcaster.unsubscribe(id).await;
            // Unregistering closes the queue; the writer sends Close and exits
            if timeout(settings.pong_wait(), &mut writer).await.is_err() {
                writer.abort();
            }
        }
        end = &mut writer => {
            debug!(subscriber = id, reason = ?end.ok(), "writer finished");
            broadcaster.unsubscribe(id).await;
            reader.abort();
        }
    }

    info!(subscriber = id, "websocket subscriber disconnected");
}

/// Drain and discard inbound frames. Every pong pushes the deadline out by
/// `pong_wait`; nothing else does.
pub async fn read_loop<S>(mut stream: S, pong_wait: Duration) -> ReadEnd
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut deadline = Instant::now() + pong_wait;

    loop {
        match timeout_at(deadline, stream.next()).await {
            Err(_) => return ReadEnd::DeadlineElapsed,
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return ReadEnd::Closed,
            Ok(Some(Err(e))) => {
                debug!(error = %e, "websocket read failed");
                return ReadEnd::Error;
            }
            Ok(Some(Ok(Message::Pong(_)))) => {
                deadline = Instant::now() + pong_wait;
            }
            Ok(Some(Ok(_))) => {}
        }
    }
}

/// Forward queued frames to the peer and ping it every `ping_interval`.
/// Sends Close once the queue is closed by the coordinator.
pub async fn write_loop<S>(
    mut sink: S,
    mut frames: mpsc::Receiver<Frame>,
    ping_interval: Duration,
) -> WriteEnd
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ticker = interval_at(Instant::now() + ping_interval, ping_interval);

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    let _ = sink.send(Message::Close(None)).await;
                    return WriteEnd::QueueClosed;
                };
                if let Err(e) = sink.send(Message::Text(frame.to_string().into())).await {
                    debug!(error = %e, "websocket write failed");
                    return WriteEnd::WriteFailed;
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = sink.send(Message::Ping(Vec::new().into())).await {
                    debug!(error = %e, "websocket ping failed");
                    return WriteEnd::PingFailed;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;

    #[tokio::test]
    async fn test_reader_times_out_without_pong() {
        let (_tx, rx) = fmpsc::unbounded::<Result<Message, axum::Error>>();
        let end = read_loop(rx, Duration::from_millis(50)).await;
        assert_eq!(end, ReadEnd::DeadlineElapsed);
    }

    #[tokio::test]
    async fn test_pong_extends_deadline_but_other_frames_do_not() {
        let (tx, rx) = fmpsc::unbounded::<Result<Message, axum::Error>>();
        let reader = tokio::spawn(read_loop(rx, Duration::from_millis(150)));

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(60)).await;
            tx.unbounded_send(Ok(Message::Pong(Vec::new().into()))).unwrap();
        }
        // Still alive after ~240ms thanks to the pongs
        assert!(!reader.is_finished());

        tx.unbounded_send(Ok(Message::Text("hello".to_string().into()))).unwrap();
        let end = reader.await.unwrap();
        assert_eq!(end, ReadEnd::DeadlineElapsed);
    }

    #[tokio::test]
    async fn test_reader_stops_on_close_and_error() {
        let (tx, rx) = fmpsc::unbounded::<Result<Message, axum::Error>>();
        tx.unbounded_send(Ok(Message::Binary(vec![1, 2, 3].into()))).unwrap();
        tx.unbounded_send(Ok(Message::Close(None))).unwrap();
        assert_eq!(read_loop(rx, Duration::from_secs(5)).await, ReadEnd::Closed);

        let (tx, rx) = fmpsc::unbounded::<Result<Message, axum::Error>>();
        tx.unbounded_send(Err(axum::Error::new("connection reset"))).unwrap();
        assert_eq!(read_loop(rx, Duration::from_secs(5)).await, ReadEnd::Error);
    }

    #[tokio::test]
    async fn test_writer_forwards_frames_and_closes_with_queue() {
        let (sink, mut sent) = fmpsc::unbounded::<Message>();
        let (queue, frames) = mpsc::channel::<Frame>(4);

        let writer = tokio::spawn(write_loop(sink, frames, Duration::from_secs(60)));
        queue.send(Arc::from("{\"type\":\"view_counts\"}")).await.unwrap();
        drop(queue);

        assert_eq!(writer.await.unwrap(), WriteEnd::QueueClosed);
        match sent.next().await {
            Some(Message::Text(text)) => assert_eq!(text.as_str(), "{\"type\":\"view_counts\"}"),
            other => panic!("expected text frame, got {other:?}"),
        }
        assert!(matches!(sent.next().await, Some(Message::Close(None))));
    }

    #[tokio::test]
    async fn test_writer_pings_on_interval() {
        let (sink, mut sent) = fmpsc::unbounded::<Message>();
        let (_queue, frames) = mpsc::channel::<Frame>(4);

        let writer = tokio::spawn(write_loop(sink, frames, Duration::from_millis(30)));
        assert!(matches!(sent.next().await, Some(Message::Ping(_))));
        assert!(matches!(sent.next().await, Some(Message::Ping(_))));
        writer.abort();
    }

    #[tokio::test]
    async fn test_writer_stops_when_peer_gone() {
        let (sink, sent) = fmpsc::unbounded::<Message>();
        drop(sent);
        let (queue, frames) = mpsc::channel::<Frame>(4);
        queue.send(Arc::from("frame")).await.unwrap();

        let end = write_loop(sink, frames, Duration::from_secs(60)).await;
        assert_eq!(end, WriteEnd::WriteFailed);
    }
}
