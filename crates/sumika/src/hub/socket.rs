use std::fmt::Display;
use std::time::Duration;

use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use futures::Sink;
use futures::SinkExt;
use futures::Stream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::actor::Frame;
use super::actor::HubError;
use super::actor::HubHandle;
use crate::config::HubConfig;

/// Serve one real-time client until either side gives up
pub async fn run_session(socket: WebSocket, hub: HubHandle, config: HubConfig) {
    let (id, queue) = match hub.register(config.client_queue).await {
        Ok(client) => client,
        Err(e) => {
            warn!("Rejecting real-time client: {}", e);
            return;
        }
    };

    let (sink, stream) = socket.split();
    let writer = write_loop(
        sink,
        queue,
        config.ping_interval(),
        config.write_timeout(),
    );
    let reader = read_loop(stream, config.read_timeout());

    let result = tokio::select! {
        result = writer => result,
        result = reader => result,
    };
    match result {
        Ok(()) => info!("Client {} disconnected", id),
        Err(e) => info!("Client {} closed: {}", id, e),
    }

    hub.unregister(id);
}

/// Forward queued envelopes and keepalive pings to the client
///
/// Returns once the hub drops the queue or a write misses its deadline.
pub(crate) async fn write_loop<S>(
    mut sink: S,
    mut queue: mpsc::Receiver<Frame>,
    ping_interval: Duration,
    write_timeout: Duration,
) -> Result<(), HubError>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);

    loop {
        let message = tokio::select! {
            frame = queue.recv() => match frame {
                Some(frame) => Message::Text(frame.to_string()),
                None => {
                    debug!("Client queue closed by hub");
                    let _ = timeout(write_timeout, sink.send(Message::Close(None))).await;
                    return Ok(());
                }
            },
            _ = ping.tick() => Message::Ping(Vec::new()),
        };

        match timeout(write_timeout, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(HubError::Write(e.to_string())),
            Err(_) => return Err(HubError::WriteTimeout),
        }
    }
}

/// Drain inbound frames, closing when nothing arrives within `read_timeout`
pub(crate) async fn read_loop<S, E>(mut stream: S, read_timeout: Duration) -> Result<(), HubError>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        match timeout(read_timeout, stream.next()).await {
            Err(_) => return Err(HubError::ReadTimeout(read_timeout)),
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return Ok(()),
            Ok(Some(Err(e))) => return Err(HubError::Read(e.to_string())),
            // Pings are answered by the websocket layer; any frame counts as activity
            Ok(Some(Ok(_))) => {}
        }
    }
}
