// src/progress.rs

//! Live subscription to the worker service's progress feed.
//!
//! The channel cycles `Connecting -> Connected -> Disconnected` for as long
//! as it runs. After every disconnect (or failed attempt) exactly one new
//! attempt is made after a fixed delay; there is no backoff and no retry
//! cap. Frames that fail to decode are delivered as decode-error events and
//! never close the connection.

use crate::models::{ConnectionState, ProgressEvent, ProgressStatus};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("socket error: {0}")]
    Socket(String),
}

/// Inbound text frames of one connection. Ends when the peer goes away.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<FrameStream, TransportError>;
}

/// Websocket connector with a bounded opening handshake.
#[derive(Debug, Clone)]
pub struct WsConnector {
    endpoint: String,
    handshake_timeout: Duration,
}

impl WsConnector {
    pub fn new(endpoint: impl Into<String>, handshake_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            handshake_timeout,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<FrameStream, TransportError> {
        let attempt = connect_async(self.endpoint.as_str());
        let (ws, _response) = tokio::time::timeout(self.handshake_timeout, attempt)
            .await
            .map_err(|_| TransportError::HandshakeTimeout(self.handshake_timeout))?
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let frames = ws.filter_map(|msg| {
            let item = match msg {
                Ok(WsMessage::Text(text)) => Some(Ok(text)),
                Ok(WsMessage::Binary(bytes)) => Some(Ok(String::from_utf8_lossy(&bytes).into_owned())),
                Ok(WsMessage::Close(frame)) => {
                    tracing::debug!(?frame, "progress feed closed by peer");
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::Socket(e.to_string()))),
            };
            futures_util::future::ready(item)
        });
        Ok(Box::pin(frames))
    }
}

/// Parses one frame: a JSON object with a `status` field; every other
/// field becomes the payload.
pub fn decode_frame(text: &str) -> ProgressEvent {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return ProgressEvent::decode_error(e.to_string()),
    };
    let Value::Object(mut fields) = value else {
        return ProgressEvent::decode_error("frame is not a JSON object");
    };
    let Some(raw_status) = fields.remove("status") else {
        return ProgressEvent::decode_error("frame has no status");
    };
    let status: ProgressStatus = match serde_json::from_value(raw_status.clone()) {
        Ok(s) => s,
        Err(_) => return ProgressEvent::decode_error(format!("unknown status {raw_status}")),
    };

    ProgressEvent {
        status,
        payload: (!fields.is_empty()).then_some(fields),
    }
}

enum PumpEnd {
    Disconnected,
    Shutdown,
}

pub struct ProgressChannel {
    connector: Arc<dyn Connector>,
    reconnect_delay: Duration,
    subscribers: Mutex<Vec<UnboundedSender<ProgressEvent>>>,
    state: watch::Sender<ConnectionState>,
}

impl ProgressChannel {
    pub fn new(connector: Arc<dyn Connector>, reconnect_delay: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            reconnect_delay,
            subscribers: Mutex::new(Vec::new()),
            state,
        }
    }

    /// New listener. Receives every event published from now on, in order.
    pub fn subscribe(&self) -> UnboundedReceiver<ProgressEvent> {
        let (tx, rx) = unbounded_channel();
        self.lock_subscribers().push(tx);
        rx
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(shutdown).await })
    }

    /// Connect/reconnect loop. Only returns once `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut reported_down = false;
        loop {
            self.set_state(ConnectionState::Connecting);

            let attempt = tokio::select! {
                _ = shutdown.cancelled() => return,
                attempt = self.connector.connect() => attempt,
            };

            match attempt {
                Ok(frames) => {
                    tracing::info!("progress feed connected");
                    self.set_state(ConnectionState::Connected);
                    self.publish(ProgressEvent::new(ProgressStatus::Connected));
                    reported_down = false;

                    if let PumpEnd::Shutdown = self.pump(frames, &shutdown).await {
                        return;
                    }
                    tracing::info!(
                        delay = ?self.reconnect_delay,
                        "progress feed closed, reconnecting"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, delay = ?self.reconnect_delay, "progress feed unavailable");
                }
            }

            self.set_state(ConnectionState::Disconnected);
            if !reported_down {
                self.publish(ProgressEvent::new(ProgressStatus::Disconnected));
                reported_down = true;
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }

    async fn pump(&self, mut frames: FrameStream, shutdown: &CancellationToken) -> PumpEnd {
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => return PumpEnd::Shutdown,
                next = frames.next() => next,
            };
            match next {
                Some(Ok(text)) => {
                    let event = decode_frame(&text);
                    if event.is_decode_error() {
                        tracing::warn!(frame = %text, "undecodable progress frame");
                    } else {
                        tracing::debug!(status = event.status.as_str(), "progress");
                    }
                    self.publish(event);
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "progress feed error");
                    return PumpEnd::Disconnected;
                }
                None => return PumpEnd::Disconnected,
            }
        }
    }

    fn publish(&self, event: ProgressEvent) {
        self.lock_subscribers()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_replace(next);
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<UnboundedSender<ProgressEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tokio::time::Instant;

    /// Records the (virtual) time of every attempt. Hands out the scripted
    /// connections in order, then refuses.
    struct ScriptedConnector {
        attempts: Mutex<Vec<Instant>>,
        scripted: Mutex<Vec<Vec<Result<String, TransportError>>>>,
    }

    impl ScriptedConnector {
        fn refusing() -> Self {
            Self::with_connections(Vec::new())
        }

        fn with_connections(mut connections: Vec<Vec<Result<String, TransportError>>>) -> Self {
            connections.reverse();
            Self {
                attempts: Mutex::new(Vec::new()),
                scripted: Mutex::new(connections),
            }
        }

        fn attempts(&self) -> Vec<Instant> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self) -> Result<FrameStream, TransportError> {
            self.attempts.lock().unwrap().push(Instant::now());
            match self.scripted.lock().unwrap().pop() {
                Some(frames) => Ok(Box::pin(stream::iter(frames))),
                None => Err(TransportError::Connect("connection refused".into())),
            }
        }
    }

    fn gaps(attempts: &[Instant]) -> Vec<Duration> {
        attempts.windows(2).map(|w| w[1] - w[0]).collect()
    }

    #[test]
    fn decodes_status_and_payload() {
        let event = decode_frame(r#"{"status":"converting","percent":42}"#);
        assert_eq!(event.status, ProgressStatus::Converting);
        assert_eq!(event.payload.unwrap()["percent"], 42);

        let bare = decode_frame(r#"{"status":"finished"}"#);
        assert_eq!(bare, ProgressEvent::new(ProgressStatus::Finished));
    }

    #[test]
    fn malformed_frames_become_decode_errors() {
        for frame in ["not json", "[1,2]", r#"{"percent":1}"#, r#"{"status":"exploded"}"#] {
            let event = decode_frame(frame);
            assert!(event.is_decode_error(), "{frame} should not decode");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connections_retry_on_a_fixed_delay_forever() {
        let connector = Arc::new(ScriptedConnector::refusing());
        let channel = Arc::new(ProgressChannel::new(connector.clone(), Duration::from_secs(5)));
        let mut events = channel.subscribe();
        let shutdown = CancellationToken::new();
        let handle = channel.spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(61)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 13);
        assert!(gaps(&attempts).iter().all(|g| *g == Duration::from_secs(5)));

        // "disconnected" is reported once, not once per failed attempt.
        assert_eq!(events.recv().await, Some(ProgressEvent::new(ProgressStatus::Disconnected)));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn one_reconnect_is_scheduled_after_a_disconnect() {
        let connector = Arc::new(ScriptedConnector::with_connections(vec![
            vec![Ok(r#"{"status":"started"}"#.to_string())],
            vec![Ok(r#"{"status":"finished"}"#.to_string())],
        ]));
        let channel = Arc::new(ProgressChannel::new(connector.clone(), Duration::from_secs(5)));
        let mut events = channel.subscribe();
        let shutdown = CancellationToken::new();
        let handle = channel.spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(7)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(gaps(&attempts), [Duration::from_secs(5)]);

        let mut statuses = Vec::new();
        while let Ok(e) = events.try_recv() {
            statuses.push(e.status);
        }
        assert_eq!(
            statuses,
            [
                ProgressStatus::Connected,
                ProgressStatus::Started,
                ProgressStatus::Disconnected,
                ProgressStatus::Connected,
                ProgressStatus::Finished,
                ProgressStatus::Disconnected,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn bad_frame_does_not_drop_the_connection() {
        let connector = Arc::new(ScriptedConnector::with_connections(vec![vec![
            Ok(r#"{"status":"started"}"#.to_string()),
            Ok("{oops".to_string()),
            Ok(r#"{"status":"converting"}"#.to_string()),
            Err(TransportError::Socket("reset by peer".into())),
            Ok(r#"{"status":"finished"}"#.to_string()),
        ]]));
        let channel = Arc::new(ProgressChannel::new(connector.clone(), Duration::from_secs(5)));
        let mut events = channel.subscribe();
        let shutdown = CancellationToken::new();
        let handle = channel.spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let mut got = Vec::new();
        while let Ok(e) = events.try_recv() {
            got.push(e);
        }
        assert_eq!(got[0].status, ProgressStatus::Connected);
        assert_eq!(got[1].status, ProgressStatus::Started);
        assert!(got[2].is_decode_error());
        assert_eq!(got[3].status, ProgressStatus::Converting);
        // The socket error ends the connection; the frame after it is never read.
        assert_eq!(got[4].status, ProgressStatus::Disconnected);
        assert_eq!(got.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_subscribers_are_pruned() {
        let connector = Arc::new(ScriptedConnector::refusing());
        let channel = Arc::new(ProgressChannel::new(connector, Duration::from_secs(5)));
        let dropped = channel.subscribe();
        let mut kept = channel.subscribe();
        drop(dropped);

        let shutdown = CancellationToken::new();
        let handle = channel.spawn(shutdown.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(kept.recv().await.unwrap().status, ProgressStatus::Disconnected);
        assert_eq!(channel.lock_subscribers().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_state_is_observable() {
        let connector = Arc::new(ScriptedConnector::refusing());
        let channel = Arc::new(ProgressChannel::new(connector, Duration::from_secs(5)));
        let state = channel.connection_state();
        let shutdown = CancellationToken::new();
        let handle = channel.spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
        shutdown.cancel();
        handle.await.unwrap();
    }
}
