//! WebSocket change-stream transport.
//!
//! Adapter from a JSON-over-WebSocket realtime endpoint to the
//! [`ChangeTransport`] seam. Each subscribe opens one socket carrying the
//! whole table registry; change envelopes arrive as text frames.

use async_trait::async_trait;
use futures_util::StreamExt;
use livesync_core::{
    ChangeEnvelope, ChangeTransport, ChannelHandle, ChannelId, ChannelStatus, EntityTable,
    SessionKey, SyncError, TransportEvent,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

const CHANNEL_BUFFER: usize = 256;

#[derive(Clone)]
pub struct WsTransport {
    inner: Arc<WsInner>,
}

struct WsInner {
    endpoint: String,
    next_id: AtomicU64,
    readers: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl WsTransport {
    /// `endpoint` is the websocket URL of the realtime service, e.g.
    /// `wss://realtime.example.com/stream`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(WsInner {
                endpoint: endpoint.into(),
                next_id: AtomicU64::new(1),
                readers: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn readers(&self) -> std::sync::MutexGuard<'_, HashMap<u64, JoinHandle<()>>> {
        self.inner.readers.lock().expect("reader registry poisoned")
    }
}

#[async_trait]
impl ChangeTransport for WsTransport {
    async fn subscribe(
        &self,
        session: SessionKey,
        tables: &[EntityTable],
    ) -> Result<ChannelHandle, SyncError> {
        let filters: Vec<&str> = tables.iter().map(EntityTable::as_str).collect();
        let url = format!(
            "{}?session={}&tables={}",
            self.inner.endpoint,
            session,
            filters.join(",")
        );
        let (stream, _response) =
            connect_async(url.as_str())
                .await
                .map_err(|err| SyncError::TransportSubscribe {
                    reason: err.to_string(),
                })?;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        let task = tokio::spawn(read_frames(stream, tx));

        let mut readers = self.readers();
        readers.retain(|_, task| !task.is_finished());
        readers.insert(id, task);
        debug!(session = %session, channel = id, "WebSocket channel opened");

        Ok(ChannelHandle {
            id: ChannelId(id),
            events: rx,
        })
    }

    async fn unsubscribe(&self, channel: ChannelId) {
        if let Some(task) = self.readers().remove(&channel.0) {
            task.abort();
            debug!(channel = channel.0, "WebSocket channel closed");
        }
    }

    fn active_channel_count(&self) -> usize {
        self.readers().values().filter(|task| !task.is_finished()).count()
    }
}

async fn read_frames(
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    tx: mpsc::Sender<TransportEvent>,
) {
    // The completed handshake is the subscribe-ack.
    if tx
        .send(TransportEvent::Status(ChannelStatus::Subscribed))
        .await
        .is_err()
    {
        return;
    }

    let (_write, mut read) = stream.split();
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ChangeEnvelope>(&text) {
                Ok(envelope) => {
                    if tx.send(TransportEvent::Change(envelope)).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "Dropping undecodable change frame");
                }
            },
            Ok(Message::Close(_)) => {
                let _ = tx.send(TransportEvent::Status(ChannelStatus::Closed)).await;
                return;
            }
            Ok(_) => {}
            Err(err) => {
                let _ = tx
                    .send(TransportEvent::Status(ChannelStatus::Errored(
                        err.to_string(),
                    )))
                    .await;
                return;
            }
        }
    }
    let _ = tx.send(TransportEvent::Status(ChannelStatus::Closed)).await;
}
