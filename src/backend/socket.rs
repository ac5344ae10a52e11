//! WebSocket implementation of `InspectionTransport`
//!
//! One connection per inspection channel. Each connection gets a writer task
//! fed by an unbounded queue and a reader task that classifies text frames
//! and forwards them, tagged with their channel, to a shared receiver.
//! When a connection drops the reader emits an error frame for its channel.

use super::{BackendError, InboundFrame, InspectionKind, InspectionTransport, OutboundFrame};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Frames received from any channel, tagged with the channel they came from.
pub type InboundReceiver = mpsc::UnboundedReceiver<(InspectionKind, InboundFrame)>;

/// Derive the duplex base URL from the HTTP API URL (`http` → `ws`, `https` → `wss`).
pub fn websocket_base(api_url: &str) -> String {
    let trimmed = api_url.trim_end_matches('/');
    match trimmed.strip_prefix("http") {
        Some(rest) => format!("ws{}", rest),
        None => trimmed.to_string(),
    }
}

/// Inspection channels backed by WebSocket connections.
pub struct SocketTransport {
    outbound: HashMap<InspectionKind, mpsc::UnboundedSender<String>>,
}

impl SocketTransport {
    /// Open the requested channels against `api_url`.
    ///
    /// Fails if any channel cannot be opened; channels opened before the
    /// failure are closed when their queues drop.
    pub async fn connect(
        api_url: &str,
        kinds: &[InspectionKind],
    ) -> Result<(Self, InboundReceiver), BackendError> {
        let base = websocket_base(api_url);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let mut outbound = HashMap::new();

        for &kind in kinds {
            let url = format!("{}{}", base, kind.path());
            let (stream, _) = connect_async(url.as_str())
                .await
                .map_err(|e| BackendError::Unavailable(format!("{}: {}", url, e)))?;
            tracing::info!(%url, channel = %kind, "inspection channel connected");

            let (mut sink, mut source) = stream.split();
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();

            tokio::spawn(async move {
                while let Some(text) = rx.recv().await {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        tracing::warn!(channel = %kind, error = %e, "send failed");
                        break;
                    }
                }
                let _ = sink.close().await;
            });

            let inbound = inbound_tx.clone();
            tokio::spawn(async move {
                while let Some(message) = source.next().await {
                    match message {
                        Ok(Message::Text(text)) => {
                            if inbound.send((kind, InboundFrame::parse(&text))).is_err() {
                                return;
                            }
                        }
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(channel = %kind, error = %e, "receive failed");
                            break;
                        }
                    }
                }
                let _ = inbound.send((
                    kind,
                    InboundFrame::Error {
                        message: format!("{} channel closed", kind),
                        chapter: None,
                    },
                ));
            });

            outbound.insert(kind, tx);
        }

        Ok((Self { outbound }, inbound_rx))
    }
}

#[async_trait]
impl InspectionTransport for SocketTransport {
    async fn send(&self, kind: InspectionKind, frame: &OutboundFrame) -> Result<(), BackendError> {
        let text =
            serde_json::to_string(frame).map_err(|e| BackendError::Transport(e.to_string()))?;
        let queue = self
            .outbound
            .get(&kind)
            .ok_or(BackendError::ChannelClosed(kind))?;
        queue.send(text).map_err(|_| BackendError::ChannelClosed(kind))?;
        tracing::debug!(channel = %kind, "frame queued");
        Ok(())
    }
}
