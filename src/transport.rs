//! # Upstream Agent Transport
//!
//! Bidirectional connection to the remote conversational agent for the live
//! interview session.
//!
//! ## Contract:
//! - `open` completes the connection handshake within a bounded wait and
//!   emits `TransportEvent::Open`; everything that follows (server messages,
//!   socket errors, remote close) arrives as a typed event on the same
//!   controller-owned channel. The session event loop is the only consumer.
//! - `send` is fire-and-forget; blobs sent before the handshake completes
//!   are queued and flushed in order once the writer starts.
//! - Delivery order matches send order in both directions (ordered, reliable
//!   stream semantics). No framing guarantee: one agent utterance may arrive
//!   as one or many messages.
//!
//! ## Wire format:
//! JSON text frames. Outbound: a setup message carrying model and persona,
//! then realtime input messages each holding one encoded PCM blob. Inbound:
//! server content with at most one inline audio payload and/or an
//! `interrupted` flag for barge-in.

use crate::audio::codec::EncodedBlob;
use crate::config::UpstreamConfig;
use crate::error::AppError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

/// Decoded payload of one server message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerEvent {
    /// Inline audio chunk, if the message carries one
    pub audio: Option<EncodedBlob>,
    /// Barge-in: the agent stopped its current utterance
    pub interrupted: bool,
}

impl ServerEvent {
    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && !self.interrupted
    }
}

/// Typed events the transport delivers to the session controller.
#[derive(Debug)]
pub enum TransportEvent {
    /// Connection handshake completed
    Open,
    /// One decoded server payload
    Message(ServerEvent),
    /// Connection failure; the session treats this as fatal
    Error(String),
    /// Remote closed the connection
    Closed,
}

/// Transport seam for the session controller.
#[async_trait]
pub trait Transport: Send {
    /// Connect to the agent and start delivering events on `events`.
    async fn open(&mut self, events: mpsc::UnboundedSender<TransportEvent>) -> Result<(), AppError>;

    /// Queue one encoded blob for transmission. Fire-and-forget; preserves
    /// call order.
    fn send(&self, blob: EncodedBlob);

    /// Close the connection. Idempotent; safe before `open`.
    async fn close(&mut self);
}

// --- wire types -------------------------------------------------------------

#[derive(Serialize)]
struct SetupMessage<'a> {
    setup: SetupBody<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupBody<'a> {
    model: &'a str,
    system_instruction: &'a str,
    response_modalities: [&'a str; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage {
    realtime_input: RealtimeInput,
}

#[derive(Serialize)]
struct RealtimeInput {
    media: EncodedBlob,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    server_content: Option<ServerContent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    interrupted: Option<bool>,
}

#[derive(Deserialize)]
struct ModelTurn {
    parts: Vec<ModelTurnPart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelTurnPart {
    inline_data: Option<EncodedBlob>,
}

impl ServerMessage {
    /// Flatten the nested wire shape into a [`ServerEvent`]. At most one
    /// inline audio payload per message; the first one wins.
    fn into_event(self) -> ServerEvent {
        let Some(content) = self.server_content else {
            return ServerEvent::default();
        };

        let audio = content
            .model_turn
            .and_then(|turn| turn.parts.into_iter().find_map(|part| part.inline_data));

        ServerEvent {
            audio,
            interrupted: content.interrupted.unwrap_or(false),
        }
    }
}

// --- WebSocket implementation ----------------------------------------------

/// WebSocket transport to the configured live agent endpoint.
pub struct AgentTransport {
    config: UpstreamConfig,
    outgoing_tx: mpsc::UnboundedSender<EncodedBlob>,
    /// Consumed by the writer task on open; present means not yet opened
    outgoing_rx: Option<mpsc::UnboundedReceiver<EncodedBlob>>,
    close_tx: Option<oneshot::Sender<()>>,
}

impl AgentTransport {
    pub fn new(config: UpstreamConfig) -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        Self {
            config,
            outgoing_tx,
            outgoing_rx: Some(outgoing_rx),
            close_tx: None,
        }
    }
}

#[async_trait]
impl Transport for AgentTransport {
    async fn open(&mut self, events: mpsc::UnboundedSender<TransportEvent>) -> Result<(), AppError> {
        let mut outgoing_rx = self
            .outgoing_rx
            .take()
            .ok_or_else(|| AppError::Transport("transport already opened".to_string()))?;

        let timeout = Duration::from_millis(self.config.open_timeout_ms);
        let connect = connect_async(&self.config.agent_url);
        let (socket, _response) = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| {
                AppError::Transport(format!(
                    "open timed out after {}ms",
                    self.config.open_timeout_ms
                ))
            })?
            .map_err(|e| AppError::Transport(format!("connection failed: {}", e)))?;

        let (mut writer, mut reader) = socket.split();

        // Session setup: model, interviewer persona, audio-only responses
        let setup = serde_json::to_string(&SetupMessage {
            setup: SetupBody {
                model: &self.config.model,
                system_instruction: &self.config.system_instruction,
                response_modalities: ["AUDIO"],
            },
        })
        .map_err(|e| AppError::Transport(format!("cannot serialize setup: {}", e)))?;

        writer
            .send(WsMessage::Text(setup))
            .await
            .map_err(|e| AppError::Transport(format!("setup send failed: {}", e)))?;

        info!(url = %self.config.agent_url, model = %self.config.model, "Agent transport open");
        let _ = events.send(TransportEvent::Open);

        let (close_tx, mut close_rx) = oneshot::channel::<()>();
        self.close_tx = Some(close_tx);

        // Writer task: drains queued blobs in send order
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    blob = outgoing_rx.recv() => {
                        let Some(blob) = blob else { break };
                        let msg = RealtimeInputMessage {
                            realtime_input: RealtimeInput { media: blob },
                        };
                        let text = match serde_json::to_string(&msg) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("Dropping unserializable outbound frame: {}", e);
                                continue;
                            }
                        };
                        if writer.send(WsMessage::Text(text)).await.is_err() {
                            // Reader task reports the failure
                            break;
                        }
                    }
                    _ = &mut close_rx => {
                        let _ = writer.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }
            debug!("Transport writer task exited");
        });

        // Reader task: maps socket traffic to typed events, in receive order
        tokio::spawn(async move {
            while let Some(msg) = reader.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(message) => {
                                let event = message.into_event();
                                if !event.is_empty() {
                                    let _ = events.send(TransportEvent::Message(event));
                                }
                            }
                            Err(e) => {
                                // Malformed payload: drop the single message
                                warn!("Dropping unparseable server message: {}", e);
                            }
                        }
                    }
                    Ok(WsMessage::Close(reason)) => {
                        debug!("Agent closed connection: {:?}", reason);
                        let _ = events.send(TransportEvent::Closed);
                        return;
                    }
                    Ok(_) => {
                        // Ping/pong handled by the library, binary unused
                    }
                    Err(e) => {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        return;
                    }
                }
            }
            let _ = events.send(TransportEvent::Closed);
        });

        Ok(())
    }

    fn send(&self, blob: EncodedBlob) {
        // Queued until the writer task starts; dropped after close
        let _ = self.outgoing_tx.send(blob);
    }

    async fn close(&mut self) {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
            info!("Agent transport closed");
        }
    }
}
