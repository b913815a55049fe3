//! Live-connect transport over a single WebSocket.
//!
//! # Connection Flow
//!
//! 1. Connect to `<endpoint>?access_token=<credential>`
//! 2. Send the `setup` frame and report `Open`
//! 3. A background task writes queued frames and classifies inbound frames
//!    into events until either side closes
//!
//! Control messages and audio share the socket; audio travels as base64
//! `realtimeInput` chunks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use super::config::{LIVE_DEFAULT_URL, LIVE_INPUT_SAMPLE_RATE, build_live_url};
use super::messages::{LiveServerMessage, client_content, realtime_audio, setup_message};
use crate::core::credentials::Credential;
use crate::core::events::Event;
use crate::core::transport::{
    ChannelHandle, ControlMessage, EventSink, SessionConfig, SharedChannel, TransportChannel,
    TransportError, TransportKind, TransportResult,
};

// =============================================================================
// Transport
// =============================================================================

/// Vendor-native live-connect strategy.
#[derive(Debug, Clone)]
pub struct LiveTransport {
    endpoint: String,
    input_sample_rate: u32,
}

impl Default for LiveTransport {
    fn default() -> Self {
        Self::new(LIVE_DEFAULT_URL)
    }
}

impl LiveTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            input_sample_rate: LIVE_INPUT_SAMPLE_RATE,
        }
    }

    /// Override the sample rate advertised for microphone chunks.
    pub fn with_input_sample_rate(mut self, sample_rate: u32) -> Self {
        self.input_sample_rate = sample_rate;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Forward one inbound text frame to the sink.
    ///
    /// Frames that are not JSON objects are logged and dropped.
    fn dispatch(text: &str, events: &dyn EventSink) {
        match LiveServerMessage::parse(text) {
            Ok(message) => {
                for event in message.into_events() {
                    events.emit(event);
                }
            }
            Err(e) => {
                tracing::warn!("Failed to parse live server message: {}", e);
            }
        }
    }
}

#[async_trait]
impl TransportChannel for LiveTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::NativeLive
    }

    async fn open(
        &self,
        credential: &Credential,
        config: &SessionConfig,
        events: Arc<dyn EventSink>,
    ) -> TransportResult<SharedChannel> {
        let url = build_live_url(&self.endpoint, credential.expose())?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        tracing::info!("Connected to live endpoint {}", self.endpoint);

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        ws_sink
            .send(Message::Text(setup_message(config).to_text().into()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let closing = Arc::new(AtomicBool::new(false));

        let task_closing = closing.clone();
        let task_events = events.clone();
        let handle = tokio::spawn(async move {
            let close_reason = loop {
                tokio::select! {
                    outbound = rx.recv() => {
                        let Some(message) = outbound else {
                            break None;
                        };
                        let is_close = matches!(message, Message::Close(_));
                        if let Err(e) = ws_sink.send(message).await {
                            tracing::error!("Failed to send WebSocket message: {}", e);
                            break Some(format!("send failed: {e}"));
                        }
                        if is_close {
                            break None;
                        }
                    }

                    inbound = ws_stream.next() => {
                        match inbound {
                            Some(Ok(Message::Text(text))) => {
                                Self::dispatch(text.as_str(), task_events.as_ref());
                            }
                            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                                Ok(text) => Self::dispatch(text, task_events.as_ref()),
                                Err(_) => tracing::debug!("Ignoring non-UTF-8 binary frame ({} bytes)", data.len()),
                            },
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::error!("Failed to send pong: {}", e);
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                tracing::info!("Live WebSocket closed by server");
                                break Some(frame.map(|f| f.reason.as_str().to_string()).unwrap_or_default());
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::error!("Live WebSocket error: {}", e);
                                if !task_closing.load(Ordering::SeqCst) {
                                    task_events.emit(Event::Error { detail: e.to_string() });
                                }
                                break Some(e.to_string());
                            }
                            None => break Some("connection ended".to_string()),
                        }
                    }
                }
            };

            // Locally initiated closes are reported by the controller.
            if let Some(reason) = close_reason
                && !task_closing.swap(true, Ordering::SeqCst)
            {
                task_events.emit(Event::Close { reason });
            }
            tracing::debug!("Live connection task finished");
        });

        let channel = LiveChannel {
            tx,
            closing,
            task: Mutex::new(Some(handle)),
            input_sample_rate: self.input_sample_rate,
        };

        events.emit(Event::Open);
        Ok(Arc::new(channel))
    }

    fn handshake(&self, config: &SessionConfig) -> Vec<ControlMessage> {
        config
            .greeting
            .as_deref()
            .map(|greeting| vec![client_content(greeting, true)])
            .unwrap_or_default()
    }
}

// =============================================================================
// Channel Handle
// =============================================================================

/// Outbound side of an open live connection.
pub struct LiveChannel {
    tx: mpsc::UnboundedSender<Message>,
    closing: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
    input_sample_rate: u32,
}

impl LiveChannel {
    fn send_frame(&self, message: Message) -> TransportResult<()> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.tx.send(message).map_err(|_| TransportError::Closed)
    }
}

impl ChannelHandle for LiveChannel {
    fn is_writable(&self) -> bool {
        !self.closing.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    fn send_control(&self, message: &ControlMessage) -> TransportResult<()> {
        self.send_frame(Message::Text(message.to_text().into()))
    }

    fn send_media(&self, frame: Bytes) -> TransportResult<()> {
        let message = realtime_audio(&frame, self.input_sample_rate);
        self.send_control(&message)
    }

    fn close(&self) -> TransportResult<()> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Let the writer deliver a close frame; if it is gone, stop the task.
        if self.tx.send(Message::Close(None)).is_err()
            && let Some(handle) = self.task.lock().take()
        {
            handle.abort();
        }
        tracing::debug!("Live channel closing");
        Ok(())
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().take()
            && !self.closing.load(Ordering::SeqCst)
        {
            handle.abort();
        }
    }
}
