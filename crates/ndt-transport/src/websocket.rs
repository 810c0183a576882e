//! WebSocket transport implementation

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest, http::HeaderValue, protocol::Message as WsMessage,
        protocol::WebSocketConfig as WsProtocolConfig,
    },
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{Result, TransportError};
use crate::traits::{Transport, TransportEvent, TransportReceiver, TransportSender};

use ndt_core::WS_SUBPROTOCOL;

/// Build the control-channel URL for a server.
///
/// Bare IPv6 literals are bracketed and a missing leading `/` on the path is
/// added.
pub fn control_url(host: &str, port: u16, path: &str, secure: bool) -> Result<String> {
    if host.is_empty() {
        return Err(TransportError::InvalidUrl("empty host".to_string()));
    }
    let scheme = if secure { "wss" } else { "ws" };
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    };
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    let url = Url::parse(&format!("{}://{}:{}{}", scheme, host, port, path))?;
    Ok(url.to_string())
}

/// WebSocket configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Subprotocol to request
    pub subprotocol: String,
    /// Maximum message size
    pub max_message_size: usize,
    /// Outbound and inbound event queue depth
    pub channel_capacity: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            subprotocol: WS_SUBPROTOCOL.to_string(),
            // One control frame: 3-byte header plus a 16-bit payload
            max_message_size: 3 + u16::MAX as usize,
            channel_capacity: 100,
        }
    }
}

/// WebSocket transport
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self {
            config: WebSocketConfig::default(),
        }
    }

    pub fn with_config(config: WebSocketConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    /// Connect using this transport's configuration
    pub async fn open(&self, url: &str) -> Result<(WebSocketSender, WebSocketReceiver)> {
        info!("Connecting to WebSocket: {}", url);

        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        let protocol = HeaderValue::from_str(&self.config.subprotocol)
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", protocol);

        let mut ws_config = WsProtocolConfig::default();
        ws_config.max_message_size = Some(self.config.max_message_size);
        ws_config.max_frame_size = Some(self.config.max_message_size);

        let (ws_stream, response) = connect_async_with_config(request, Some(ws_config), true)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!("WebSocket connected, response: {:?}", response.status());
        if let Some(protocol) = response.headers().get("Sec-WebSocket-Protocol") {
            debug!("Server subprotocol: {:?}", protocol);
        }

        let (write, read) = ws_stream.split();

        let (send_tx, mut send_rx) = mpsc::channel::<WsMessage>(self.config.channel_capacity);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(self.config.channel_capacity);

        let connected = Arc::new(Mutex::new(true));
        let connected_write = connected.clone();
        let connected_read = connected.clone();

        // Writer task
        tokio::spawn(async move {
            let mut write = write;
            while let Some(msg) = send_rx.recv().await {
                let closing = matches!(msg, WsMessage::Close(_));
                if let Err(e) = write.send(msg).await {
                    error!("WebSocket write error: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            *connected_write.lock() = false;
        });

        // Reader task
        tokio::spawn(async move {
            let mut read = read;

            let _ = event_tx.send(TransportEvent::Connected).await;

            while let Some(result) = read.next().await {
                match result {
                    Ok(WsMessage::Binary(data)) => {
                        let _ = event_tx.send(TransportEvent::Data(Bytes::from(data))).await;
                    }
                    Ok(WsMessage::Text(text)) => {
                        warn!("Received text message on binary control channel");
                        let _ = event_tx
                            .send(TransportEvent::Error(format!(
                                "unexpected text frame ({} bytes)",
                                text.len()
                            )))
                            .await;
                    }
                    Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {
                        // Pong replies are handled by tungstenite
                    }
                    Ok(WsMessage::Close(frame)) => {
                        let reason = frame.map(|f| f.reason.to_string());
                        info!("WebSocket closed: {:?}", reason);
                        let _ = event_tx.send(TransportEvent::Disconnected { reason }).await;
                        break;
                    }
                    Ok(WsMessage::Frame(_)) => {}
                    Err(e) => {
                        error!("WebSocket read error: {}", e);
                        let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                        let _ = event_tx
                            .send(TransportEvent::Disconnected {
                                reason: Some(e.to_string()),
                            })
                            .await;
                        break;
                    }
                }
            }

            *connected_read.lock() = false;
        });

        let sender = WebSocketSender {
            tx: send_tx,
            connected,
        };
        let receiver = WebSocketReceiver { rx: event_rx };

        Ok((sender, receiver))
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// WebSocket sender
pub struct WebSocketSender {
    tx: mpsc::Sender<WsMessage>,
    connected: Arc<Mutex<bool>>,
}

#[async_trait]
impl TransportSender for WebSocketSender {
    async fn send(&self, data: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        self.tx
            .send(WsMessage::Binary(data.to_vec()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        let _ = self.tx.send(WsMessage::Close(None)).await;
        *self.connected.lock() = false;
        Ok(())
    }
}

/// WebSocket receiver
pub struct WebSocketReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for WebSocketReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn connect(url: &str) -> Result<(Self::Sender, Self::Receiver)> {
        WebSocketTransport::new().open(url).await
    }
}
