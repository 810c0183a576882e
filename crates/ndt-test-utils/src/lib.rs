//! Common test helpers for NDT tests
//!
//! This crate provides:
//! - Port allocation
//! - A mock NDT server speaking the control protocol over a real local
//!   WebSocket, driven step by step from the test body

use futures_util::{SinkExt, StreamExt};
use ndt_core::{codec, Message, MessageType, WS_SUBPROTOCOL};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available TCP port for testing
pub async fn find_available_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// Mock NDT Server
// ============================================================================

/// A listening mock server. Accept one control connection per session.
pub struct MockNdtServer {
    listener: TcpListener,
    port: u16,
    echo_subprotocol: bool,
}

impl MockNdtServer {
    /// Bind on an ephemeral localhost port
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Self {
            listener,
            port,
            echo_subprotocol: true,
        }
    }

    /// Do not answer the client's subprotocol request
    pub fn without_subprotocol(mut self) -> Self {
        self.echo_subprotocol = false;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> &'static str {
        "127.0.0.1"
    }

    /// Control-channel URL for this server
    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}/ndt_protocol", self.port)
    }

    /// Accept the next client and complete the WebSocket handshake
    pub async fn accept(&self) -> MockConnection {
        let (stream, addr) = timeout(DEFAULT_TIMEOUT, self.listener.accept())
            .await
            .expect("no client connected")
            .unwrap();
        debug!("Mock server accepted {}", addr);

        let echo = self.echo_subprotocol;
        let mut requested = None;
        let callback = |req: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
            if let Some(protocols) = req.headers().get("Sec-WebSocket-Protocol") {
                requested = protocols.to_str().ok().map(str::to_string);
                if echo {
                    response
                        .headers_mut()
                        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(WS_SUBPROTOCOL));
                }
            }
            Ok(response)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();

        MockConnection {
            ws,
            requested_subprotocol: requested,
        }
    }
}

/// One accepted control connection
pub struct MockConnection {
    ws: WebSocketStream<TcpStream>,
    requested_subprotocol: Option<String>,
}

impl MockConnection {
    /// Subprotocol header sent by the client
    pub fn requested_subprotocol(&self) -> Option<&str> {
        self.requested_subprotocol.as_deref()
    }

    /// Next binary frame as raw bytes, or None on close/timeout
    pub async fn recv_raw(&mut self) -> Option<Vec<u8>> {
        loop {
            match timeout(DEFAULT_TIMEOUT, self.ws.next()).await {
                Ok(Some(Ok(WsMessage::Binary(data)))) => return Some(data),
                Ok(Some(Ok(WsMessage::Ping(_)))) | Ok(Some(Ok(WsMessage::Pong(_)))) => continue,
                Ok(Some(Ok(WsMessage::Text(text)))) => panic!("client sent text frame: {}", text),
                _ => return None,
            }
        }
    }

    /// Next decoded message, or None on close/timeout
    pub async fn recv(&mut self) -> Option<Message> {
        let data = self.recv_raw().await?;
        Some(codec::decode(&data).expect("client sent malformed frame"))
    }

    /// Receive and check the type of the next message
    pub async fn expect(&mut self, msg_type: MessageType) -> Message {
        let msg = self.recv().await.unwrap_or_else(|| panic!("expected {}, got nothing", msg_type));
        assert_eq!(msg.msg_type, msg_type, "unexpected message: {:?}", msg);
        msg
    }

    /// Send a message with a `msg` body
    pub async fn send(&mut self, msg_type: MessageType, msg: &str) {
        let frame = codec::encode_message(msg_type, msg).unwrap();
        self.send_raw(frame.to_vec()).await;
    }

    /// Send arbitrary bytes as one binary frame
    pub async fn send_raw(&mut self, data: Vec<u8>) {
        self.ws.send(WsMessage::Binary(data)).await.unwrap();
    }

    /// Send a text frame, which the client must reject
    pub async fn send_text(&mut self, text: &str) {
        self.ws.send(WsMessage::Text(text.to_string())).await.unwrap();
    }

    /// Wait for the client to close the connection
    pub async fn wait_closed(&mut self) -> bool {
        loop {
            match timeout(DEFAULT_TIMEOUT, self.ws.next()).await {
                Ok(Some(Ok(WsMessage::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => return true,
                Ok(Some(Ok(_))) => continue,
                Err(_) => return false,
            }
        }
    }

    /// Close from the server side
    pub async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}
