//! Async driver: feeds transport events into a [`Session`]

use ndt_transport::{
    TransportError, TransportEvent, TransportReceiver, TransportSender, WebSocketConfig,
    WebSocketTransport,
};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::builder::NdtClientBuilder;
use crate::channel::{Outbound, Outbox};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::result::SessionResult;
use crate::runner::{RunnerFactory, StandardRunners};
use crate::session::{Session, SessionState};

/// An NDT client bound to one server
pub struct NdtClient {
    config: ClientConfig,
    transport: WebSocketConfig,
}

impl NdtClient {
    /// Create a new client (use builder for more options)
    pub fn new(config: ClientConfig) -> Self {
        Self::with_transport(config, WebSocketConfig::default())
    }

    pub fn with_transport(config: ClientConfig, transport: WebSocketConfig) -> Self {
        Self { config, transport }
    }

    /// Create a builder
    pub fn builder(host: &str) -> NdtClientBuilder {
        NdtClientBuilder::new(host)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run one session with the built-in runners
    pub async fn run(&self) -> Result<SessionResult> {
        self.run_with(StandardRunners::new()).await
    }

    /// Run one session, building test runners with `factory`
    pub async fn run_with(&self, factory: impl RunnerFactory + 'static) -> Result<SessionResult> {
        let url = self.config.url().map_err(|source| ClientError::Transport {
            state: SessionState::Idle,
            source,
        })?;

        info!("Connecting to {}", url);
        let transport = WebSocketTransport::with_config(self.transport.clone());
        let (sender, mut receiver) = match timeout(self.config.connect_timeout, transport.open(&url)).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(source)) => {
                return Err(ClientError::Transport {
                    state: SessionState::Idle,
                    source,
                })
            }
            Err(_) => return Err(ClientError::ConnectTimeout(url)),
        };

        let mut session = Session::new(self.config.session.clone(), Outbox::new(), factory);

        loop {
            let step = match receiver.recv().await {
                Some(TransportEvent::Connected) => session.on_open(),
                Some(TransportEvent::Data(data)) => session.on_frame(&data),
                Some(TransportEvent::Error(e)) => {
                    session.on_transport_error(TransportError::ReceiveFailed(e))
                }
                Some(TransportEvent::Disconnected { reason }) => {
                    debug!("Transport disconnected: {:?}", reason);
                    session.on_transport_closed()
                }
                None => session.on_transport_closed(),
            };

            // Whatever the engine queued goes out before the next event
            let flushed = flush(&sender, session.channel_mut()).await;
            if let Err(source) = flushed {
                if !session.state().is_terminal() {
                    warn!("Send failed in {}: {}", session.state(), source);
                    let _ = session.on_transport_error(source);
                }
            }

            step?;

            match session.state() {
                SessionState::Closed => break,
                SessionState::Failed => {
                    return Err(session
                        .failure()
                        .cloned()
                        .unwrap_or(ClientError::Incomplete(SessionState::Failed)))
                }
                _ => {}
            }
        }

        if sender.is_connected() {
            let _ = sender.close().await;
        }
        info!("Session complete");
        Ok(session.into_result())
    }
}

/// Push queued frames through the transport; stops at the first error
async fn flush(sender: &impl TransportSender, outbox: &mut Outbox) -> ndt_transport::Result<()> {
    for out in outbox.drain() {
        match out {
            Outbound::Frame(data) => sender.send(data).await?,
            Outbound::Close => {
                if sender.is_connected() {
                    sender.close().await?;
                }
            }
        }
    }
    Ok(())
}
