use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::tungstenite::Message;

use crate::dispatcher::FanoutDispatcher;
use crate::error::{BrokerError, Result};
use crate::transport::ChannelTransport;

/// How long `stop()` waits for clients to receive their close frame
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// WebSocket front end feeding connections into a [`FanoutDispatcher`]
pub struct RelayServer {
    bind_addr: String,
    dispatcher: FanoutDispatcher,
    local_addr: Arc<RwLock<Option<SocketAddr>>>,
    accept_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    shutdown: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    running: Arc<RwLock<bool>>,
}

impl RelayServer {
    pub fn new(bind_addr: impl Into<String>, dispatcher: FanoutDispatcher) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            dispatcher,
            local_addr: Arc::new(RwLock::new(None)),
            accept_task: Arc::new(Mutex::new(None)),
            shutdown: Arc::new(Mutex::new(None)),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Bind the listener and start accepting clients
    ///
    /// Returns the bound address (useful when binding port 0).
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut running = self.running.write().await;
        if *running {
            return Err(BrokerError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.bind_addr).await?;
        let addr = listener.local_addr()?;
        *self.local_addr.write().await = Some(addr);

        tracing::info!("WebSocket relay listening on ws://{}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(listener, self.dispatcher.clone(), shutdown_rx));

        *self.shutdown.lock().await = Some(shutdown_tx);
        *self.accept_task.lock().await = Some(task);
        *running = true;

        Ok(addr)
    }

    /// Stop accepting clients and close open connections
    ///
    /// Every connection is unregistered and sent a close frame before this
    /// returns.
    pub async fn stop(&self) -> Result<()> {
        let mut running = self.running.write().await;
        if !*running {
            return Err(BrokerError::NotStarted);
        }
        *running = false;

        if let Some(shutdown) = self.shutdown.lock().await.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.accept_task.lock().await.take() {
            if let Err(e) = task.await {
                tracing::warn!("Accept task ended abnormally: {}", e);
            }
        }
        *self.local_addr.write().await = None;

        tracing::info!("WebSocket relay stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read().await
    }

    pub fn dispatcher(&self) -> &FanoutDispatcher {
        &self.dispatcher
    }
}

async fn accept_loop(
    listener: TcpListener,
    dispatcher: FanoutDispatcher,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let dispatcher = dispatcher.clone();
                    connections.spawn(async move {
                        if let Err(e) = serve_connection(stream, peer, dispatcher).await {
                            tracing::warn!("Connection from {} failed: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept client: {}", e);
                }
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    tracing::debug!("Connection task ended abnormally: {}", e);
                }
            }
        }
    }
    drop(listener);

    // Dropped transports end each writer, which sends a close frame
    dispatcher.clear().await;
    let drain = async { while connections.join_next().await.is_some() {} };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        tracing::warn!("Aborting {} connections still closing", connections.len());
        connections.shutdown().await;
        // Aborted tasks never reach their own unregister
        dispatcher.clear().await;
    }
}

/// Run one client until either side closes
///
/// The writer drains the transport channel and the reader applies
/// subscription messages; both live in this task so aborting it tears down
/// the whole connection.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: FanoutDispatcher,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();

    let (transport, mut outbound) = ChannelTransport::pair();
    let id = dispatcher.register(Arc::new(transport)).await;
    tracing::debug!("Connection {} accepted from {}", id, peer);

    let writer = async {
        while let Some(text) = outbound.recv().await {
            if let Err(e) = sink.send(Message::Text(text)).await {
                tracing::warn!("Failed to write to connection {}: {}", id, e);
                break;
            }
        }
        let _ = sink.close().await;
    };

    let reader = async {
        while let Some(frame) = source.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    // Rejections are logged by the dispatcher; nothing goes back to the client
                    let _ = dispatcher.handle_message(id, &text).await;
                }
                Ok(Message::Binary(data)) => {
                    let _ = dispatcher
                        .handle_message(id, &String::from_utf8_lossy(&data))
                        .await;
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("Connection {} read error: {}", id, e);
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = writer => {}
        _ = reader => {}
    }

    dispatcher.unregister(id).await;
    Ok(())
}
