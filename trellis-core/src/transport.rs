//! WebSocket Transport
//!
//! The only piece of this crate that touches a socket. Each accepted
//! connection performs the hello handshake, finds or creates its session,
//! and then degenerates into two dumb pumps: inbound websocket binary
//! frames decode into units of work, outbound messages encode onto the
//! socket. All protocol decisions past the handshake live in the session
//! loop.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::session::{
    App, BlobStore, Broadcast, LoopHandle, Registry, Session, SessionBlob, SessionConfig,
    SessionError, SessionId, UnitOfWork,
};
use crate::wire::{self, Message, WireError, PROTOCOL_VERSION};

/// Builds one [`App`] per session. The route comes from the client hello.
pub type AppFactory = Arc<dyn Fn(&str) -> App + Send + Sync>;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("protocol error: {0}")]
    Wire(#[from] WireError),

    #[error("first frame was not a client hello")]
    HandshakeExpected,

    #[error("client protocol version {0} unsupported")]
    VersionMismatch(u16),
}

pub struct Server {
    app: AppFactory,
    registry: Arc<Registry>,
    shared: Arc<Broadcast>,
    store: Arc<dyn BlobStore>,
    config: SessionConfig,
}

impl Server {
    pub fn new(app: AppFactory, store: Arc<dyn BlobStore>, config: SessionConfig) -> Self {
        Server {
            app,
            registry: Arc::new(Registry::new()),
            shared: Arc::new(Broadcast::new()),
            store,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn shared(&self) -> &Arc<Broadcast> {
        &self.shared
    }

    /// Accept loop. One spawned task per connection; the sweeper for
    /// expired detached sessions runs alongside.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        info!(addr = %listener.local_addr()?, "listening");
        let sweep_interval = self.config.resume_window / 2;
        let _sweeper = self
            .registry
            .spawn_sweeper(self.config.resume_window, sweep_interval.max(std::time::Duration::from_secs(1)));
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(%peer, "connection accepted");
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(err) = server.handle_connection(stream).await {
                    warn!(error = %err, "connection ended with error");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> Result<(), ConnectionError> {
        let mut ws = tokio_tungstenite::accept_async(stream).await?;

        // The first binary frame must be the hello.
        let hello = loop {
            match ws.next().await {
                Some(Ok(WsMessage::Binary(bytes))) => break wire::decode(&bytes)?,
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
                Some(Ok(_)) | None => return Err(ConnectionError::HandshakeExpected),
                Some(Err(err)) => return Err(err.into()),
            }
        };
        let Message::ClientHello {
            protocol_version,
            route,
            resume_token,
        } = hello
        else {
            return Err(ConnectionError::HandshakeExpected);
        };
        if protocol_version != PROTOCOL_VERSION {
            let err = SessionError::VersionMismatch {
                client: protocol_version,
                server: PROTOCOL_VERSION,
            };
            let reject = Message::Error {
                code: err.close_code(),
                message: err.to_string(),
            };
            let _ = ws.send(WsMessage::Binary(wire::encode(&reject))).await;
            return Err(ConnectionError::VersionMismatch(protocol_version));
        }

        let (id, handle, resumed) = self.find_or_create(&route, resume_token.as_deref());
        self.registry.mark_attached(id);

        let reply = Message::ServerHello {
            protocol_version: PROTOCOL_VERSION,
            session_id: id.0,
            resumed,
        };
        ws.send(WsMessage::Binary(wire::encode(&reply))).await?;

        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        handle.send(UnitOfWork::Attach(out_tx.clone()));

        let (mut sink, mut source) = ws.split();
        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if sink
                    .send(WsMessage::Binary(wire::encode(&msg)))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let result = loop {
            match source.next().await {
                Some(Ok(WsMessage::Binary(bytes))) => match wire::decode(&bytes) {
                    Ok(msg) => {
                        if !handle.send(UnitOfWork::Inbound(msg)) {
                            // Session destroyed itself (breaker, protocol
                            // violation); nothing to resume.
                            self.registry.remove(id);
                            break Ok(());
                        }
                    }
                    Err(err) => break Err(ConnectionError::Wire(err)),
                },
                Some(Ok(WsMessage::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => continue,
                Some(Err(err)) => break Err(err.into()),
            }
        };

        if let Err(ConnectionError::Wire(err)) = &result {
            // A malformed frame is a protocol error: the session is
            // destroyed, never detached, and the client hears why before
            // the socket closes.
            let fatal = SessionError::Wire(err.clone());
            let code = fatal.close_code();
            error!(session = id.0, error = %fatal, "protocol error, destroying session");
            let _ = out_tx.send(Message::Error {
                code,
                message: fatal.to_string(),
            });
            let _ = out_tx.send(Message::Close { code });
            handle.send(UnitOfWork::Shutdown);
            self.registry.remove(id);
            drop(out_tx);
            // Let the writer drain the Error and Close frames.
            let _ = writer.await;
            return result;
        }

        handle.send(UnitOfWork::Detach);
        self.registry.mark_detached(id);
        writer.abort();
        debug!(session = id.0, "transport detached");
        result
    }

    /// Resolve a hello into a session: live resume, blob resume, or fresh.
    fn find_or_create(
        &self,
        route: &str,
        resume_token: Option<&[u8]>,
    ) -> (SessionId, LoopHandle, bool) {
        if let Some(prior) = resume_token.and_then(SessionId::from_resume_token) {
            if let Some(handle) = self.registry.get(prior) {
                debug!(session = prior.0, "resuming live session");
                return (prior, handle, true);
            }
            // The loop is gone; durable state may still be in the store.
            let blob = self
                .store
                .get(prior)
                .and_then(|bytes| SessionBlob::from_bytes(&bytes).ok())
                .filter(|blob| blob.route == route);
            if let Some(blob) = blob {
                debug!(session = prior.0, "resuming from persisted blob");
                let (id, handle) = self.spawn_session(route, Some(blob));
                return (id, handle, true);
            }
        }
        let (id, handle) = self.spawn_session(route, None);
        (id, handle, false)
    }

    fn spawn_session(&self, route: &str, restore: Option<SessionBlob>) -> (SessionId, LoopHandle) {
        let id = self.registry.allocate_id();
        let handle = Session::spawn(
            id,
            route,
            (self.app)(route),
            self.config.clone(),
            Arc::clone(&self.shared),
            Arc::clone(&self.store),
            restore,
        );
        self.registry.insert(handle.clone());
        debug!(session = id.0, route, "session created");
        (id, handle)
    }
}

// ----------- Tests -----------
