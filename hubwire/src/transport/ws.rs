use std::{net::SocketAddr, sync::Arc};

use bytes::Bytes;
use futures_util::{
    FutureExt, SinkExt, StreamExt,
    future::BoxFuture,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async, connect_async, tungstenite};

use super::{Frame, Inbox, Received, Sessions, Transport, TransportEvent};
use crate::{
    SessionId, TaskSupervisor, TransportConfig,
    error::{Error, ErrorKind, Result},
};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport. Each WebSocket message carries one frame; text
/// frames are used when the codec streams text.
pub struct WebSocketTransport {
    config: TransportConfig,
    inbox: Inbox,
    sessions: Sessions,
    local_addr: Option<SocketAddr>,
    task_supervisor: TaskSupervisor,
}

impl WebSocketTransport {
    fn new(config: &TransportConfig, local_addr: Option<SocketAddr>) -> Arc<Self> {
        Arc::new(Self {
            config: config.clone(),
            inbox: Inbox::new(config.channel_capacity),
            sessions: Sessions::default(),
            local_addr,
            task_supervisor: TaskSupervisor::create(),
        })
    }

    /// Connects to a WebSocket server, e.g. `ws://127.0.0.1:8000`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake fails.
    pub async fn connect(url: &str, config: &TransportConfig) -> Result<Arc<Self>> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::new(ErrorKind::WebSocketConnectFailed, e.to_string()))?;
        let this = Self::new(config, None);
        this.add_socket(url.to_string(), stream).await;
        Ok(this)
    }

    /// Binds a listener and upgrades accepted connections in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn listen(addr: SocketAddr, config: &TransportConfig) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::new(ErrorKind::TcpBindFailed, e.to_string()))?;
        let listener_addr = listener
            .local_addr()
            .map_err(|e| Error::new(ErrorKind::TcpBindFailed, e.to_string()))?;

        let this = Self::new(config, Some(listener_addr));
        let weak = Arc::downgrade(&this);
        this.task_supervisor.spawn(async move {
            tracing::info!("start listening: ws://{listener_addr}");
            while let Ok((tcp_stream, addr)) = listener.accept().await {
                let Some(this) = weak.upgrade() else {
                    break;
                };
                let upgrade = this.clone();
                this.task_supervisor.spawn(async move {
                    if let Err(e) = upgrade.handle_new_tcp_stream(tcp_stream, addr).await {
                        tracing::error!("websocket upgrade for {addr} failed: {e}");
                    }
                });
            }
        });

        Ok(this)
    }

    async fn handle_new_tcp_stream(
        self: &Arc<Self>,
        tcp_stream: TcpStream,
        addr: SocketAddr,
    ) -> Result<()> {
        let stream = accept_async(MaybeTlsStream::Plain(tcp_stream))
            .await
            .map_err(|e| Error::new(ErrorKind::WebSocketAcceptFailed, e.to_string()))?;
        self.add_socket(addr.to_string(), stream).await;
        Ok(())
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub async fn sessions(&self) -> Vec<SessionId> {
        self.sessions.ids().await
    }

    pub async fn join(&self) {
        self.task_supervisor.all_stopped().await;
    }

    async fn add_socket(self: &Arc<Self>, peer: String, stream: Stream) {
        let (send_stream, recv_stream) = stream.split();
        let (sender, receiver) = mpsc::channel(self.config.channel_capacity.max(1));
        let session = self.sessions.insert(sender).await;
        tracing::debug!("websocket session {session} opened for {peer}");

        {
            let peer = peer.clone();
            self.task_supervisor.spawn(async move {
                if let Err(e) = Self::start_send_loop(send_stream, receiver).await {
                    tracing::error!("send loop for {peer} failed: {e}");
                }
            });
        }

        let weak = Arc::downgrade(self);
        let inbox = self.inbox.sender();
        self.task_supervisor.spawn(async move {
            if let Err(e) = Self::start_recv_loop(recv_stream, session, &inbox).await {
                tracing::error!("recv loop for {peer} failed: {e}");
            }
            if let Some(this) = weak.upgrade() {
                this.sessions.remove(session).await;
            }
        });
    }

    async fn start_recv_loop(
        mut recv_stream: SplitStream<Stream>,
        session: SessionId,
        inbox: &mpsc::Sender<Received>,
    ) -> Result<()> {
        while let Some(msg) = recv_stream.next().await {
            let msg = msg.map_err(|e| Error::new(ErrorKind::WebSocketRecvFailed, e.to_string()))?;
            let bytes = match msg {
                tungstenite::Message::Binary(bytes) => bytes,
                tungstenite::Message::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
                tungstenite::Message::Close(_) => {
                    return Err(Error::kind(ErrorKind::WebSocketClosed));
                }
                _ => continue,
            };
            let received = Received {
                bytes,
                session: Some(session),
            };
            if inbox.send(received).await.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }

    async fn start_send_loop(
        mut send_stream: SplitSink<Stream, tungstenite::Message>,
        mut receiver: mpsc::Receiver<Frame>,
    ) -> Result<()> {
        while let Some(frame) = receiver.recv().await {
            let msg = if frame.text {
                let text = tungstenite::Utf8Bytes::try_from(frame.bytes)
                    .map_err(|e| Error::new(ErrorKind::WebSocketSendFailed, e.to_string()))?;
                tungstenite::Message::Text(text)
            } else {
                tungstenite::Message::Binary(frame.bytes)
            };
            send_stream
                .send(msg)
                .await
                .map_err(|e| Error::new(ErrorKind::WebSocketSendFailed, e.to_string()))?;
        }
        let _ = send_stream.close().await;
        Ok(())
    }
}

impl Transport for WebSocketTransport {
    fn send<'a>(&'a self, frame: Frame, sessions: &'a [SessionId]) -> BoxFuture<'a, Result<()>> {
        self.sessions.send(frame, sessions).boxed()
    }

    fn subscribe(&self) -> Result<mpsc::Receiver<Received>> {
        self.inbox.take()
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.sessions.subscribe()
    }

    fn close(&self) {
        self.task_supervisor.stop();
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ws_frames() {
        let config = TransportConfig::default();
        let server = WebSocketTransport::listen("127.0.0.1:0".parse().unwrap(), &config)
            .await
            .unwrap();
        let mut server_rx = server.subscribe().unwrap();
        let url = format!("ws://{}", server.local_addr().unwrap());
        let client = WebSocketTransport::connect(&url, &config).await.unwrap();
        let mut client_rx = client.subscribe().unwrap();

        client
            .send(Frame::new(Bytes::from_static(b"{\"ping\":1}"), true), &[])
            .await
            .unwrap();
        let received = server_rx.recv().await.unwrap();
        assert_eq!(&received.bytes[..], b"{\"ping\":1}");
        let session = received.session.unwrap();

        server
            .send(Frame::new(Bytes::from_static(&[0xc0, 0x01]), false), &[session])
            .await
            .unwrap();
        let received = client_rx.recv().await.unwrap();
        assert_eq!(&received.bytes[..], &[0xc0, 0x01]);

        client.close();
        server.close();
        client.join().await;
        server.join().await;
    }
}
