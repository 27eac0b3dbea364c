use std::{io::IoSlice, net::SocketAddr, sync::Arc};

use bytes::{Buf, Bytes, BytesMut};
use futures_util::{FutureExt, future::BoxFuture};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{broadcast, mpsc},
};

use super::{Frame, Inbox, Received, Sessions, Transport, TransportEvent};
use crate::{
    SessionId, TaskSupervisor, TransportConfig,
    error::{Error, ErrorKind, Result},
};

const MAGIC_NUM: u32 = u32::from_be_bytes(*b"HUB!");
const HEADER_SIZE: usize = std::mem::size_of::<u64>();

/// Length-prefixed TCP transport.
///
/// Every frame is preceded by an 8 byte header: a 4 byte magic number and the
/// 4 byte big-endian payload length. A transport created by
/// [`connect`](Self::connect) has one session; one created by
/// [`listen`](Self::listen) gets a new session per accepted connection.
pub struct TcpTransport {
    config: TransportConfig,
    inbox: Inbox,
    sessions: Sessions,
    local_addr: Option<SocketAddr>,
    task_supervisor: TaskSupervisor,
}

impl TcpTransport {
    fn new(config: &TransportConfig, local_addr: Option<SocketAddr>) -> Arc<Self> {
        Arc::new(Self {
            config: config.clone(),
            inbox: Inbox::new(config.channel_capacity),
            sessions: Sessions::default(),
            local_addr,
            task_supervisor: TaskSupervisor::create(),
        })
    }

    /// Connects to a listening peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(addr: SocketAddr, config: &TransportConfig) -> Result<Arc<Self>> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::new(ErrorKind::TcpConnectFailed, e.to_string()))?;
        let local_addr = stream.local_addr().ok();
        let this = Self::new(config, local_addr);
        this.add_stream(stream, addr).await;
        Ok(this)
    }

    /// Binds a listener and accepts connections in the background.
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
            tracing::info!("start listening: {listener_addr}");
            while let Ok((stream, addr)) = listener.accept().await {
                let Some(this) = weak.upgrade() else {
                    break;
                };
                this.add_stream(stream, addr).await;
            }
        });

        Ok(this)
    }

    /// The bound address of a listener, or the local end of a connection.
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

    async fn add_stream(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let _ = stream.set_nodelay(true);
        let (recv_stream, send_stream) = stream.into_split();
        let (sender, receiver) = mpsc::channel(self.config.channel_capacity.max(1));
        let session = self.sessions.insert(sender).await;
        tracing::debug!("tcp session {session} opened for {addr}");

        self.task_supervisor.spawn(async move {
            if let Err(e) = Self::start_send_loop(send_stream, receiver).await {
                tracing::error!("send loop for {addr} failed: {e}");
            }
        });

        let weak = Arc::downgrade(self);
        let inbox = self.inbox.sender();
        let max_frame_size = self.config.max_frame_size;
        self.task_supervisor.spawn(async move {
            if let Err(e) =
                Self::start_recv_loop(recv_stream, session, max_frame_size, &inbox).await
            {
                tracing::error!("recv loop for {addr} failed: {e}");
            }
            if let Some(this) = weak.upgrade() {
                this.sessions.remove(session).await;
            }
        });
    }

    fn parse_message(buffer: &mut BytesMut, max_frame_size: usize) -> Result<Option<Bytes>> {
        if buffer.len() < HEADER_SIZE {
            return Ok(None);
        }
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&buffer[..HEADER_SIZE]);
        let header = u64::from_be_bytes(header);
        if (header >> 32) as u32 != MAGIC_NUM {
            return Err(Error::new(
                ErrorKind::TcpParseMsgFailed,
                format!("invalid header: {header:016X}"),
            ));
        }

        let len = usize::try_from(header & u64::from(u32::MAX))?;
        if len > max_frame_size {
            return Err(Error::new(
                ErrorKind::TcpParseMsgFailed,
                format!("msg is too long: {len}"),
            ));
        }

        if buffer.len() < HEADER_SIZE + len {
            Ok(None)
        } else {
            buffer.advance(HEADER_SIZE);
            Ok(Some(buffer.split_to(len).freeze()))
        }
    }

    async fn start_recv_loop(
        mut recv_stream: OwnedReadHalf,
        session: SessionId,
        max_frame_size: usize,
        inbox: &mpsc::Sender<Received>,
    ) -> Result<()> {
        let mut buffer = BytesMut::with_capacity(1 << 16);
        loop {
            if let Some(bytes) = Self::parse_message(&mut buffer, max_frame_size)? {
                let received = Received {
                    bytes,
                    session: Some(session),
                };
                if inbox.send(received).await.is_err() {
                    return Ok(());
                }
            } else {
                let n = recv_stream
                    .read_buf(&mut buffer)
                    .await
                    .map_err(|e| Error::new(ErrorKind::TcpRecvMsgFailed, e.to_string()))?;
                if n == 0 {
                    tracing::debug!("tcp session {session} reached eof");
                    return Ok(());
                }
            }
        }
    }

    async fn start_send_loop(
        mut send_stream: OwnedWriteHalf,
        mut receiver: mpsc::Receiver<Frame>,
    ) -> Result<()> {
        const LIMIT: usize = 64;
        let mut frames = Vec::with_capacity(LIMIT);
        loop {
            let n = receiver.recv_many(&mut frames, LIMIT).await;
            if n == 0 {
                return Ok(());
            }

            Self::write_frames(&mut send_stream, &frames).await?;
            frames.clear();
        }
    }

    async fn write_frames(send_stream: &mut OwnedWriteHalf, frames: &[Frame]) -> Result<()> {
        let mut headers = Vec::with_capacity(frames.len());
        for frame in frames {
            let len = u32::try_from(frame.bytes.len())?;
            let header = (u64::from(MAGIC_NUM) << 32) | u64::from(len);
            headers.push(header.to_be_bytes());
        }

        let mut bufs = Vec::with_capacity(frames.len() * 2);
        for (header, frame) in headers.iter().zip(frames) {
            bufs.push(IoSlice::new(header));
            bufs.push(IoSlice::new(&frame.bytes));
        }

        let mut slices = &mut bufs[..];
        while !slices.is_empty() {
            match send_stream.write_vectored(slices).await {
                Ok(0) => {
                    return Err(Error::new(
                        ErrorKind::TcpSendMsgFailed,
                        "socket closed".to_string(),
                    ));
                }
                Ok(n) => IoSlice::advance_slices(&mut slices, n),
                Err(e) => {
                    return Err(Error::new(ErrorKind::TcpSendMsgFailed, e.to_string()));
                }
            }
        }
        Ok(())
    }
}

impl Transport for TcpTransport {
    fn send<'a>(&'a self, frame: Frame, sessions: &'a [SessionId]) -> BoxFuture<'a, Result<()>> {
        async move {
            if frame.bytes.len() > self.config.max_frame_size {
                return Err(Error::new(
                    ErrorKind::TcpParseMsgFailed,
                    format!("msg is too long: {}", frame.bytes.len()),
                ));
            }
            self.sessions.send(frame, sessions).await
        }
        .boxed()
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

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(payload: &[u8]) -> BytesMut {
        let header = (u64::from(MAGIC_NUM) << 32) | payload.len() as u64;
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&header.to_be_bytes());
        buffer.extend_from_slice(payload);
        buffer
    }

    #[test]
    fn test_parse_message() {
        let mut buffer = framed(b"hello");
        buffer.extend_from_slice(&framed(b"world")[..4]);

        let msg = TcpTransport::parse_message(&mut buffer, 1024).unwrap();
        assert_eq!(msg.as_deref(), Some(&b"hello"[..]));
        assert_eq!(TcpTransport::parse_message(&mut buffer, 1024).unwrap(), None);

        let mut buffer = framed(b"too long");
        let err = TcpTransport::parse_message(&mut buffer, 4).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TcpParseMsgFailed);

        let mut buffer = BytesMut::from(&b"GET / HTTP/1.1\r\n"[..]);
        let err = TcpTransport::parse_message(&mut buffer, 1024).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TcpParseMsgFailed);
    }

    #[tokio::test]
    async fn test_tcp_frames() {
        let config = TransportConfig::default();
        let server = TcpTransport::listen("127.0.0.1:0".parse().unwrap(), &config)
            .await
            .unwrap();
        let mut server_rx = server.subscribe().unwrap();
        let client = TcpTransport::connect(server.local_addr().unwrap(), &config)
            .await
            .unwrap();
        let mut client_rx = client.subscribe().unwrap();

        client
            .send(Frame::new(Bytes::from_static(b"ping"), false), &[])
            .await
            .unwrap();
        let received = server_rx.recv().await.unwrap();
        assert_eq!(&received.bytes[..], b"ping");
        let session = received.session.unwrap();

        server
            .send(Frame::new(Bytes::from_static(b"pong"), false), &[session])
            .await
            .unwrap();
        let received = client_rx.recv().await.unwrap();
        assert_eq!(&received.bytes[..], b"pong");

        client.close();
        server.close();
        client.join().await;
        server.join().await;
    }
}
