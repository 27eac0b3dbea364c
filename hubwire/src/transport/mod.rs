//! Transport port and the bundled bindings.
//!
//! A transport moves complete, already-framed messages. It hands inbound
//! frames to the router through a channel returned by [`Transport::subscribe`]
//! and accepts outbound frames addressed to zero or more sessions.

use std::{
    collections::HashMap,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use foldhash::fast::RandomState;
use futures_util::future::BoxFuture;
use tokio::sync::{RwLock, broadcast, mpsc};

use crate::{
    SessionId,
    error::{Error, ErrorKind, Result},
};

mod memory;
pub use memory::MemoryTransport;

mod tcp;
pub use tcp::TcpTransport;

mod ws;
pub use ws::WebSocketTransport;

/// One encoded message on its way out.
#[derive(Debug, Clone)]
pub struct Frame {
    pub bytes: Bytes,
    /// Send as a text frame on transports that distinguish text from binary.
    pub text: bool,
}

impl Frame {
    #[must_use]
    pub fn new(bytes: Bytes, text: bool) -> Self {
        Self { bytes, text }
    }
}

pub(crate) const EVENT_CAPACITY: usize = 256;

/// Connection lifecycle notification of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Connected(SessionId),
    Disconnected(SessionId),
}

/// One complete inbound message.
#[derive(Debug, Clone)]
pub struct Received {
    pub bytes: Bytes,
    /// The connection it arrived on, for transports serving several peers.
    pub session: Option<SessionId>,
}

pub trait Transport: Send + Sync + 'static {
    /// Sends a frame. An empty session list addresses the single implicit
    /// connection of the transport.
    fn send<'a>(&'a self, frame: Frame, sessions: &'a [SessionId]) -> BoxFuture<'a, Result<()>>;

    /// Hands out the inbound channel. A transport has a single subscriber.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel was already taken.
    fn subscribe(&self) -> Result<mpsc::Receiver<Received>>;

    /// Subscribes to connection events emitted from now on.
    fn events(&self) -> broadcast::Receiver<TransportEvent>;

    /// Releases the underlying connections.
    fn close(&self);
}

/// Inbound channel shared by the bundled transports.
pub(crate) struct Inbox {
    sender: mpsc::Sender<Received>,
    receiver: Mutex<Option<mpsc::Receiver<Received>>>,
}

impl Inbox {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<Received> {
        self.sender.clone()
    }

    pub(crate) fn take(&self) -> Result<mpsc::Receiver<Received>> {
        self.receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidArgument,
                    "transport already has a subscriber".to_string(),
                )
            })
    }
}

/// Outbound queues of the live connections of a socket transport.
pub(crate) struct Sessions {
    next_id: AtomicU64,
    map: RwLock<HashMap<SessionId, mpsc::Sender<Frame>, RandomState>>,
    events: broadcast::Sender<TransportEvent>,
}

impl Default for Sessions {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::default(),
            map: RwLock::default(),
            events: broadcast::channel(EVENT_CAPACITY).0,
        }
    }
}

impl Sessions {
    pub(crate) async fn insert(&self, sender: mpsc::Sender<Frame>) -> SessionId {
        let session = SessionId(self.next_id.fetch_add(1, Ordering::AcqRel));
        self.map.write().await.insert(session, sender);
        let _ = self.events.send(TransportEvent::Connected(session));
        session
    }

    pub(crate) async fn remove(&self, session: SessionId) {
        if self.map.write().await.remove(&session).is_some() {
            let _ = self.events.send(TransportEvent::Disconnected(session));
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    pub(crate) async fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.map.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Queues the frame on every addressed session.
    ///
    /// An empty address list is only valid while exactly one connection is
    /// open.
    pub(crate) async fn send(&self, frame: Frame, sessions: &[SessionId]) -> Result<()> {
        let targets = {
            let map = self.map.read().await;
            if sessions.is_empty() {
                if map.is_empty() {
                    return Err(Error::new(
                        ErrorKind::TransportClosed,
                        "no open connection".to_string(),
                    ));
                }
                if map.len() != 1 {
                    return Err(Error::new(
                        ErrorKind::InvalidArgument,
                        format!("no session given for a transport with {} connections", map.len()),
                    ));
                }
                map.values().cloned().collect::<Vec<_>>()
            } else {
                sessions
                    .iter()
                    .map(|session| {
                        map.get(session).cloned().ok_or_else(|| {
                            Error::new(
                                ErrorKind::TransportClosed,
                                format!("unknown session: {session}"),
                            )
                        })
                    })
                    .collect::<Result<Vec<_>>>()?
            }
        };

        for target in targets {
            target
                .send(frame.clone())
                .await
                .map_err(|e| Error::new(ErrorKind::TransportSendFailed, e.to_string()))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Sessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sessions").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sessions() {
        let sessions = Sessions::default();
        let mut events = sessions.subscribe();
        let frame = Frame::new(Bytes::from_static(b"x"), false);

        let err = sessions.send(frame.clone(), &[]).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransportClosed);

        let (a_tx, mut a_rx) = mpsc::channel(4);
        let a = sessions.insert(a_tx).await;
        assert_eq!(events.recv().await.unwrap(), TransportEvent::Connected(a));
        sessions.send(frame.clone(), &[]).await.unwrap();
        assert!(a_rx.recv().await.is_some());

        let (b_tx, _b_rx) = mpsc::channel(4);
        let b = sessions.insert(b_tx).await;
        assert_eq!(events.recv().await.unwrap(), TransportEvent::Connected(b));
        let err = sessions.send(frame.clone(), &[]).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        sessions.send(frame.clone(), &[a, b]).await.unwrap();

        sessions.remove(a).await;
        sessions.remove(a).await;
        assert_eq!(events.recv().await.unwrap(), TransportEvent::Disconnected(a));
        assert_eq!(sessions.ids().await, [b]);
        let err = sessions.send(frame, &[a]).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransportClosed);
    }
}
