use std::sync::{Arc, Mutex, PoisonError};

use futures_util::{FutureExt, future::BoxFuture};
use tokio::sync::{broadcast, mpsc};

use super::{EVENT_CAPACITY, Frame, Inbox, Received, Transport, TransportEvent};
use crate::{
    SessionId,
    error::{Error, ErrorKind, Result},
};

const DEFAULT_CAPACITY: usize = 1024;

/// In-process transport. Two endpoints created by [`pair`](Self::pair) deliver
/// frames to each other without touching the network. The link counts as
/// session 0 and reports `Disconnected` once when closed.
pub struct MemoryTransport {
    inbox: Inbox,
    peer: Mutex<Option<mpsc::Sender<Received>>>,
    events: broadcast::Sender<TransportEvent>,
}

impl MemoryTransport {
    #[must_use]
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        Self::pair_with_capacity(DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn pair_with_capacity(capacity: usize) -> (Arc<Self>, Arc<Self>) {
        let a = Inbox::new(capacity);
        let b = Inbox::new(capacity);
        let a_sender = a.sender();
        let b_sender = b.sender();
        (
            Arc::new(Self {
                inbox: a,
                peer: Mutex::new(Some(b_sender)),
                events: broadcast::channel(EVENT_CAPACITY).0,
            }),
            Arc::new(Self {
                inbox: b,
                peer: Mutex::new(Some(a_sender)),
                events: broadcast::channel(EVENT_CAPACITY).0,
            }),
        )
    }

    fn peer(&self) -> Option<mpsc::Sender<Received>> {
        self.peer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Transport for MemoryTransport {
    fn send<'a>(&'a self, frame: Frame, _: &'a [SessionId]) -> BoxFuture<'a, Result<()>> {
        let peer = self.peer();
        async move {
            let Some(peer) = peer else {
                return Err(Error::kind(ErrorKind::TransportClosed));
            };
            peer.send(Received {
                bytes: frame.bytes,
                session: None,
            })
            .await
            .map_err(|e| Error::new(ErrorKind::TransportClosed, e.to_string()))
        }
        .boxed()
    }

    fn subscribe(&self) -> Result<mpsc::Receiver<Received>> {
        self.inbox.take()
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    fn close(&self) {
        let peer = self
            .peer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if peer.is_some() {
            let _ = self.events.send(TransportEvent::Disconnected(SessionId(0)));
        }
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport").finish()
    }
}
