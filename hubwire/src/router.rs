use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::{DashMap, mapref::entry::Entry};
use foldhash::fast::RandomState;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;

use crate::{
    Client, Codec, Interface, Message, MessageKind, RouterConfig, Service, SessionId, Skeleton,
    TaskSupervisor, Waiter,
    error::{Error, ErrorKind, Result},
    transport::{Frame, Received, Transport, TransportEvent},
};

const EVENT_CAPACITY: usize = 256;

/// Notification published by a router to its [`events`](Router::events)
/// subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum RouterEvent {
    /// The transport opened a connection.
    Connected(SessionId),
    /// The transport lost a connection.
    Disconnected(SessionId),
    /// An inbound frame could not be served: it was undecodable, named an
    /// unknown hub or method, the method failed, or the response could not
    /// be sent.
    Error(Error),
}

enum Hub<C: Codec> {
    Service(Arc<Skeleton<C>>),
    /// Name reserved by a client proxy; requests for it are not served.
    Interface,
}

/// Multiplexes calls in both directions over one transport.
///
/// The router owns the pending-call table and the hub registry. Inbound
/// requests are dispatched to the registered services on spawned tasks, and
/// inbound responses settle the matching pending call.
///
/// ```rust,no_run
/// # use hubwire::{JsonCodec, MemoryTransport, Router, RouterConfig};
/// # #[tokio::main]
/// # async fn main() -> hubwire::Result<()> {
/// let (a, b) = MemoryTransport::pair();
/// let server = Router::create(a, JsonCodec, RouterConfig::default())?;
/// let client = Router::create(b, JsonCodec, RouterConfig::default())?;
/// // server.add_service(...), client.add_interface::<...>(None)
/// # server.dispose();
/// # client.dispose();
/// # Ok(())
/// # }
/// ```
pub struct Router<C: Codec> {
    config: RouterConfig,
    transport: Arc<dyn Transport>,
    codec: Arc<C>,
    waiter: Waiter<C::Value>,
    hubs: DashMap<String, Hub<C>, RandomState>,
    disposed: AtomicBool,
    events: broadcast::Sender<RouterEvent>,
    task_supervisor: TaskSupervisor,
}

impl<C: Codec> Router<C> {
    /// Creates a router and starts its receive loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport's receive channel was already taken.
    pub fn create(
        transport: Arc<dyn Transport>,
        codec: C,
        config: RouterConfig,
    ) -> Result<Arc<Self>> {
        let mut receiver = transport.subscribe()?;
        let mut transport_events = transport.events();
        let this = Arc::new(Self {
            config,
            transport,
            codec: Arc::new(codec),
            waiter: Waiter::default(),
            hubs: DashMap::default(),
            disposed: AtomicBool::new(false),
            events: broadcast::channel(EVENT_CAPACITY).0,
            task_supervisor: TaskSupervisor::create(),
        });

        let weak = Arc::downgrade(&this);
        this.task_supervisor.spawn(async move {
            while let Some(received) = receiver.recv().await {
                let Some(this) = weak.upgrade() else {
                    break;
                };
                this.on_received(received);
            }
            tracing::debug!("router receive loop finished");
        });

        let weak = Arc::downgrade(&this);
        this.task_supervisor.spawn(async move {
            loop {
                let event = match transport_events.recv().await {
                    Ok(TransportEvent::Connected(session)) => RouterEvent::Connected(session),
                    Ok(TransportEvent::Disconnected(session)) => RouterEvent::Disconnected(session),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("router missed {n} transport events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(this) = weak.upgrade() else {
                    break;
                };
                tracing::debug!("transport event: {event:?}");
                this.emit(event);
            }
        });

        Ok(this)
    }

    #[must_use]
    pub fn codec(&self) -> &Arc<C> {
        &self.codec
    }

    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Subscribes to connection and error events published from now on.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<RouterEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RouterEvent) {
        // no subscriber is not an error.
        let _ = self.events.send(event);
    }

    /// Registers a service under `name`, or under its own name when `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::DuplicateName`] if the name is taken, or
    /// [`ErrorKind::Configuration`] if the method table is ambiguous.
    pub fn add_service<S: Service<C>>(&self, service: S, name: Option<&str>) -> Result<()> {
        let name = name.unwrap_or(service.name()).to_string();
        let skeleton = Skeleton::new(name.clone(), service.methods())?;
        self.insert_hub(name, Hub::Service(Arc::new(skeleton)))
    }

    /// Registers a proxy for the remote hub `name` (by default the trait
    /// name) and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::DuplicateName`] if the name is taken.
    pub fn add_interface<I: Interface<C>>(self: &Arc<Self>, name: Option<&str>) -> Result<I> {
        let name = name.unwrap_or(I::NAME).to_string();
        self.insert_hub(name.clone(), Hub::Interface)?;
        Ok(I::bind(Client::new(self.clone(), name)))
    }

    fn insert_hub(&self, name: String, hub: Hub<C>) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::kind(ErrorKind::RouterDisposed));
        }
        match self.hubs.entry(name) {
            Entry::Occupied(entry) => Err(Error::new(
                ErrorKind::DuplicateName,
                format!("hub already registered: {}", entry.key()),
            )),
            Entry::Vacant(entry) => {
                tracing::debug!("hub registered: {}", entry.key());
                entry.insert(hub);
                Ok(())
            }
        }
    }

    /// Sends a request and waits for its decoded result.
    ///
    /// # Errors
    ///
    /// Fails with the remote error, [`ErrorKind::Timeout`] when the configured
    /// call timeout expires, [`ErrorKind::RouterDisposed`] when the router is
    /// disposed first, or the codec and transport errors of the send.
    pub async fn call<R: DeserializeOwned>(
        &self,
        hub: &str,
        method: &str,
        arguments: Vec<C::Value>,
    ) -> Result<R> {
        let results = self.call_raw(hub, method, arguments).await?;
        self.codec.from_value(results.as_ref())
    }

    /// Like [`call`](Self::call) but leaves the result encoded.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn call_raw(
        &self,
        hub: &str,
        method: &str,
        arguments: Vec<C::Value>,
    ) -> Result<Option<C::Value>> {
        let (msg_id, receiver) = self.waiter.alloc()?;
        let mut request = Message::request(hub, method, arguments);
        request.id = msg_id;
        let bytes = self.codec.encode(&request)?;
        tracing::trace!("request {}: {hub}.{method}", request.id);
        self.transport
            .send(Frame::new(bytes, self.codec.streams_text()), &[])
            .await?;

        let response = match self.config.call_timeout {
            Some(timeout) => tokio::time::timeout(timeout, receiver.recv())
                .await
                .map_err(|_| {
                    Error::new(
                        ErrorKind::Timeout,
                        format!("{hub}.{method} timed out after {timeout:?}"),
                    )
                })??,
            None => receiver.recv().await?,
        };
        response.into_outcome()
    }

    fn on_received(self: &Arc<Self>, received: Received) {
        let msg = match self.codec.decode(&received.bytes) {
            Ok(msg) => msg.with_session(received.session),
            Err(e) => {
                tracing::warn!(
                    "drop undecodable {} frame of {} bytes: {e}",
                    self.codec.name(),
                    received.bytes.len()
                );
                self.emit(RouterEvent::Error(e));
                return;
            }
        };

        match msg.kind() {
            MessageKind::Response => {
                let msg_id = msg.id.clone();
                self.waiter.post(&msg_id, msg);
            }
            MessageKind::Request => self.dispatch(msg),
        }
    }

    fn dispatch(self: &Arc<Self>, request: Message<C::Value>) {
        let skeleton = self.hubs.get(&request.hub).and_then(|hub| match hub.value() {
            Hub::Service(skeleton) => Some(skeleton.clone()),
            Hub::Interface => None,
        });
        tracing::trace!("dispatch {}: {}.{}", request.id, request.hub, request.method);

        let this = self.clone();
        self.task_supervisor.spawn(async move {
            let Message {
                id,
                hub,
                method,
                arguments,
                session,
                ..
            } = request;
            let response = match skeleton {
                Some(skeleton) => {
                    let arguments = arguments.unwrap_or_default();
                    let outcome = skeleton.execute(this.codec.clone(), &method, arguments).await;
                    if let Err(e) = &outcome {
                        this.emit(RouterEvent::Error(e.clone()));
                    }
                    skeleton.reply(id, &method, outcome)
                }
                None => {
                    let err = Error::new(ErrorKind::NoSuchHub, format!("no such hub: {hub}"));
                    tracing::warn!("{err}");
                    let response = Message::failure(id, err.wire_message(), None);
                    this.emit(RouterEvent::Error(err));
                    response
                }
            };
            if let Err(e) = this.respond(&response, session).await {
                tracing::error!("send response {} failed: {e}", response.id);
                this.emit(RouterEvent::Error(e));
            }
        });
    }

    async fn respond(
        &self,
        response: &Message<C::Value>,
        session: Option<SessionId>,
    ) -> Result<()> {
        let bytes = self.codec.encode(response)?;
        self.transport
            .send(
                Frame::new(bytes, self.codec.streams_text()),
                session.as_slice(),
            )
            .await
    }

    /// Stops the receive loop, fails every pending call with
    /// [`ErrorKind::RouterDisposed`] and drops all hubs. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.task_supervisor.stop();
        let drained = self
            .waiter
            .drain(&Error::new(ErrorKind::RouterDisposed, "router disposed".to_string()));
        self.hubs.clear();
        tracing::debug!("router disposed, {drained} pending calls failed");
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Waits for the receive loop and in-flight dispatches to finish after
    /// [`dispose`](Self::dispose).
    pub async fn join(&self) {
        self.task_supervisor.all_stopped().await;
    }

    /// Registered hub names, sorted.
    #[must_use]
    pub fn hub_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.hubs.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.waiter.pending()
    }

    #[must_use]
    pub fn is_pending(&self, msg_id: &str) -> bool {
        self.waiter.contains_message_id(msg_id)
    }
}

impl<C: Codec> std::fmt::Debug for Router<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("codec", &self.codec.name())
            .field("hubs", &self.hub_names())
            .field("waiter", &self.waiter)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
