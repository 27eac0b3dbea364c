use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::{ArgWriter, Codec, Result, Router};

/// A typed proxy for a remote hub.
///
/// Implemented by the `<Trait>Client` structs generated by
/// [`#[service]`](crate::service); obtained through
/// [`Router::add_interface`].
pub trait Interface<C: Codec>: Sized + Send + Sync + 'static {
    /// Default hub name.
    const NAME: &'static str;

    fn bind(client: Client<C>) -> Self;
}

/// Untyped handle for calling the methods of one remote hub.
pub struct Client<C: Codec> {
    router: Arc<Router<C>>,
    hub: String,
}

impl<C: Codec> Client<C> {
    pub(crate) fn new(router: Arc<Router<C>>, hub: String) -> Self {
        Self { router, hub }
    }

    #[must_use]
    pub fn hub(&self) -> &str {
        &self.hub
    }

    #[must_use]
    pub fn router(&self) -> &Arc<Router<C>> {
        &self.router
    }

    /// Starts an argument list encoded with the router's codec.
    #[must_use]
    pub fn arguments(&self) -> ArgWriter<C> {
        ArgWriter::new(self.router.codec().clone())
    }

    /// Calls `method` on the remote hub and decodes its result.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Remote`](crate::ErrorKind::Remote) if the remote
    /// method failed, or the local failure (send, timeout, disposal).
    pub async fn request<R: DeserializeOwned>(
        &self,
        method: &str,
        args: ArgWriter<C>,
    ) -> Result<R> {
        self.router.call(&self.hub, method, args.into_values()).await
    }
}

impl<C: Codec> Clone for Client<C> {
    fn clone(&self) -> Self {
        Self {
            router: self.router.clone(),
            hub: self.hub.clone(),
        }
    }
}

impl<C: Codec> std::fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("hub", &self.hub).finish()
    }
}
