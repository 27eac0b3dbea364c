use tokio::sync::oneshot;

use crate::{Error, ErrorKind, Message, Result, waiter::WaiterCleaner};

/// Caller side of a pending call.
///
/// Dropping it before the response arrives removes the pending entry.
pub struct Receiver<'a, V> {
    pub(crate) rx: oneshot::Receiver<Result<Message<V>>>,
    pub(crate) cleaner: WaiterCleaner<'a, V>,
}

impl<V> Receiver<'_, V> {
    /// Waits for the response of the pending call.
    ///
    /// # Errors
    ///
    /// Returns the error the entry was failed with, or
    /// [`ErrorKind::RouterDisposed`] if the table went away first.
    pub async fn recv(self) -> Result<Message<V>> {
        // the cleaner stays alive until the response is in, so a caller that
        // stops polling still removes its entry.
        let Self { rx, cleaner: _cleaner } = self;
        rx.await
            .map_err(|e| Error::new(ErrorKind::RouterDisposed, e.to_string()))?
    }
}
