use dashmap::{DashMap, mapref::entry::Entry};
use foldhash::fast::RandomState;
use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::sync::oneshot;

use crate::{
    Message, Receiver,
    error::{Error, ErrorKind, Result},
};

const BASE62: &[u8; 62] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Encodes a counter value in base 62, least-significant digit first.
#[must_use]
pub fn encode_id(mut value: u64) -> String {
    if value == 0 {
        return char::from(BASE62[0]).to_string();
    }
    let mut id = String::with_capacity(11);
    while value != 0 {
        id.push(char::from(BASE62[(value % 62) as usize]));
        value /= 62;
    }
    id
}

pub(crate) type Settle<V> = oneshot::Sender<Result<Message<V>>>;

/// Pending-call table correlating outgoing requests with their responses.
///
/// Ids come from a counter seeded with the wall clock at construction, so
/// they are not comparable across restarts. Every entry is settled at most
/// once: [`post`](Self::post) removes the entry before completing it.
pub struct Waiter<V> {
    counter: AtomicU64,
    id_map: DashMap<String, Settle<V>, RandomState>,
    disposed: AtomicBool,
}

/// RAII guard for automatic cleanup of waiter entries.
///
/// Dropping the guard removes the entry, so a caller that gives up (timeout,
/// cancellation) leaves nothing behind and a late response is dropped.
pub struct WaiterCleaner<'a, V> {
    waiter: &'a Waiter<V>,
    msg_id: String,
}

impl<V> Drop for WaiterCleaner<'_, V> {
    fn drop(&mut self) {
        self.waiter.remove(&self.msg_id);
    }
}

impl<V> Default for Waiter<V> {
    fn default() -> Self {
        let ticks = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| (d.as_nanos() / 100) as u64);
        Self::with_seed(ticks)
    }
}

impl<V> Waiter<V> {
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            counter: AtomicU64::new(seed),
            id_map: DashMap::default(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Allocates a correlation id and installs a pending entry for it.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::RouterDisposed`] once the table has been drained.
    pub fn alloc(&self) -> Result<(String, Receiver<'_, V>)> {
        if self.is_disposed() {
            return Err(Error::kind(ErrorKind::RouterDisposed));
        }

        let (tx, rx) = oneshot::channel();
        let msg_id = loop {
            let next = self.counter.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
            let msg_id = encode_id(next);
            match self.id_map.entry(msg_id) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(entry) => {
                    let msg_id = entry.key().clone();
                    entry.insert(tx);
                    break msg_id;
                }
            }
        };
        let cleaner = WaiterCleaner {
            waiter: self,
            msg_id: msg_id.clone(),
        };

        // a drain that ran between the first check and the insert missed this entry.
        if self.is_disposed() {
            drop(cleaner);
            return Err(Error::kind(ErrorKind::RouterDisposed));
        }

        Ok((msg_id, Receiver { rx, cleaner }))
    }

    /// Settles the pending call with the given id.
    ///
    /// Returns `false` when no call is waiting for the id (it already timed
    /// out, was settled, or never existed); the message is then dropped.
    pub fn post(&self, msg_id: &str, result: Message<V>) -> bool {
        if let Some((_, tx)) = self.id_map.remove(msg_id) {
            let _ = tx.send(Ok(result));
            true
        } else {
            tracing::debug!("no pending call for msg_id: {msg_id}");
            false
        }
    }

    /// Fails every pending call with `err` and rejects later allocations.
    ///
    /// Returns the number of calls that were failed.
    pub fn drain(&self, err: &Error) -> usize {
        self.disposed.store(true, Ordering::SeqCst);
        let ids: Vec<String> = self.id_map.iter().map(|e| e.key().clone()).collect();
        let mut drained = 0;
        for id in ids {
            if let Some((_, tx)) = self.id_map.remove(&id) {
                let _ = tx.send(Err(err.clone()));
                drained += 1;
            }
        }
        drained
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Checks if a message ID is currently being waited on.
    #[must_use]
    pub fn contains_message_id(&self, msg_id: &str) -> bool {
        self.id_map.contains_key(msg_id)
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.id_map.len()
    }

    fn remove(&self, msg_id: &str) {
        self.id_map.remove(msg_id);
    }
}

impl<V> std::fmt::Debug for Waiter<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("pending", &self.id_map.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashSet, sync::Arc};

    #[test]
    fn test_encode_id() {
        assert_eq!(encode_id(0), "A");
        assert_eq!(encode_id(1), "B");
        assert_eq!(encode_id(61), "9");
        assert_eq!(encode_id(62), "AB");
        assert_eq!(encode_id(63), "BB");
        assert_eq!(encode_id(u64::MAX).len(), 11);
    }

    #[tokio::test]
    async fn test_waiter() {
        let msg_waiter = Arc::new(Waiter::<u32>::with_seed(0));

        let (msg_id, rx) = msg_waiter.alloc().unwrap();
        assert_eq!(msg_id, "B");
        assert!(msg_waiter.contains_message_id(&msg_id));

        let handle = {
            let msg_waiter = Arc::clone(&msg_waiter);
            let msg_id = msg_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
                let mut msg = Message::success(msg_id.clone(), 7);
                msg.method = "dummy".into();
                assert!(msg_waiter.post(&msg_id, msg.clone()));
                // second delivery of the same response is a no-op.
                assert!(!msg_waiter.post(&msg_id, msg));
            })
        };

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.method, "dummy");
        assert_eq!(msg.results, Some(7));
        handle.await.unwrap();
        assert_eq!(msg_waiter.pending(), 0);

        let (msg_id, rx) = msg_waiter.alloc().unwrap();
        drop(rx); // drop the receiver to trigger the cleaner's Drop
        assert!(!msg_waiter.contains_message_id(&msg_id));
    }

    #[test]
    fn test_unique_ids() {
        let waiter = Waiter::<u32>::default();
        let mut receivers = vec![];
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            let (id, rx) = waiter.alloc().unwrap();
            assert!(ids.insert(id));
            receivers.push(rx);
        }
        assert_eq!(waiter.pending(), 1000);
        drop(receivers);
        assert_eq!(waiter.pending(), 0);
    }

    #[test]
    fn test_counter_wraparound() {
        let waiter = Waiter::<u32>::with_seed(u64::MAX - 1);
        let (first, _rx1) = waiter.alloc().unwrap();
        let (second, _rx2) = waiter.alloc().unwrap();
        assert_eq!(first, encode_id(u64::MAX));
        assert_eq!(second, encode_id(0));
    }

    #[tokio::test]
    async fn test_drain() {
        let waiter = Waiter::<u32>::default();
        let (_, rx1) = waiter.alloc().unwrap();
        let (_, rx2) = waiter.alloc().unwrap();

        let drained = waiter.drain(&Error::kind(ErrorKind::RouterDisposed));
        assert_eq!(drained, 2);
        assert_eq!(waiter.pending(), 0);

        for rx in [rx1, rx2] {
            let err = rx.recv().await.unwrap_err();
            assert_eq!(err.kind, ErrorKind::RouterDisposed);
        }

        let err = waiter.alloc().err().unwrap();
        assert_eq!(err.kind, ErrorKind::RouterDisposed);
    }
}
