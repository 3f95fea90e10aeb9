//! Pending-request table.
//!
//! Maps outstanding request ids to one-shot completion slots. Every insert,
//! lookup and removal happens under one mutex, so a response is delivered at
//! most once and an id removed by one side can never be matched by the other.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{PomeloError, Result};
use crate::protocol::Message;

type Slot = oneshot::Sender<Result<Message>>;

#[derive(Default)]
struct Inner {
    slots: HashMap<u32, Slot>,
    last_id: u32,
    closed: bool,
}

/// Table of in-flight requests.
#[derive(Default)]
pub struct PendingTable {
    inner: Mutex<Inner>,
}

impl PendingTable {
    /// Create an empty, open table.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate the next request id and register its completion slot.
    ///
    /// Ids start at 1 and wrap at `u32::MAX`; after wrapping, 0 and ids
    /// still pending are skipped.
    ///
    /// # Errors
    ///
    /// [`PomeloError::SessionClosed`] once [`close`](Self::close) has run.
    pub fn register(&self) -> Result<(u32, oneshot::Receiver<Result<Message>>)> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(PomeloError::SessionClosed);
        }

        let mut id = inner.last_id;
        loop {
            id = id.wrapping_add(1);
            if id != 0 && !inner.slots.contains_key(&id) {
                break;
            }
        }
        inner.last_id = id;

        let (tx, rx) = oneshot::channel();
        inner.slots.insert(id, tx);
        Ok((id, rx))
    }

    /// Deliver a response to the request with the same id.
    ///
    /// Returns `false` if no request is waiting for that id.
    pub fn resolve(&self, message: Message) -> bool {
        let slot = self.lock().slots.remove(&message.id);
        match slot {
            Some(tx) => {
                // The caller may have stopped waiting; that is not an error.
                let _ = tx.send(Ok(message));
                true
            }
            None => false,
        }
    }

    /// Remove a request without resolving it.
    pub fn cancel(&self, id: u32) -> bool {
        self.lock().slots.remove(&id).is_some()
    }

    /// Close the table and fail every outstanding request.
    ///
    /// Returns the number of requests failed. Later registrations fail.
    pub fn close(&self) -> usize {
        let drained: Vec<Slot> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.slots.drain().map(|(_, tx)| tx).collect()
        };
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(PomeloError::SessionClosed));
        }
        count
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    /// Check if no requests are outstanding.
    pub fn is_empty(&self) -> bool {
        self.lock().slots.is_empty()
    }

    /// Check if the table was closed.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    #[cfg(test)]
    fn set_last_id(&self, id: u32) {
        self.lock().last_id = id;
    }
}

/// Completion handle for one request.
///
/// Resolves exactly once: with the matching response, or with
/// [`PomeloError::SessionClosed`] if the session ends first. Dropping it
/// before it resolves removes the request from the pending table.
#[must_use = "dropping a ResponseFuture cancels the request"]
pub struct ResponseFuture {
    id: u32,
    rx: oneshot::Receiver<Result<Message>>,
    table: Arc<PendingTable>,
    finished: bool,
}

impl ResponseFuture {
    pub(crate) fn new(
        id: u32,
        rx: oneshot::Receiver<Result<Message>>,
        table: Arc<PendingTable>,
    ) -> Self {
        Self {
            id,
            rx,
            table,
            finished: false,
        }
    }

    /// Id of the request this future waits for.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl Future for ResponseFuture {
    type Output = Result<Message>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(result) => {
                this.finished = true;
                Poll::Ready(result.unwrap_or(Err(PomeloError::SessionClosed)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ResponseFuture {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Only an empty slot is still registered under our id.
        if let Err(oneshot::error::TryRecvError::Empty) = self.rx.try_recv() {
            self.table.cancel(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_sequential_from_one() {
        let table = PendingTable::new();
        let (a, _ra) = table.register().unwrap();
        let (b, _rb) = table.register().unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_wraparound_skips_zero_and_pending_ids() {
        let table = PendingTable::new();
        let (first, _r1) = table.register().unwrap();
        assert_eq!(first, 1);

        table.set_last_id(u32::MAX - 1);
        let (max, _r2) = table.register().unwrap();
        assert_eq!(max, u32::MAX);

        // 0 is skipped, 1 is still pending.
        let (next, _r3) = table.register().unwrap();
        assert_eq!(next, 2);
    }

    #[tokio::test]
    async fn test_resolve_delivers_once() {
        let table = Arc::new(PendingTable::new());
        let (id, rx) = table.register().unwrap();
        let fut = ResponseFuture::new(id, rx, table.clone());

        assert!(table.resolve(Message::response(id, &b"ok"[..])));
        assert!(!table.resolve(Message::response(id, &b"dup"[..])));

        let msg = fut.await.unwrap();
        assert_eq!(msg.payload(), b"ok");
        assert!(table.is_empty());
    }

    #[test]
    fn test_unmatched_response_is_ignored() {
        let table = PendingTable::new();
        assert!(!table.resolve(Message::response(77, &b""[..])));
    }

    #[tokio::test]
    async fn test_close_fails_all_and_blocks_registration() {
        let table = Arc::new(PendingTable::new());
        let futures: Vec<_> = (0..3)
            .map(|_| {
                let (id, rx) = table.register().unwrap();
                ResponseFuture::new(id, rx, table.clone())
            })
            .collect();

        assert_eq!(table.close(), 3);
        assert!(table.is_closed());
        for fut in futures {
            assert!(matches!(fut.await, Err(PomeloError::SessionClosed)));
        }
        assert!(matches!(table.register(), Err(PomeloError::SessionClosed)));
    }

    #[test]
    fn test_drop_cancels_entry() {
        let table = Arc::new(PendingTable::new());
        let (id, rx) = table.register().unwrap();
        let fut = ResponseFuture::new(id, rx, table.clone());
        assert_eq!(table.len(), 1);

        drop(fut);
        assert!(table.is_empty());
        assert!(!table.resolve(Message::response(id, &b"late"[..])));
    }

    #[test]
    fn test_drop_after_resolution_keeps_other_entries() {
        let table = Arc::new(PendingTable::new());
        let (id, rx) = table.register().unwrap();
        let fut = ResponseFuture::new(id, rx, table.clone());
        let (_other, _rx_other) = table.register().unwrap();

        assert!(table.resolve(Message::response(id, &b"unread"[..])));
        drop(fut);
        assert_eq!(table.len(), 1);
    }
}
