//! One-to-many value broadcaster with replay of the latest value.
//!
//! Every subscriber owns its own unbounded queue, so a slow subscriber sees every publication in order instead of
//! only the most recent one. A subscriber attaching late gets the latest published value first.
//!
//! A channel can be failed once. From that moment on every current and future subscriber receives the error as its
//! final item and the stream ends.

use parking_lot::Mutex;
use std::fmt::Debug;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use tokio::sync::mpsc;
use tokio_stream::Stream;

type Delivered<V, E> = Result<V, Arc<E>>;

struct Inner<V, E> {
    latest:      Option<V>,
    failure:     Option<Arc<E>>,
    subscribers: Vec<mpsc::UnboundedSender<Delivered<V, E>>>,
}

pub struct Multicast<V, E> {
    inner: Mutex<Inner<V, E>>,
}

impl<V, E> Multicast<V, E>
where
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                latest:      None,
                failure:     None,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Deliver `value` to all subscribers and remember it for the late ones. Returns `false` if the channel has
    /// already failed, in which case the value is dropped.
    pub fn publish(&self, value: V) -> bool {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if inner.failure.is_some() {
            return false;
        }

        inner.subscribers.retain(|tx| tx.send(Ok(value.clone())).is_ok());
        inner.latest = Some(value);
        true
    }

    /// Terminate the channel. Only the first failure counts; later calls return `false`.
    pub fn fail(&self, error: Arc<E>) -> bool {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if inner.failure.is_some() {
            return false;
        }

        // Dropping the senders ends each stream right after the error.
        for tx in inner.subscribers.drain(..) {
            let _ = tx.send(Err(Arc::clone(&error)));
        }
        inner.latest = None;
        inner.failure = Some(error);
        true
    }

    pub fn subscribe(&self) -> Subscription<V, E> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(error) = &inner.failure {
            let _ = tx.send(Err(Arc::clone(error)));
        }
        else {
            if let Some(latest) = &inner.latest {
                let _ = tx.send(Ok(latest.clone()));
            }
            inner.subscribers.push(tx);
        }

        Subscription { rx }
    }

    /// Prunes subscribers which have gone away, so the answer reflects an unsubscribe immediately.
    pub fn has_active_subscribers(&self) -> bool {
        self.subscriber_count() > 0
    }

    pub fn subscriber_count(&self) -> usize {
        let mut guard = self.inner.lock();
        guard.subscribers.retain(|tx| !tx.is_closed());
        guard.subscribers.len()
    }

    pub fn is_failed(&self) -> bool {
        self.inner.lock().failure.is_some()
    }

    pub fn failure(&self) -> Option<Arc<E>> {
        self.inner.lock().failure.clone()
    }

    pub fn latest(&self) -> Option<V> {
        self.inner.lock().latest.clone()
    }
}

impl<V, E> Default for Multicast<V, E>
where
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> Debug for Multicast<V, E>
where
    V: Debug,
    E: Debug,
{
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.inner.lock();
        fmt.debug_struct("Multicast")
            .field("latest", &guard.latest)
            .field("failure", &guard.failure)
            .field("subscribers", &guard.subscribers.len())
            .finish()
    }
}

/// Receiving end of a [`Multicast`]. Dropping it unsubscribes.
pub struct Subscription<V, E> {
    rx: mpsc::UnboundedReceiver<Delivered<V, E>>,
}

impl<V, E> Subscription<V, E> {
    /// Wait for the next value. `None` means the stream has ended: either after an error or because the channel itself
    /// has been dropped.
    pub async fn recv(&mut self) -> Option<Delivered<V, E>> {
        self.rx.recv().await
    }

    /// Take an already delivered item without waiting.
    pub fn try_recv(&mut self) -> Option<Delivered<V, E>> {
        self.rx.try_recv().ok()
    }
}

impl<V, E> Stream for Subscription<V, E> {
    type Item = Delivered<V, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl<V, E> Debug for Subscription<V, E> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Subscription").finish_non_exhaustive()
    }
}
