//! # Wait Queue
//!
//! Correlates incoming messages with the callers waiting for them, keyed by
//! `(opcode, request id)`.
//!
//! - A waiter registers a single-slot channel and suspends with a deadline.
//! - [`WaitQueue::put`] hands a message to the oldest live waiter for its key,
//!   or retains it when nobody is waiting yet. A reply that beats its waiter's
//!   registration is therefore never lost.
//! - Retained messages older than the hold time are dropped silently,
//!   which is also the fate of replies whose waiter already timed out. The
//!   sweep runs at most once per quarter hold time; an expired message is
//!   never handed out even before it is swept.
//! - [`WaitQueue::shutdown`] fails every current and future wait with
//!   `ConnectionBroken`.

use crate::core::message::Message;
use crate::error::{ProtocolError, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

type Key = (u16, u32);

/// Sweeps are spaced at least `hold_time / PURGE_DIVISOR` apart.
const PURGE_DIVISOR: u32 = 4;

#[derive(Default)]
struct Inner {
    retained: HashMap<Key, VecDeque<(Message, Instant)>>,
    waiters: HashMap<Key, VecDeque<oneshot::Sender<Message>>>,
    last_purge: Option<Instant>,
    shutdown: bool,
}

impl Inner {
    fn maybe_purge(&mut self, now: Instant, hold_time: Duration) {
        let due = self
            .last_purge
            .map_or(true, |at| now.duration_since(at) >= hold_time / PURGE_DIVISOR);
        if !due {
            return;
        }
        self.last_purge = Some(now);
        self.retained.retain(|_, queue| {
            queue.retain(|(_, at)| now.duration_since(*at) < hold_time);
            !queue.is_empty()
        });
    }

    fn take_retained(&mut self, key: Key, now: Instant, hold_time: Duration) -> Option<Message> {
        let queue = self.retained.get_mut(&key)?;
        let mut found = None;
        while let Some((msg, at)) = queue.pop_front() {
            if now.duration_since(at) < hold_time {
                found = Some(msg);
                break;
            }
        }
        if queue.is_empty() {
            self.retained.remove(&key);
        }
        found
    }
}

pub struct WaitQueue {
    inner: Mutex<Inner>,
    hold_time: Duration,
}

impl WaitQueue {
    pub fn new(hold_time: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            hold_time,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The guarded maps stay consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers `msg` to a waiter or retains it.
    pub fn put(&self, msg: Message) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.shutdown {
            return;
        }

        let key = (msg.opcode(), msg.id());
        let mut msg = msg;
        if let Some(waiters) = inner.waiters.get_mut(&key) {
            while let Some(tx) = waiters.pop_front() {
                match tx.send(msg) {
                    Ok(()) => {
                        if waiters.is_empty() {
                            inner.waiters.remove(&key);
                        }
                        return;
                    }
                    // Receiver gave up; try the next one.
                    Err(returned) => msg = returned,
                }
            }
            inner.waiters.remove(&key);
        }

        let now = Instant::now();
        inner.maybe_purge(now, self.hold_time);
        inner.retained.entry(key).or_default().push_back((msg, now));
    }

    /// Waits up to `timeout` for a message matching `(opcode, id)`.
    ///
    /// # Errors
    /// - `ProtocolError::Timeout` if nothing arrived in time
    /// - `ProtocolError::ConnectionBroken` if the queue was shut down
    pub async fn wait(&self, opcode: u16, id: u32, timeout: Duration) -> Result<Message> {
        let key = (opcode, id);
        let mut rx = {
            let mut inner = self.lock();
            let now = Instant::now();
            inner.maybe_purge(now, self.hold_time);
            if let Some(msg) = inner.take_retained(key, now, self.hold_time) {
                return Ok(msg);
            }
            if inner.shutdown {
                return Err(ProtocolError::ConnectionBroken);
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.entry(key).or_default().push_back(tx);
            rx
        };

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(msg)) => Ok(msg),
            Ok(Err(_)) => Err(ProtocolError::ConnectionBroken),
            Err(_) => {
                // A reply may have landed between expiry and close.
                rx.close();
                let late = rx.try_recv().ok();
                self.forget_closed(key);
                late.ok_or(ProtocolError::Timeout)
            }
        }
    }

    fn forget_closed(&self, key: Key) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if let Some(waiters) = inner.waiters.get_mut(&key) {
            waiters.retain(|tx| !tx.is_closed());
            if waiters.is_empty() {
                inner.waiters.remove(&key);
            }
        }
    }

    /// Fails all waiters and refuses further messages.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        inner.shutdown = true;
        inner.waiters.clear();
        inner.retained.clear();
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    /// Number of callers currently waiting.
    pub fn waiter_count(&self) -> usize {
        self.lock().waiters.values().map(VecDeque::len).sum()
    }

    /// Number of messages held for future waiters.
    pub fn retained_count(&self) -> usize {
        self.lock().retained.values().map(VecDeque::len).sum()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new(crate::utils::timeout::HOLD_TIME)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_reply_before_wait_is_retained() {
        let queue = WaitQueue::default();
        queue.put(Message::new(0x1D, 5));
        assert_eq!(queue.retained_count(), 1);

        let msg = queue.wait(0x1D, 5, SHORT).await.unwrap();
        assert_eq!(msg.id(), 5);
        assert_eq!(queue.retained_count(), 0);
    }

    #[tokio::test]
    async fn test_reply_reaches_only_matching_waiter() {
        let queue = Arc::new(WaitQueue::default());
        let q = Arc::clone(&queue);
        let x = tokio::spawn(async move { q.wait(0x1D, 1, Duration::from_secs(2)).await });
        let q = Arc::clone(&queue);
        let y = tokio::spawn(async move { q.wait(0x1D, 2, Duration::from_millis(300)).await });

        while queue.waiter_count() < 2 {
            tokio::task::yield_now().await;
        }
        queue.put(Message::new(0x1D, 1).with(28, 0u32));

        assert_eq!(x.await.unwrap().unwrap().id(), 1);
        assert!(matches!(y.await.unwrap(), Err(ProtocolError::Timeout)));
    }

    #[tokio::test]
    async fn test_timeout_then_late_reply_is_dropped_after_hold() {
        let queue = WaitQueue::new(Duration::from_millis(30));
        let result = queue.wait(1, 1, SHORT).await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
        assert_eq!(queue.waiter_count(), 0);

        queue.put(Message::new(1, 1));
        assert_eq!(queue.retained_count(), 1);
        tokio::time::sleep(Duration::from_millis(60)).await;
        // Any put or wait purges expired entries.
        queue.put(Message::new(2, 2));
        assert_eq!(queue.retained_count(), 1);
        assert!(queue.wait(1, 1, SHORT).await.is_err());
    }

    #[test]
    fn test_purge_is_throttled() {
        let hold = Duration::from_millis(400);
        let t0 = Instant::now();
        let mut inner = Inner::default();
        inner
            .retained
            .entry((1, 1))
            .or_default()
            .push_back((Message::new(1, 1), t0));

        let t1 = t0 + hold - Duration::from_millis(10);
        inner.maybe_purge(t1, hold);
        assert_eq!(inner.last_purge, Some(t1));
        assert_eq!(inner.retained.len(), 1);

        // Expired, but the last sweep was too recent to run another.
        let t2 = t0 + hold + Duration::from_millis(10);
        inner.maybe_purge(t2, hold);
        assert_eq!(inner.last_purge, Some(t1));
        assert_eq!(inner.retained.len(), 1);
        assert!(inner.take_retained((1, 1), t2, hold).is_none());
        assert!(inner.retained.is_empty());

        inner
            .retained
            .entry((2, 2))
            .or_default()
            .push_back((Message::new(2, 2), t0));
        let t3 = t1 + hold / PURGE_DIVISOR;
        inner.maybe_purge(t3, hold);
        assert_eq!(inner.last_purge, Some(t3));
        assert!(inner.retained.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiters() {
        let queue = Arc::new(WaitQueue::default());
        let mut handles = Vec::new();
        for id in 0..8 {
            let q = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                q.wait(1, id, Duration::from_secs(30)).await
            }));
        }
        while queue.waiter_count() < 8 {
            tokio::task::yield_now().await;
        }

        queue.shutdown();
        for handle in handles {
            let result = tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(result, Err(ProtocolError::ConnectionBroken)));
        }

        assert!(matches!(
            queue.wait(1, 99, SHORT).await,
            Err(ProtocolError::ConnectionBroken)
        ));
        queue.put(Message::new(1, 1));
        assert_eq!(queue.retained_count(), 0);
    }

    #[tokio::test]
    async fn test_same_key_waiters_served_in_order() {
        let queue = Arc::new(WaitQueue::default());
        let q = Arc::clone(&queue);
        let first = tokio::spawn(async move { q.wait(7, 7, Duration::from_secs(2)).await });
        while queue.waiter_count() < 1 {
            tokio::task::yield_now().await;
        }
        let q = Arc::clone(&queue);
        let second = tokio::spawn(async move { q.wait(7, 7, Duration::from_secs(2)).await });
        while queue.waiter_count() < 2 {
            tokio::task::yield_now().await;
        }

        queue.put(Message::new(7, 7).with(1, 1u32));
        queue.put(Message::new(7, 7).with(1, 2u32));
        assert_eq!(first.await.unwrap().unwrap().get_u32(1), Some(1));
        assert_eq!(second.await.unwrap().unwrap().get_u32(1), Some(2));
    }
}
