//! Bounded multi-producer single-consumer queue.
//!
//! Unlike `std::sync::mpsc` the queue has a hard capacity so that a
//! producer can observe backpressure instead of buffering without bound.
//! Both ends are non-blocking: `try_send` reports a full or closed queue
//! and `try_recv` reports an empty or closed queue, leaving the retry
//! policy to the caller.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Error returned by [`Sender::try_send`].
pub enum TrySendError<T> {
    /// The queue is at capacity. The rejected value is returned.
    Full(T),
    /// The receiver was dropped. The rejected value is returned.
    Disconnected(T),
}

impl<T> TrySendError<T> {
    /// Recovers the value that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::Full(v) => v,
            TrySendError::Disconnected(v) => v,
        }
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => write!(f, "Full(..)"),
            TrySendError::Disconnected(_) => write!(f, "Disconnected(..)"),
        }
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => write!(f, "sending on a full queue"),
            TrySendError::Disconnected(_) => write!(f, "sending on a closed queue"),
        }
    }
}

impl<T> std::error::Error for TrySendError<T> {}

/// Error returned by [`Receiver::try_recv`].
#[derive(Debug, PartialEq, Eq)]
pub enum TryRecvError {
    /// The queue is currently empty.
    Empty,
    /// The queue is empty and every sender was dropped.
    Disconnected,
}

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryRecvError::Empty => write!(f, "receiving on an empty queue"),
            TryRecvError::Disconnected => write!(f, "receiving on a closed queue"),
        }
    }
}

impl std::error::Error for TryRecvError {}

struct Shared<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    senders: AtomicUsize,
    rx_alive: AtomicBool,
}

/// The producing half. Cloneable; every clone counts toward
/// disconnection tracking.
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Sender<T> {
    /// Attempts to enqueue `value` without blocking.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        if !self.shared.rx_alive.load(Ordering::Acquire) {
            return Err(TrySendError::Disconnected(value));
        }
        let mut queue = self
            .shared
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if queue.len() >= self.shared.capacity {
            return Err(TrySendError::Full(value));
        }
        queue.push_back(value);
        Ok(())
    }

    /// Enqueues `value` even when the queue is at capacity.
    ///
    /// For traffic classes that must not stall behind the bound, such
    /// as answers to messages the bound already admitted. Only a
    /// dropped receiver can refuse the value.
    pub fn force_send(&self, value: T) -> Result<(), TrySendError<T>> {
        if !self.shared.rx_alive.load(Ordering::Acquire) {
            return Err(TrySendError::Disconnected(value));
        }
        self.shared
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(value);
        Ok(())
    }

    /// Whether a `try_send` at this instant would report `Full`. Purely
    /// advisory under concurrent senders.
    pub fn is_full(&self) -> bool {
        self.shared
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
            >= self.shared.capacity
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::AcqRel);
        Sender {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        self.shared.senders.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The consuming half. There is exactly one receiver per queue.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Receiver<T> {
    /// Attempts to dequeue the oldest value without blocking.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut queue = self
            .shared
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match queue.pop_front() {
            Some(value) => Ok(value),
            None => {
                if self.shared.senders.load(Ordering::Acquire) == 0 {
                    Err(TryRecvError::Disconnected)
                } else {
                    Err(TryRecvError::Empty)
                }
            }
        }
    }

    /// Number of values currently queued.
    pub fn len(&self) -> usize {
        self.shared
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.shared.rx_alive.store(false, Ordering::Release);
    }
}

/// Creates a bounded queue holding at most `capacity` values.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    assert!(capacity > 0, "mailbox capacity must be at least 1");
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::with_capacity(capacity)),
        capacity,
        senders: AtomicUsize::new(1),
        rx_alive: AtomicBool::new(true),
    });
    (
        Sender {
            shared: Arc::clone(&shared),
        },
        Receiver { shared },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_send_recv() {
        let (tx, rx) = channel(4);
        tx.try_send(42).expect("Failed to send");
        assert_eq!(rx.try_recv().expect("Failed to receive"), 42);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_full_queue() {
        let (tx, rx) = channel(2);
        assert!(!tx.is_full());
        tx.try_send(1).expect("Failed to send");
        tx.try_send(2).expect("Failed to send");
        assert!(tx.is_full());
        match tx.try_send(3) {
            Err(TrySendError::Full(v)) => assert_eq!(v, 3),
            other => panic!("expected Full, got {:?}", other),
        }
        assert_eq!(rx.try_recv().expect("Failed to receive"), 1);
        tx.try_send(3).expect("Failed to send after drain");
    }

    #[test]
    fn test_force_send_overrides_bound() {
        let (tx, rx) = channel(1);
        tx.try_send(1).expect("Failed to send");
        tx.force_send(2).expect("Failed to force send");
        assert_eq!(rx.len(), 2);
        assert_eq!(rx.try_recv().expect("Failed to receive"), 1);
        assert_eq!(rx.try_recv().expect("Failed to receive"), 2);
        drop(rx);
        assert!(matches!(
            tx.force_send(3),
            Err(TrySendError::Disconnected(3))
        ));
    }

    #[test]
    fn test_fifo_order() {
        let (tx, rx) = channel(8);
        for i in 0..5 {
            tx.try_send(i).expect("Failed to send");
        }
        for i in 0..5 {
            assert_eq!(rx.try_recv().expect("Failed to receive"), i);
        }
    }

    #[test]
    fn test_multiple_senders() {
        let (tx1, rx) = channel(8);
        let tx2 = tx1.clone();
        tx1.try_send(1).expect("Failed to send from tx1");
        tx2.try_send(2).expect("Failed to send from tx2");
        assert_eq!(rx.try_recv().expect("Failed to receive"), 1);
        assert_eq!(rx.try_recv().expect("Failed to receive"), 2);
    }

    #[test]
    fn test_sender_disconnect() {
        let (tx, rx) = channel::<i32>(4);
        drop(tx);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn test_sender_disconnect_after_send() {
        let (tx, rx) = channel(4);
        tx.try_send(7).expect("Failed to send");
        drop(tx);
        // A queued value survives the sender.
        assert_eq!(rx.try_recv().expect("Failed to receive"), 7);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn test_receiver_disconnect() {
        let (tx, rx) = channel(4);
        drop(rx);
        match tx.try_send(5) {
            Err(TrySendError::Disconnected(v)) => assert_eq!(v, 5),
            other => panic!("expected Disconnected, got {:?}", other),
        }
    }

    #[test]
    fn test_threaded_producers() {
        let (tx, rx) = channel(64);
        let mut handles = Vec::new();
        for t in 0..4 {
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                for i in 0..16 {
                    let mut value = t * 100 + i;
                    loop {
                        match tx.try_send(value) {
                            Ok(()) => break,
                            Err(TrySendError::Full(v)) => {
                                value = v;
                                std::hint::spin_loop();
                            }
                            Err(TrySendError::Disconnected(_)) => {
                                panic!("receiver vanished")
                            }
                        }
                    }
                }
            }));
        }
        drop(tx);

        let mut received = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(v) => received.push(v),
                Err(TryRecvError::Empty) => std::hint::spin_loop(),
                Err(TryRecvError::Disconnected) => break,
            }
        }
        for handle in handles {
            handle.join().expect("producer thread panicked");
        }
        assert_eq!(received.len(), 64);
    }
}
