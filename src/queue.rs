//! The unit queue between a feeder and its reader.
//!
//! A FIFO channel with an explicit end-of-stream marker. The marker is a
//! separate message variant, so it can never be mistaken for a unit, and it
//! is sent by [`UnitProducer::finish`], which consumes the producer: the
//! marker goes out exactly once and nothing can follow it.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, unbounded};
use tracing::trace;

use crate::error::{CaptiveError, Result};

enum Message<T> {
    Unit(T),
    End,
}

impl<T> Message<T> {
    fn into_unit(self) -> Option<T> {
        match self {
            Self::Unit(item) => Some(item),
            Self::End => None,
        }
    }
}

/// Create a unit queue. `None` is unbounded; `Some(n)` blocks the producer
/// while `n` items are waiting.
pub fn unit_queue<T>(capacity: Option<usize>) -> (UnitProducer<T>, UnitConsumer<T>) {
    let (tx, rx) = match capacity {
        Some(capacity) => bounded(capacity.max(1)),
        None => unbounded(),
    };
    (UnitProducer { tx }, UnitConsumer { rx })
}

/// Sending half of a unit queue.
pub struct UnitProducer<T> {
    tx: Sender<Message<T>>,
}

impl<T> UnitProducer<T> {
    /// Enqueue a unit, blocking while a bounded queue is full.
    pub fn produce(&self, item: T) -> Result<()> {
        self.tx
            .send(Message::Unit(item))
            .map_err(|_| CaptiveError::QueueClosed)
    }

    /// Enqueue a unit without blocking.
    ///
    /// Returns the unit back when a bounded queue is full.
    pub fn try_produce(&self, item: T) -> Result<Option<T>> {
        match self.tx.try_send(Message::Unit(item)) {
            Ok(()) => Ok(None),
            Err(TrySendError::Full(message)) => Ok(message.into_unit()),
            Err(TrySendError::Disconnected(_)) => Err(CaptiveError::QueueClosed),
        }
    }

    /// Number of items waiting.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// Check whether no items are waiting.
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Send the end-of-stream marker, blocking while a bounded queue is full.
    pub fn finish(self) -> Result<()> {
        trace!("Unit queue finished");
        self.tx.send(Message::End).map_err(|_| CaptiveError::QueueClosed)
    }
}

/// Receiving half of a unit queue.
pub struct UnitConsumer<T> {
    rx: Receiver<Message<T>>,
}

impl<T> UnitConsumer<T> {
    /// Dequeue the next unit, blocking until one is available.
    ///
    /// Returns `Ok(None)` for the end-of-stream marker, and
    /// [`CaptiveError::QueueClosed`] if the producer was dropped without
    /// finishing.
    pub fn consume(&self) -> Result<Option<T>> {
        match self.rx.recv() {
            Ok(Message::Unit(item)) => Ok(Some(item)),
            Ok(Message::End) => Ok(None),
            Err(_) => Err(CaptiveError::QueueClosed),
        }
    }

    /// Non-blocking, best-effort emptiness check.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fifo_then_single_end() {
        let (tx, rx) = unit_queue(None);
        for i in 0..100u32 {
            tx.produce(i).unwrap();
        }
        tx.finish().unwrap();

        let mut seen = Vec::new();
        while let Some(i) = rx.consume().unwrap() {
            seen.push(i);
        }
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
        // Nothing follows the end marker; the producer is gone.
        assert!(matches!(rx.consume(), Err(CaptiveError::QueueClosed)));
    }

    #[test]
    fn test_dropped_producer_is_not_end_of_stream() {
        let (tx, rx) = unit_queue::<u32>(None);
        tx.produce(1).unwrap();
        drop(tx);
        assert_eq!(rx.consume().unwrap(), Some(1));
        assert!(matches!(rx.consume(), Err(CaptiveError::QueueClosed)));
    }

    #[test]
    fn test_is_empty_is_best_effort() {
        let (tx, rx) = unit_queue(None);
        assert!(rx.is_empty());
        tx.produce("a").unwrap();
        assert!(!rx.is_empty());
        assert!(!tx.is_empty());
        assert_eq!(tx.len(), 1);
        rx.consume().unwrap();
        assert!(rx.is_empty());
    }

    #[test]
    fn test_bounded_try_produce_returns_item_when_full() {
        let (tx, rx) = unit_queue(Some(2));
        assert_eq!(tx.try_produce(1).unwrap(), None);
        assert_eq!(tx.try_produce(2).unwrap(), None);
        assert_eq!(tx.try_produce(3).unwrap(), Some(3));

        assert_eq!(rx.consume().unwrap(), Some(1));
        tx.finish().unwrap();
        assert_eq!(rx.consume().unwrap(), Some(2));
        assert_eq!(rx.consume().unwrap(), None);
    }

    #[test]
    fn test_bounded_produce_blocks_until_consumed() {
        let (tx, rx) = unit_queue(Some(1));
        let producer = thread::spawn(move || {
            for i in 0..50u32 {
                tx.produce(i).unwrap();
            }
            tx.finish().unwrap();
        });

        let mut seen = Vec::new();
        while let Some(i) = rx.consume().unwrap() {
            seen.push(i);
        }
        producer.join().unwrap();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_consumer_dropped() {
        let (tx, rx) = unit_queue(None);
        drop(rx);
        assert!(matches!(tx.produce(1), Err(CaptiveError::QueueClosed)));
        assert!(matches!(tx.try_produce(1), Err(CaptiveError::QueueClosed)));
    }
}
