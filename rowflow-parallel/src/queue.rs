//! Bounded row queues between operators
//!
//! A full queue blocks its producer and an empty queue blocks its consumer;
//! both waits also watch a [`CancellationToken`] and return as soon as it is
//! cancelled.

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;

use rowflow_core::{Error, Row};

use crate::cancel::CancellationToken;

/// What flows through a queue
#[derive(Debug)]
pub enum Message {
    /// A row
    Row(Row),
    /// End of stream; nothing follows
    Eof,
    /// Terminal failure; nothing follows
    Failed(Error),
}

/// Result of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    /// The message was enqueued
    Sent,
    /// The token was cancelled before the queue had room
    Cancelled,
    /// The consumer is gone
    Closed,
}

/// Sending half of a bounded queue
#[derive(Clone)]
pub struct Producer {
    tx: Sender<Message>,
}

/// Receiving half of a bounded queue
#[derive(Clone)]
pub struct Consumer {
    rx: Receiver<Message>,
}

/// Create a queue holding at most `capacity` messages
pub fn bounded(capacity: usize) -> (Producer, Consumer) {
    let (tx, rx) = channel::bounded(capacity.max(1));
    (Producer { tx }, Consumer { rx })
}

impl Producer {
    /// Enqueue `message`, blocking while the queue is full
    pub fn push(&self, message: Message, token: &CancellationToken) -> Push {
        if token.is_cancelled() {
            return Push::Cancelled;
        }
        select! {
            send(self.tx, message) -> res => match res {
                Ok(()) => Push::Sent,
                Err(_) => Push::Closed,
            },
            recv(token.receiver()) -> _ => Push::Cancelled,
        }
    }

    /// Enqueue a row
    pub fn push_row(&self, row: Row, token: &CancellationToken) -> Push {
        self.push(Message::Row(row), token)
    }
}

impl Consumer {
    /// Dequeue the next message, blocking while the queue is empty
    ///
    /// Returns `None` once the token is cancelled. A producer side that
    /// disappears without sending a terminal message is reported as a
    /// pipeline failure.
    pub fn pop(&self, token: &CancellationToken) -> Option<Message> {
        if token.is_cancelled() {
            return None;
        }
        select! {
            recv(self.rx) -> msg => match msg {
                Ok(message) => Some(message),
                Err(_) if token.is_cancelled() => None,
                Err(_) => Some(Message::Failed(Error::Pipeline(
                    "upstream worker stopped without end-of-stream".into(),
                ))),
            },
            recv(token.receiver()) -> _ => None,
        }
    }

    /// Number of messages currently queued
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue is currently empty
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowflow_core::Tensor;
    use std::thread;
    use std::time::Duration;

    fn row(v: i32) -> Row {
        Row::from_columns([("v", Tensor::scalar(v))]).unwrap()
    }

    #[test]
    fn full_queue_blocks_until_cancelled() {
        let token = CancellationToken::new();
        let (producer, _consumer) = bounded(1);
        assert_eq!(producer.push_row(row(0), &token), Push::Sent);

        let blocked = {
            let token = token.clone();
            thread::spawn(move || producer.push_row(row(1), &token))
        };
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert_eq!(blocked.join().unwrap(), Push::Cancelled);
    }

    #[test]
    fn empty_queue_unblocks_on_cancel() {
        let token = CancellationToken::new();
        let (_producer, consumer) = bounded(1);
        let waiter = {
            let token = token.clone();
            thread::spawn(move || consumer.pop(&token).is_none())
        };
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn vanished_producer_is_a_failure() {
        let token = CancellationToken::new();
        let (producer, consumer) = bounded(2);
        producer.push_row(row(7), &token);
        drop(producer);

        assert!(matches!(consumer.pop(&token), Some(Message::Row(_))));
        assert!(matches!(consumer.pop(&token), Some(Message::Failed(Error::Pipeline(_)))));
    }

    #[test]
    fn push_to_dropped_consumer_is_closed() {
        let token = CancellationToken::new();
        let (producer, consumer) = bounded(1);
        drop(consumer);
        assert_eq!(producer.push(Message::Eof, &token), Push::Closed);
    }
}
