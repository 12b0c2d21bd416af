use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::Arc;

use mio::Waker;

use crate::riverdb::common::Result;

/// Multi-producer / single-consumer queue of sockets waiting to be
/// registered with an EventLoop's multiplexer. `std::sync::mpsc` is the
/// standard library's purpose-built MPSC primitive — the producer side
/// (`register`) is lock-free, so there's no need to reach for a
/// general-purpose concurrent container here. Pushing onto the queue also
/// wakes the EventLoop's Poll via a `mio::Waker`, since an idle loop may be
/// blocked inside the multiplexer wait with nothing else to notice the new
/// work.
pub struct RegistrationQueue<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    waker: Arc<Waker>,
}

impl<T> RegistrationQueue<T> {
    pub fn new(waker: Arc<Waker>) -> Self {
        let (sender, receiver) = channel();
        RegistrationQueue { sender, receiver, waker }
    }

    /// A cloneable handle producers use to enqueue work and wake the loop.
    pub fn producer(&self) -> RegistrationProducer<T> {
        RegistrationProducer {
            sender: self.sender.clone(),
            waker: self.waker.clone(),
        }
    }

    /// Drains everything currently queued without blocking. Called by the
    /// EventLoop thread right after the multiplexer wait returns.
    pub fn drain(&self) -> Vec<T> {
        let mut items = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(item) => items.push(item),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        items
    }
}

/// Producer handle: enqueue(register) + wake. Cloned once per EventLoopGroup
/// dispatcher and handed to whichever thread calls dispatch/register.
#[derive(Clone)]
pub struct RegistrationProducer<T> {
    sender: Sender<T>,
    waker: Arc<Waker>,
}

impl<T> RegistrationProducer<T> {
    pub fn register(&self, item: T) -> Result<()> {
        // Disconnected only if the EventLoop thread has already exited,
        // which only happens after shutdown; silently dropping the socket
        // in that case is correct — there is no loop left to serve it.
        if self.sender.send(item).is_ok() {
            self.waker.wake()?;
        }
        Ok(())
    }

    /// Wakes the loop without enqueueing anything, e.g. so it notices a
    /// shutdown flag flip promptly instead of waiting out the multiplexer's
    /// bounded timeout.
    pub fn wake(&self) -> Result<()> {
        self.waker.wake()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Poll, Token};

    #[test]
    fn drain_returns_items_in_fifo_order() {
        let poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), Token(0)).unwrap());
        let queue: RegistrationQueue<i32> = RegistrationQueue::new(waker);
        let producer = queue.producer();
        producer.register(1).unwrap();
        producer.register(2).unwrap();
        producer.register(3).unwrap();
        assert_eq!(queue.drain(), vec![1, 2, 3]);
    }

    #[test]
    fn drain_on_empty_queue_returns_empty_vec() {
        let poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), Token(0)).unwrap());
        let queue: RegistrationQueue<i32> = RegistrationQueue::new(waker);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn register_wakes_a_blocked_poll() {
        use mio::Events;
        use std::time::Duration;

        let mut poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), Token(1)).unwrap());
        let queue: RegistrationQueue<i32> = RegistrationQueue::new(waker);
        let producer = queue.producer();

        producer.register(42).unwrap();

        let mut events = Events::with_capacity(8);
        poll.poll(&mut events, Some(Duration::from_secs(1))).unwrap();
        assert!(events.iter().any(|e| e.token() == Token(1)));
        assert_eq!(queue.drain(), vec![42]);
    }
}
