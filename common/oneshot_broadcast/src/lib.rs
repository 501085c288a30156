//! Provides a single-sender, multiple-receiver channel where only one message
//! is ever sent. Every receiver observes a clone of the same message, whether
//! it subscribed before or after the send.
//!
//! The sender can inspect how many receivers are still attached, which lets a
//! worker abandon a computation once nobody is left to consume it.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll, Waker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The sender was dropped without sending a message.
    SenderDropped,
}

enum State<T> {
    Pending(Vec<Waker>),
    Sent(T),
    SenderDropped,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    receiver_count: AtomicUsize,
}

impl<T> Shared<T> {
    /// Move to `new_state` and wake anything waiting on a message.
    ///
    /// No-op if a message was already sent.
    fn resolve(&self, new_state: State<T>) {
        let mut state = self.state.lock();
        if let State::Pending(wakers) = &mut *state {
            let wakers = std::mem::take(wakers);
            *state = new_state;
            drop(state);
            for waker in wakers {
                waker.wake();
            }
        }
    }
}

/// The sending side of the channel. Consumed by `send`.
pub struct Sender<T>(Arc<Shared<T>>);

impl<T> Sender<T> {
    /// Send a message to all existing and future receivers.
    pub fn send(self, message: T) {
        self.0.resolve(State::Sent(message));
    }

    /// The number of receivers currently attached to the channel.
    pub fn receiver_count(&self) -> usize {
        self.0.receiver_count.load(Ordering::Acquire)
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        self.0.resolve(State::SenderDropped);
    }
}

/// The receiving side of the channel. Cloning attaches another receiver.
pub struct Receiver<T>(Arc<Shared<T>>);

impl<T: Clone> Receiver<T> {
    /// Wait for the message, resolving immediately if it was already sent.
    pub fn recv(self) -> Recv<T> {
        Recv(self)
    }

    /// Read the message if it has already been sent.
    pub fn try_recv(&self) -> Result<Option<T>, Error> {
        match &*self.0.state.lock() {
            State::Pending(_) => Ok(None),
            State::Sent(message) => Ok(Some(message.clone())),
            State::SenderDropped => Err(Error::SenderDropped),
        }
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        self.0.receiver_count.fetch_add(1, Ordering::AcqRel);
        Self(self.0.clone())
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.0.receiver_count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Future returned by `Receiver::recv`.
pub struct Recv<T>(Receiver<T>);

impl<T: Clone> Future for Recv<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut *self.0.0.state.lock() {
            State::Pending(wakers) => {
                if !wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
            State::Sent(message) => Poll::Ready(Ok(message.clone())),
            State::SenderDropped => Poll::Ready(Err(Error::SenderDropped)),
        }
    }
}

/// Create a new channel with one attached receiver.
pub fn oneshot<T: Clone>() -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::Pending(Vec::new())),
        receiver_count: AtomicUsize::new(1),
    });
    (Sender(shared.clone()), Receiver(shared))
}
