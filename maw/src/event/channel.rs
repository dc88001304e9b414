use crossbeam::channel::{Receiver, Sender, bounded, unbounded};
use thiserror::Error;

pub struct EventConsumer<E>(Receiver<E>);

impl<E> From<Receiver<E>> for EventConsumer<E> {
    fn from(value: Receiver<E>) -> Self {
        Self(value)
    }
}

pub struct EventPublisher<E>(Sender<E>);

impl<E> From<Sender<E>> for EventPublisher<E> {
    fn from(value: Sender<E>) -> Self {
        Self(value)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum EventPublisherError {
    #[error("error while publishing event: {0}")]
    SendError(String),
}

#[derive(Debug, Error, PartialEq)]
#[error("all publishers are gone")]
pub struct Disconnected;

/// Unbounded channel, used for queues with many producers such as the supervisor events.
pub fn pub_sub<E>() -> (EventPublisher<E>, EventConsumer<E>) {
    let (s, r) = unbounded();
    (EventPublisher(s), EventConsumer(r))
}

/// Channel holding a single pending event. Used to deliver exactly one completion or reply.
pub fn oneshot<E>() -> (EventPublisher<E>, EventConsumer<E>) {
    let (s, r) = bounded(1);
    (EventPublisher(s), EventConsumer(r))
}

impl<E> EventPublisher<E> {
    pub fn publish(&self, event: E) -> Result<(), EventPublisherError> {
        self.0
            .send(event)
            .map_err(|err| EventPublisherError::SendError(err.to_string()))
    }
}

impl<E> Clone for EventPublisher<E> {
    fn clone(&self) -> Self {
        EventPublisher(self.0.clone())
    }
}

impl<E> EventConsumer<E> {
    /// Blocks until an event arrives or every publisher has been dropped.
    pub fn recv(&self) -> Result<E, Disconnected> {
        self.0.recv().map_err(|_| Disconnected)
    }
}

impl<E> Clone for EventConsumer<E> {
    fn clone(&self) -> Self {
        EventConsumer(self.0.clone())
    }
}

impl<E> AsRef<Receiver<E>> for EventConsumer<E> {
    fn as_ref(&self) -> &Receiver<E> {
        &self.0
    }
}
