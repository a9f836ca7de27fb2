//! The subscriber-facing side of a session.
//!
//! A [`Publication`] is whatever transports events to one subscriber. The
//! engine calls it from the session task, never concurrently for the same
//! session.

use reagg_core::{Document, DocumentId, Error};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Event sink of one subscriber.
pub trait Publication: Send + Sync {
    /// A document entered the result.
    fn added(&self, collection: &str, id: &DocumentId, document: Document);

    /// A document is still in the result; `document` is its full new body.
    fn changed(&self, collection: &str, id: &DocumentId, document: Document);

    /// A document left the result.
    fn removed(&self, collection: &str, id: &DocumentId);

    /// The initial result has been published. Called once per session.
    fn ready(&self);

    /// The session failed and has been torn down.
    fn error(&self, _error: &Error) {}
}

/// An event recorded by [`ChannelPublication`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublicationEvent {
    Added {
        collection: String,
        id: DocumentId,
        document: Document,
    },
    Changed {
        collection: String,
        id: DocumentId,
        document: Document,
    },
    Removed {
        collection: String,
        id: DocumentId,
    },
    Ready,
    Error(Error),
}

/// Publication that forwards every event into an unbounded channel.
///
/// Useful for embedding the engine behind an async transport and for tests.
///
/// ```
/// use reagg_reactive::{ChannelPublication, Publication, PublicationEvent};
///
/// let (publication, mut events) = ChannelPublication::new();
/// publication.ready();
/// assert_eq!(events.try_recv().unwrap(), PublicationEvent::Ready);
/// ```
#[derive(Clone, Debug)]
pub struct ChannelPublication {
    tx: UnboundedSender<PublicationEvent>,
}

impl ChannelPublication {
    /// Creates the publication and the receiving end of its events.
    pub fn new() -> (Self, UnboundedReceiver<PublicationEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: PublicationEvent) {
        // The subscriber went away; nothing left to deliver to.
        let _ = self.tx.send(event);
    }
}

impl Publication for ChannelPublication {
    fn added(&self, collection: &str, id: &DocumentId, document: Document) {
        self.send(PublicationEvent::Added {
            collection: collection.to_string(),
            id: id.clone(),
            document,
        });
    }

    fn changed(&self, collection: &str, id: &DocumentId, document: Document) {
        self.send(PublicationEvent::Changed {
            collection: collection.to_string(),
            id: id.clone(),
            document,
        });
    }

    fn removed(&self, collection: &str, id: &DocumentId) {
        self.send(PublicationEvent::Removed {
            collection: collection.to_string(),
            id: id.clone(),
        });
    }

    fn ready(&self) {
        self.send(PublicationEvent::Ready);
    }

    fn error(&self, error: &Error) {
        self.send(PublicationEvent::Error(error.clone()));
    }
}
