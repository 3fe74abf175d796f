use std::sync::Arc;

use huddle_store::LocalStore;
use huddle_types::{Message, Origin};

use crate::channel::{Ack, ChannelEvent, EventSink, Subscription};
use crate::error::Result;

/// Delivery with no remote party: messages are confirmed by writing them to
/// the device log and handed straight back to the local subscriber.
pub struct LocalOnlyChannel {
    store: Arc<LocalStore>,
    sink: Option<EventSink>,
}

impl LocalOnlyChannel {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store, sink: None }
    }

    pub fn send(&mut self, message: &Message) -> Result<Ack> {
        let confirmed = message.with_origin(Origin::LocalConfirmed);
        if !self.store.append(confirmed.clone()) {
            self.store
                .promote(&message.group_id, &message.id, Origin::LocalConfirmed);
        }

        if let Some(sink) = &self.sink {
            sink.emit(ChannelEvent::Batch(vec![confirmed]));
        }

        Ok(Ack {
            message_id: message.id.clone(),
            confirmed: true,
        })
    }

    pub fn subscribe(&mut self, sink: EventSink) -> Subscription {
        self.sink = Some(sink);
        Subscription::inert()
    }
}
