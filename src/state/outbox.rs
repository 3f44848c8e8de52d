use crate::{dto::ws::OutboundMessage, state::ConnectionId};

/// Side effect requested by the session logic, executed by the transport afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Push `message` to `connection`.
    Message {
        /// Recipient.
        connection: ConnectionId,
        /// Payload to serialize.
        message: OutboundMessage,
    },
    /// Close `connection` from the server side.
    Close {
        /// Connection to close.
        connection: ConnectionId,
    },
}

/// Ordered list of deliveries produced while handling one inbound event.
#[derive(Debug, Default)]
pub struct Outbox {
    deliveries: Vec<Delivery>,
}

impl Outbox {
    /// Empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `message` for `connection`.
    pub fn send(&mut self, connection: ConnectionId, message: OutboundMessage) {
        self.deliveries.push(Delivery::Message {
            connection,
            message,
        });
    }

    /// Queue the same `message` for every connection in `connections`.
    pub fn send_all<I>(&mut self, connections: I, message: &OutboundMessage)
    where
        I: IntoIterator<Item = ConnectionId>,
    {
        for connection in connections {
            self.send(connection, message.clone());
        }
    }

    /// Queue a server-side close of `connection`.
    pub fn close(&mut self, connection: ConnectionId) {
        self.deliveries.push(Delivery::Close { connection });
    }

    /// Deliveries queued so far.
    pub fn deliveries(&self) -> &[Delivery] {
        &self.deliveries
    }

    /// Consume the outbox.
    pub fn into_deliveries(self) -> Vec<Delivery> {
        self.deliveries
    }

    /// Messages queued for `connection`, in order.
    pub fn messages_for(&self, connection: ConnectionId) -> impl Iterator<Item = &OutboundMessage> {
        self.deliveries.iter().filter_map(move |delivery| match delivery {
            Delivery::Message {
                connection: target,
                message,
            } if *target == connection => Some(message),
            _ => None,
        })
    }

    /// Whether a close was queued for `connection`.
    pub fn closes(&self, connection: ConnectionId) -> bool {
        self.deliveries.iter().any(
            |delivery| matches!(delivery, Delivery::Close { connection: target } if *target == connection),
        )
    }
}
