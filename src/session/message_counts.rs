use crate::message::Message;

/// Running totals of messages exchanged over one session. UPDATE
/// traffic is tallied on its own so route activity can be reported
/// apart from the keepalive chatter.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessageCounts {
    received: u64,
    sent: u64,
    updates_received: u64,
    updates_sent: u64,
}

impl MessageCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tally_received(&mut self, message: &Message) {
        self.received += 1;
        if matches!(message, Message::Update(_)) {
            self.updates_received += 1;
        }
    }

    pub fn tally_sent(&mut self, message: &Message) {
        self.sent += 1;
        if matches!(message, Message::Update(_)) {
            self.updates_sent += 1;
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn updates_received(&self) -> u64 {
        self.updates_received
    }

    pub fn updates_sent(&self) -> u64 {
        self.updates_sent
    }
}
