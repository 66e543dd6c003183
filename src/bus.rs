use crate::events::RawEvent;
use tokio::sync::mpsc;

/// Single-consumer queue between event sources and the dispatch task.
///
/// Any number of producers may publish; exactly one receiver drains the
/// queue, so downstream state is touched in delivery order.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<RawEvent>,
}

impl EventBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RawEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn publish(&self, event: RawEvent) -> Result<(), mpsc::error::SendError<RawEvent>> {
        self.tx.send(event)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
