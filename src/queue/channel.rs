//! In-process message source over a Tokio channel.

use tokio::sync::mpsc;

use crate::queue::{Delivery, MessageSource, QueueError};

/// Sending half paired with a [`ChannelSource`]. Errors sent through it are
/// surfaced by the source as if the broker had reported them.
pub type ChannelSender = mpsc::Sender<Result<Delivery, QueueError>>;

/// Create a bounded in-process source.
pub fn channel(capacity: usize) -> (ChannelSender, ChannelSource) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, ChannelSource { rx })
}

/// Message source fed by a [`ChannelSender`]; closed once every sender is dropped.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<Result<Delivery, QueueError>>,
}

impl MessageSource for ChannelSource {
    async fn recv(&mut self) -> Result<Option<Delivery>, QueueError> {
        self.rx.recv().await.transpose()
    }
}
