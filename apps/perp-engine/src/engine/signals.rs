//! Signal sources polled by the control loop.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::models::Signal;

/// Supplies trade signals.
///
/// Strategy logic lives behind this trait; the engine only consumes its
/// output once per tick.
#[async_trait]
pub trait SignalSource: Send {
    /// Next signal given the latest `price`, if any.
    async fn next_signal(&mut self, price: Decimal) -> Option<Signal>;
}

/// Source that never signals. The engine then only manages positions and
/// handles operator commands.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleSignalSource;

#[async_trait]
impl SignalSource for IdleSignalSource {
    async fn next_signal(&mut self, _price: Decimal) -> Option<Signal> {
        None
    }
}

/// Source fed through a channel by an external producer.
#[derive(Debug)]
pub struct QueuedSignals {
    receiver: mpsc::Receiver<Signal>,
}

impl QueuedSignals {
    /// Create a source and the sender that feeds it.
    #[must_use]
    pub fn channel(buffer: usize) -> (mpsc::Sender<Signal>, Self) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (sender, Self { receiver })
    }
}

#[async_trait]
impl SignalSource for QueuedSignals {
    async fn next_signal(&mut self, _price: Decimal) -> Option<Signal> {
        self.receiver.try_recv().ok()
    }
}
