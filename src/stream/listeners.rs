use std::sync::Mutex;

use log::debug;
use tokio::sync::mpsc;

use crate::utils::lock_unpoisoned;

use super::PriceUpdate;

/// Fan-out of price updates. Each consumer gets its own unbounded channel;
/// consumers that dropped their receiver are pruned on the next publish.
#[derive(Default)]
pub struct PriceListeners {
    senders: Mutex<Vec<mpsc::UnboundedSender<PriceUpdate>>>,
}

impl PriceListeners {
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PriceUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock_unpoisoned(&self.senders).push(tx);
        rx
    }

    /// Deliver `update` to every live consumer; returns how many received it.
    pub fn publish(&self, update: &PriceUpdate) -> usize {
        let mut senders = lock_unpoisoned(&self.senders);
        let before = senders.len();
        senders.retain(|tx| tx.send(update.clone()).is_ok());
        if senders.len() < before {
            debug!("Pruned {} closed price listener(s)", before - senders.len());
        }
        senders.len()
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.senders).len()
    }
}
