use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{CapturedExchange, NetworkLog};

/// In-memory capture log.
///
/// Writers append through [`MemoryNetworkLog::record`] while the pipeline
/// reads, so a live capture bridge can keep feeding it during a download.
#[derive(Debug, Default)]
pub struct MemoryNetworkLog {
    entries: RwLock<Vec<Arc<CapturedExchange>>>,
}

impl MemoryNetworkLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_exchanges(exchanges: impl IntoIterator<Item = CapturedExchange>) -> Self {
        let log = Self::new();
        for exchange in exchanges {
            log.record(exchange);
        }
        log
    }

    pub fn record(&self, exchange: CapturedExchange) {
        self.entries.write().push(Arc::new(exchange));
    }

    /// Drops everything observed so far, e.g. before navigating to the next unit.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl NetworkLog for MemoryNetworkLog {
    fn exchanges(&self) -> Vec<Arc<CapturedExchange>> {
        self.entries.read().clone()
    }
}
