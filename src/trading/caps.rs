//! Discovered position caps, keyed by (instrument, leverage).
//!
//! When the exchange rejects an order for exceeding the maximum position
//! amount, the submitter records the cap it parsed out of the rejection
//! here. Later sizing consults the cache and never proposes more than the
//! recorded cap for the same instrument and leverage. Entries live for the
//! process lifetime; a repeat rejection overwrites (last write wins).

use std::collections::HashMap;

use tokio::sync::RwLock;

/// Process-wide cache of maximum tradable contract counts.
///
/// Shared as an `Arc<CapCache>` between the size planner and the order
/// submitter.
#[derive(Debug, Default)]
pub struct CapCache {
    inner: RwLock<HashMap<(String, u32), u64>>,
}

impl CapCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached cap for this instrument at this leverage, if one has been
    /// discovered.
    pub async fn get(&self, inst_id: &str, leverage: u32) -> Option<u64> {
        self.inner
            .read()
            .await
            .get(&(inst_id.to_string(), leverage))
            .copied()
    }

    /// Record a discovered cap. A zero cap is ignored; it would block all
    /// sizing for the pair and cannot be a real exchange limit.
    pub async fn update(&self, inst_id: &str, leverage: u32, cap: u64) {
        if cap == 0 {
            return;
        }
        self.inner
            .write()
            .await
            .insert((inst_id.to_string(), leverage), cap);
    }
}
