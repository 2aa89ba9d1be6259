//! Per-key async mutual exclusion.
//!
//! Work on the same key is serialized; different keys never contend beyond
//! the brief map lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dq_core::types::DbId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct KeyedMutex {
    slots: Mutex<HashMap<DbId, Arc<AsyncMutex<()>>>>,
}

impl KeyedMutex {
    /// Wait for exclusive access to `key`. Released when the guard drops.
    pub async fn lock(&self, key: DbId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            // Drop slots nobody holds or waits on.
            slots.retain(|k, m| *k == key || Arc::strong_count(m) > 1);
            Arc::clone(slots.entry(key).or_default())
        };
        slot.lock_owned().await
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
