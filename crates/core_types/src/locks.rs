//! Per-key exclusive sections with a bounded wait.
//!
//! Unrelated keys never contend: each key gets its own mutex, created on
//! first use and dropped again once nobody holds or waits on it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("exclusive section for '{key}' not acquired within {waited_ms} ms")]
pub struct LockTimeout {
    pub key: String,
    pub waited_ms: u64,
}

#[derive(Debug, Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the section for `key`.
    ///
    /// Fails with [`LockTimeout`] if the section is not free within `timeout`;
    /// `f` is not called in that case.
    pub fn with_key<R>(
        &self,
        key: &str,
        timeout: Duration,
        f: impl FnOnce() -> R,
    ) -> Result<R, LockTimeout> {
        let slot = {
            let mut slots = self.slots.lock();
            slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let result = match slot.try_lock_for(timeout) {
            Some(_guard) => Ok(f()),
            None => Err(LockTimeout {
                key: key.to_string(),
                waited_ms: timeout.as_millis() as u64,
            }),
        };

        self.release(key, &slot);
        result
    }

    /// Number of keys with a live section (held or awaited).
    pub fn active_keys(&self) -> usize {
        self.slots.lock().len()
    }

    fn release(&self, key: &str, slot: &Arc<Mutex<()>>) {
        let mut slots = self.slots.lock();
        // One reference in the map plus ours: nobody else is waiting.
        let idle = slots
            .get(key)
            .map(|current| Arc::ptr_eq(current, slot) && Arc::strong_count(slot) == 2)
            .unwrap_or(false);
        if idle {
            slots.remove(key);
        }
    }
}
