use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Keys of requests that are currently outstanding. Holding an
/// [`InFlightGuard`] marks its key busy until the guard is dropped.
#[derive(Default, Clone)]
pub struct InFlight {
    keys: Arc<Mutex<HashSet<String>>>,
}

pub struct InFlightGuard {
    keys: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_key(user_id: &str) -> String {
        format!("create:{user_id}")
    }

    pub fn delete_key(user_id: &str, bookmark_id: &str) -> String {
        format!("delete:{user_id}:{bookmark_id}")
    }

    /// Returns `None` if `key` is already held.
    pub fn try_acquire(&self, key: String) -> Option<InFlightGuard> {
        let mut keys = match self.keys.lock() {
            Ok(keys) => keys,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !keys.insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            keys: self.keys.clone(),
            key,
        })
    }

    #[cfg(test)]
    pub fn is_busy(&self, key: &str) -> bool {
        match self.keys.lock() {
            Ok(keys) => keys.contains(key),
            Err(poisoned) => poisoned.into_inner().contains(key),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut keys = match self.keys.lock() {
            Ok(keys) => keys,
            Err(poisoned) => poisoned.into_inner(),
        };
        keys.remove(&self.key);
    }
}
