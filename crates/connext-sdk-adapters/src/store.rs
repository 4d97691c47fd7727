use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use connext_sdk_core::{KeyValueStore, PortError};

/// Process-local store. Clones share the same map, which is how tests
/// simulate a page reload: a fresh controller over a clone of the store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, String>>>,
    write_failure: Arc<Mutex<Option<String>>>,
}

impl MemoryStore {
    pub fn raw(&self, key: &str) -> Option<String> {
        self.inner.lock().ok().and_then(|g| g.get(key).cloned())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes writes and removals fail until cleared with `None`.
    pub fn fail_writes(&self, message: Option<&str>) {
        if let Ok(mut g) = self.write_failure.lock() {
            *g = message.map(str::to_owned);
        }
    }

    fn check_writes(&self) -> Result<(), PortError> {
        match self.write_failure.lock().ok().and_then(|g| g.clone()) {
            Some(message) => Err(PortError::Storage(message)),
            None => Ok(()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, PortError> {
        self.inner
            .lock()
            .map_err(|e| PortError::Storage(format!("memory store lock poisoned: {e}")))
    }
}

#[async_trait(?Send)]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PortError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PortError> {
        self.check_writes()?;
        self.lock()?.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PortError> {
        self.check_writes()?;
        self.lock()?.remove(key);
        Ok(())
    }
}

/// `window.localStorage`, which survives page reloads.
#[cfg(target_arch = "wasm32")]
#[derive(Debug, Clone, Default)]
pub struct LocalStorageStore;

#[cfg(target_arch = "wasm32")]
impl LocalStorageStore {
    fn storage(&self) -> Result<web_sys::Storage, PortError> {
        web_sys::window()
            .ok_or_else(|| PortError::Storage("missing window".to_owned()))?
            .local_storage()
            .map_err(|e| PortError::Storage(format!("localStorage access denied: {e:?}")))?
            .ok_or_else(|| PortError::Storage("localStorage unavailable".to_owned()))
    }
}

#[cfg(target_arch = "wasm32")]
#[async_trait(?Send)]
impl KeyValueStore for LocalStorageStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PortError> {
        self.storage()?
            .get_item(key)
            .map_err(|e| PortError::Storage(format!("localStorage read {key} failed: {e:?}")))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PortError> {
        self.storage()?
            .set_item(key, value)
            .map_err(|e| PortError::Storage(format!("localStorage write {key} failed: {e:?}")))
    }

    async fn remove(&self, key: &str) -> Result<(), PortError> {
        self.storage()?
            .remove_item(key)
            .map_err(|e| PortError::Storage(format!("localStorage remove {key} failed: {e:?}")))
    }
}
