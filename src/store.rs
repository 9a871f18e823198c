/// Durable single-key storage for the tab → room mapping
///
/// Every popup instance reads and writes the same key. Writers always go
/// through [`RoomStore::update`] so the new value is derived from the value
/// read right before the write, never from a cached copy.

use crate::error::StoreError;
use futures::channel::mpsc;
use std::cell::RefCell;
use std::rc::Rc;

/// Storage key holding the serialized mapping
pub const ROOMS_KEY: &str = "rooms";

/// Stream of stored values, one item per write (`None` when the key was removed)
pub type Subscription = mpsc::UnboundedReceiver<Option<String>>;

/// Which `chrome.storage` area holds the mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageArea {
    #[default]
    Local,
    Sync,
    Session,
}

impl StorageArea {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageArea::Local => "local",
            StorageArea::Sync => "sync",
            StorageArea::Session => "session",
        }
    }
}

/// Where the mapping is persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub area: StorageArea,
    pub key: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            area: StorageArea::default(),
            key: ROOMS_KEY.to_string(),
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait RoomStore {
    async fn read(&self) -> Result<Option<String>, StoreError>;

    async fn write(&self, raw: String) -> Result<(), StoreError>;

    /// Receive every value written by any instance from now on
    fn subscribe(&self) -> Subscription;

    /// Read the current value, apply `f` and write the result back.
    ///
    /// The default is a plain read followed by a write; another writer can
    /// still slip in between the two. Stores with a single writer override
    /// this to make it atomic.
    async fn update<F>(&self, f: F) -> Result<String, StoreError>
    where
        F: FnOnce(Option<&str>) -> String,
    {
        let current = self.read().await?;
        let next = f(current.as_deref());
        self.write(next.clone()).await?;
        Ok(next)
    }
}

#[derive(Default)]
struct MemoryInner {
    value: Option<String>,
    subscribers: Vec<mpsc::UnboundedSender<Option<String>>>,
}

impl MemoryInner {
    fn publish(&mut self, value: Option<String>) {
        self.value = value.clone();
        self.subscribers
            .retain(|tx| tx.unbounded_send(value.clone()).is_ok());
    }
}

/// In-process store: one owner of the value, every clone is a handle to it.
///
/// `update` runs the whole read-modify-write without yielding, so two
/// handles can never lose each other's entries.
#[derive(Clone, Default)]
pub struct MemoryRoomStore {
    inner: Rc<RefCell<MemoryInner>>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(raw: impl Into<String>) -> Self {
        let store = Self::new();
        store.inner.borrow_mut().value = Some(raw.into());
        store
    }

    /// Current value without going through the async interface
    pub fn snapshot(&self) -> Option<String> {
        self.inner.borrow().value.clone()
    }
}

impl RoomStore for MemoryRoomStore {
    async fn read(&self) -> Result<Option<String>, StoreError> {
        Ok(self.snapshot())
    }

    async fn write(&self, raw: String) -> Result<(), StoreError> {
        self.inner.borrow_mut().publish(Some(raw));
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded();
        self.inner.borrow_mut().subscribers.push(tx);
        rx
    }

    async fn update<F>(&self, f: F) -> Result<String, StoreError>
    where
        F: FnOnce(Option<&str>) -> String,
    {
        let mut inner = self.inner.borrow_mut();
        let next = f(inner.value.as_deref());
        inner.publish(Some(next.clone()));
        Ok(next)
    }
}

#[cfg(target_arch = "wasm32")]
pub use chrome::ChromeRoomStore;

#[cfg(target_arch = "wasm32")]
mod chrome {
    use super::*;
    use crate::bridge;
    use wasm_bindgen::prelude::*;

    /// `chrome.storage` backed store, shared with every other extension page
    #[derive(Clone, Default)]
    pub struct ChromeRoomStore {
        config: StoreConfig,
    }

    impl ChromeRoomStore {
        pub fn new(config: StoreConfig) -> Self {
            ChromeRoomStore { config }
        }
    }

    impl RoomStore for ChromeRoomStore {
        async fn read(&self) -> Result<Option<String>, StoreError> {
            let value = bridge::getStorage(self.config.area.as_str(), &self.config.key)
                .await
                .map_err(|e| StoreError::Bridge(format!("{:?}", e)))?;
            Ok(value.as_string())
        }

        async fn write(&self, raw: String) -> Result<(), StoreError> {
            bridge::setStorage(
                self.config.area.as_str(),
                &self.config.key,
                JsValue::from_str(&raw),
            )
            .await
            .map_err(|e| StoreError::Bridge(format!("{:?}", e)))
        }

        fn subscribe(&self) -> Subscription {
            let (tx, rx) = mpsc::unbounded();
            let listener = Closure::wrap(Box::new(move |value: JsValue| {
                let _ = tx.unbounded_send(value.as_string());
            }) as Box<dyn Fn(JsValue)>);

            bridge::onStorageChanged(
                self.config.area.as_str(),
                &self.config.key,
                listener.as_ref().unchecked_ref(),
            );
            // The listener lives as long as the popup page
            listener.forget();
            rx
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::StreamExt;

    #[test]
    fn test_store_config_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.area, StorageArea::Local);
        assert_eq!(config.area.as_str(), "local");
        assert_eq!(config.key, "rooms");
    }

    #[test]
    fn test_read_absent() {
        let store = MemoryRoomStore::new();
        assert_eq!(block_on(store.read()), Ok(None));
    }

    #[test]
    fn test_write_then_read() {
        let store = MemoryRoomStore::new();
        block_on(store.write("{}".to_string())).unwrap();
        assert_eq!(block_on(store.read()), Ok(Some("{}".to_string())));
    }

    #[test]
    fn test_clones_share_value() {
        let a = MemoryRoomStore::new();
        let b = a.clone();

        block_on(a.write(r#"{"7":"QX7K2"}"#.to_string())).unwrap();

        assert_eq!(b.snapshot(), Some(r#"{"7":"QX7K2"}"#.to_string()));
    }

    #[test]
    fn test_subscribers_receive_writes() {
        let store = MemoryRoomStore::new();
        let mut first = store.subscribe();
        let mut second = store.clone().subscribe();

        block_on(store.write("one".to_string())).unwrap();
        store.inner.borrow_mut().publish(None);

        assert_eq!(block_on(first.next()), Some(Some("one".to_string())));
        assert_eq!(block_on(first.next()), Some(None));
        assert_eq!(block_on(second.next()), Some(Some("one".to_string())));
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let store = MemoryRoomStore::new();
        let kept = store.subscribe();
        drop(store.subscribe());

        assert_eq!(store.inner.borrow().subscribers.len(), 2);
        block_on(store.write("x".to_string())).unwrap();
        assert_eq!(store.inner.borrow().subscribers.len(), 1);
        drop(kept);
    }

    #[test]
    fn test_update_uses_current_value() {
        let store = MemoryRoomStore::with_value("a");
        let other = store.clone();

        block_on(other.write("b".to_string())).unwrap();
        let next = block_on(store.update(|current| format!("{}c", current.unwrap_or("")))).unwrap();

        assert_eq!(next, "bc");
        assert_eq!(store.snapshot(), Some("bc".to_string()));
    }

    #[test]
    fn test_update_notifies_subscribers() {
        let store = MemoryRoomStore::new();
        let mut updates = store.subscribe();

        block_on(store.update(|_| "new".to_string())).unwrap();

        assert_eq!(block_on(updates.next()), Some(Some("new".to_string())));
    }
}
