use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Concurrent session-keyed map shared between tasks.
///
/// Cloning a `SessionCache` yields another handle to the same map.
pub struct SessionCache<T> {
    inner: Arc<RwLock<HashMap<String, T>>>,
}

impl<T> Clone for SessionCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for SessionCache<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<T: Clone> SessionCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value`, returning the entry it replaced.
    pub async fn add(&self, session_id: impl Into<String>, value: T) -> Option<T> {
        self.inner.write().await.insert(session_id.into(), value)
    }

    pub async fn get(&self, session_id: &str) -> Option<T> {
        self.inner.read().await.get(session_id).cloned()
    }

    /// Return the existing entry or insert the one built by `make`.
    /// The check and the insert happen under a single write lock.
    pub async fn get_or_insert_with(&self, session_id: &str, make: impl FnOnce() -> T) -> T {
        let mut map = self.inner.write().await;
        map.entry(session_id.to_string()).or_insert_with(make).clone()
    }

    pub async fn remove(&self, session_id: &str) -> Option<T> {
        self.inner.write().await.remove(session_id)
    }

    /// Remove the entry only if `pred` holds for it.
    pub async fn remove_if(&self, session_id: &str, pred: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut map = self.inner.write().await;
        match map.get(session_id) {
            Some(v) if pred(v) => map.remove(session_id),
            _ => None,
        }
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.inner.read().await.contains_key(session_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }
}
