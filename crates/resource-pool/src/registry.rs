//! Concurrency-safe registry of provisioned resources
//!
//! One `Registry` per resource kind, each behind its own `RwLock`, so container and network
//! bookkeeping never contend. Lookups take the read lock; inserts and drains take the write lock.
//! Callers only ever receive clones of the stored descriptors.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;

/// Descriptors of one resource kind, keyed by engine id.
pub struct Registry<D> {
    entries: RwLock<HashMap<String, D>>,
}

impl<D> Default for Registry<D> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<D: Clone> Registry<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fully populated descriptor. Returns the descriptor previously stored under
    /// `id`, if any.
    pub fn insert(&self, id: impl Into<String>, descriptor: D) -> Option<D> {
        self.entries.write().insert(id.into(), descriptor)
    }

    pub fn get(&self, id: &str) -> Option<D> {
        self.entries.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Swap the descriptor for an id that is already registered. Ids that are not registered
    /// are left alone and `false` is returned.
    pub fn replace(&self, id: &str, descriptor: D) -> bool {
        match self.entries.write().get_mut(id) {
            Some(slot) => {
                *slot = descriptor;
                true
            }
            None => false,
        }
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Remove every entry through `remove`, one at a time.
    ///
    /// An entry leaves the registry only after `remove` succeeds for it. The first failure stops
    /// the drain and is returned; the failing entry and everything not yet visited stay
    /// registered, so a later drain picks them up again. Entries inserted while the drain is
    /// running are drained too. The lock is never held across `remove`. Entries are visited in
    /// id order.
    ///
    /// # Examples
    ///
    /// ```
    /// use resource_pool::registry::Registry;
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let registry = Registry::new();
    /// registry.insert("b", "web");
    /// registry.insert("a", "db");
    ///
    /// let mut visited = Vec::new();
    /// let drained = registry
    ///     .drain_and_remove(|id, _| {
    ///         visited.push(id.clone());
    ///         async move {
    ///             if id == "b" {
    ///                 Err("still in use")
    ///             } else {
    ///                 Ok(())
    ///             }
    ///         }
    ///     })
    ///     .await;
    ///
    /// assert_eq!(drained, Err("still in use"));
    /// assert_eq!(visited, ["a", "b"]);
    /// // The failed entry stays for the next drain.
    /// assert_eq!(registry.ids(), ["b"]);
    /// # }
    /// ```
    pub async fn drain_and_remove<E, F, Fut>(&self, mut remove: F) -> Result<usize, E>
    where
        F: FnMut(String, D) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let mut removed = 0;
        loop {
            let next = self
                .entries
                .read()
                .iter()
                .min_by(|a, b| a.0.cmp(b.0))
                .map(|(id, d)| (id.clone(), d.clone()));
            let Some((id, descriptor)) = next else {
                return Ok(removed);
            };

            remove(id.clone(), descriptor).await?;
            self.entries.write().remove(&id);
            removed += 1;
        }
    }
}
