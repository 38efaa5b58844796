use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};

use crate::domain::BotKey;

use super::runner::Runner;

/// Concurrent map from bot key to its runner.
///
/// Every mutation is a single atomic map operation (insert-if-absent,
/// remove-if-present), so at most one runner per key can ever be owned.
#[derive(Default)]
pub struct FleetRegistry {
    runners: DashMap<BotKey, Arc<Runner>>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `runner` under its key unless one is already present.
    ///
    /// Returns `true` when this caller won the slot and may start the runner.
    pub fn try_insert(&self, runner: Arc<Runner>) -> bool {
        match self.runners.entry(runner.key().clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(runner);
                true
            }
        }
    }

    /// Remove and return the runner for `key`, if any.
    pub fn remove(&self, key: &BotKey) -> Option<Arc<Runner>> {
        self.runners.remove(key).map(|(_, runner)| runner)
    }

    /// Remove the entry only if it still holds this exact runner instance.
    pub fn remove_if_same(&self, runner: &Arc<Runner>) -> bool {
        self.runners
            .remove_if(runner.key(), |_, current| Arc::ptr_eq(current, runner))
            .is_some()
    }

    pub fn get(&self, key: &BotKey) -> Option<Arc<Runner>> {
        self.runners.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, key: &BotKey) -> bool {
        self.runners.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    /// Sorted list of registered keys.
    pub fn keys(&self) -> Vec<BotKey> {
        let mut keys: Vec<BotKey> = self.runners.iter().map(|e| e.key().clone()).collect();
        keys.sort_unstable();
        keys
    }

    /// Remove every entry and hand the runners to the caller.
    pub fn drain(&self) -> Vec<Arc<Runner>> {
        self.keys()
            .into_iter()
            .filter_map(|key| self.remove(&key))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BotDescriptor, UserId};
    use crate::fleet::runner::RunnerDeps;
    use crate::fleet::testing::{FakeFactory, RecordingHandler};

    fn runner(id: &str) -> Arc<Runner> {
        let deps = RunnerDeps::new(
            Arc::new(FakeFactory::default()),
            Arc::new(RecordingHandler::default()),
        );
        Arc::new(Runner::new(
            BotDescriptor::mirror(id, UserId(1), "t"),
            deps,
        ))
    }

    #[test]
    fn second_insert_for_same_key_loses() {
        let registry = FleetRegistry::new();
        let first = runner("a");
        assert!(registry.try_insert(Arc::clone(&first)));
        assert!(!registry.try_insert(runner("a")));
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.get(&BotKey::mirror("a")).unwrap(), &first));
    }

    #[test]
    fn remove_if_same_ignores_replaced_entries() {
        let registry = FleetRegistry::new();
        let stale = runner("a");
        let fresh = runner("a");
        assert!(registry.try_insert(Arc::clone(&stale)));
        assert!(registry.remove(&BotKey::mirror("a")).is_some());
        assert!(registry.try_insert(Arc::clone(&fresh)));

        assert!(!registry.remove_if_same(&stale));
        assert!(registry.contains(&BotKey::mirror("a")));
        assert!(registry.remove_if_same(&fresh));
        assert!(registry.is_empty());
    }

    #[test]
    fn keys_are_sorted_and_drain_empties() {
        let registry = FleetRegistry::new();
        registry.try_insert(runner("b"));
        registry.try_insert(runner("a"));
        assert_eq!(
            registry.keys(),
            vec![BotKey::mirror("a"), BotKey::mirror("b")]
        );
        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_inserts_admit_exactly_one() {
        let registry = Arc::new(FleetRegistry::new());
        let winners: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let registry = Arc::clone(&registry);
                    s.spawn(move || registry.try_insert(runner("x")) as usize)
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(winners, 1);
    }
}
