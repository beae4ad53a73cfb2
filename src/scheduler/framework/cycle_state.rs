use std::{
    any::Any,
    collections::{HashMap, HashSet},
    sync::{Arc, RwLock},
};

/// Keys under this prefix are reserved for the framework itself; plugins
/// must not write them.
pub const RESERVED_STATE_KEY_PREFIX: &str = "scheduler.fleet.io/";

/// Reserved key holding the cycle's wall-clock start, in epoch milliseconds,
/// stored as a `u64`. Plugins that evaluate time-dependent predicates read
/// this instead of sampling the clock themselves so that one cycle observes
/// one instant.
pub const STATE_KEY_CYCLE_START_MS: &str = "scheduler.fleet.io/cycle-start-ms";

/// Per-cycle scratchpad shared between the framework and its plugins.
///
/// Filter plugins run in parallel over the cluster population, so the value
/// map is guarded for concurrent access. Values are opaque to the framework;
/// a plugin downcasts what it previously stored. The state lives for exactly
/// one scheduling cycle and is never shared across cycles.
pub struct CycleState {
    values: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    skipped_filter_plugins: RwLock<HashSet<String>>,
}

impl Default for CycleState {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleState {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            skipped_filter_plugins: RwLock::new(HashSet::new()),
        }
    }

    pub fn read(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.values.read().unwrap().get(key).cloned()
    }

    pub fn write(&self, key: impl Into<String>, value: Arc<dyn Any + Send + Sync>) {
        self.values.write().unwrap().insert(key.into(), value);
    }

    pub fn delete(&self, key: &str) {
        self.values.write().unwrap().remove(key);
    }

    /// Record that a pre-filter plugin opted its filter out of this cycle.
    pub fn skip_filter_plugin(&self, plugin_name: impl Into<String>) {
        self.skipped_filter_plugins
            .write()
            .unwrap()
            .insert(plugin_name.into());
    }

    pub fn is_filter_plugin_skipped(&self, plugin_name: &str) -> bool {
        self.skipped_filter_plugins
            .read()
            .unwrap()
            .contains(plugin_name)
    }

    /// Convenience accessor for the reserved cycle-start key.
    pub fn cycle_start_ms(&self) -> Option<u64> {
        self.read(STATE_KEY_CYCLE_START_MS)
            .and_then(|v| v.downcast_ref::<u64>().copied())
    }
}
