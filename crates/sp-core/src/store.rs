use std::collections::BTreeMap;

use crate::error::ScriptPlayError;
use crate::ids::PropertyId;
use crate::value::Value;

/// Typed key-value bag the player reads and writes by id. The player assumes
/// exclusive, non-reentrant access for the duration of any single call.
pub trait PropertyStore {
    /// Whether the id belongs to the store's structure (initialized or not).
    fn contains(&self, id: PropertyId) -> bool;
    /// Current value, `None` while uninitialized.
    fn get(&self, id: PropertyId) -> Option<Value>;
    fn set(&mut self, id: PropertyId, value: Value) -> Result<(), ScriptPlayError>;
    /// Drop all values, keeping the structure.
    fn reset(&mut self);
    /// Recognized ids, used to enumerate values for snapshots.
    fn property_ids(&self) -> Vec<PropertyId>;
}

/// Default in-memory store over a fixed set of recognized ids.
#[derive(Debug, Default)]
pub struct MemoryPropertyStore {
    recognized: Vec<PropertyId>,
    values: BTreeMap<PropertyId, Value>,
}

impl MemoryPropertyStore {
    pub fn new(recognized: impl IntoIterator<Item = PropertyId>) -> Self {
        let mut ids: Vec<PropertyId> = recognized.into_iter().collect();
        ids.sort();
        ids.dedup();
        Self {
            recognized: ids,
            values: BTreeMap::new(),
        }
    }
}

impl PropertyStore for MemoryPropertyStore {
    fn contains(&self, id: PropertyId) -> bool {
        self.recognized.binary_search(&id).is_ok()
    }

    fn get(&self, id: PropertyId) -> Option<Value> {
        self.values.get(&id).cloned()
    }

    fn set(&mut self, id: PropertyId, value: Value) -> Result<(), ScriptPlayError> {
        if !self.contains(id) {
            return Err(ScriptPlayError::new(
                "PLAYER_PROPERTY_NOT_FOUND",
                format!("Property not found: {}", id),
            ));
        }
        self.values.insert(id, value);
        Ok(())
    }

    fn reset(&mut self) {
        self.values.clear();
    }

    fn property_ids(&self) -> Vec<PropertyId> {
        self.recognized.clone()
    }
}
