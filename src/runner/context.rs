use serde_json::{Map, Value};

/// Parameter and defaults state threaded through execution. Copied on
/// descent into each test set and test; only `params` is mutated, by task
/// `set` phases, and only on the task-list coordinator.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub params: Map<String, Value>,
    pub defaults: Map<String, Value>,
}

impl RunContext {
    /// Derives the context for a nested scope by deep-merging the entity's
    /// own defaults and params over this one.
    pub fn child(&self, defaults: &Map<String, Value>, params: &Map<String, Value>) -> Self {
        Self {
            params: deep_merge_maps(&self.params, params),
            defaults: deep_merge_maps(&self.defaults, defaults),
        }
    }

    /// Snapshot of `params` as a value, for interpolation.
    pub fn params_value(&self) -> Value {
        Value::Object(self.params.clone())
    }
}

/// Right-biased deep merge: mappings merge recursively, sequences
/// concatenate, scalars take the overlay.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            Value::Object(deep_merge_maps(&base, &overlay))
        }
        (Value::Array(mut base), Value::Array(overlay)) => {
            base.extend(overlay);
            Value::Array(base)
        }
        (_, overlay) => overlay,
    }
}

pub fn deep_merge_maps(
    base: &Map<String, Value>,
    overlay: &Map<String, Value>,
) -> Map<String, Value> {
    let mut merged = base.clone();
    for (key, value) in overlay {
        match merged.remove(key) {
            Some(existing) => {
                merged.insert(key.clone(), deep_merge(existing, value.clone()));
            }
            None => {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}

#[cfg(test)]
#[path = "../tests/context_tests.rs"]
mod tests;
