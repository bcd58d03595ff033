//! Hook registration table.
//!
//! Built once during the handshake from the caller's hook table. Every
//! callback gets an id `hook_{n}` from a monotonically increasing counter;
//! ids are unique within the session and never change afterward.

use std::collections::{BTreeMap, HashMap};

use serde_json::{json, Map, Value};

use crate::models::hook::{HookCallback, HookEvent, HookMatcher};

/// Immutable map from generated callback id to callback.
#[derive(Clone, Default)]
pub struct HookRegistry {
    callbacks: HashMap<String, HookCallback>,
    config: Option<Value>,
}

impl HookRegistry {
    /// Assign ids to every callback in `hooks` and build the handshake
    /// hook configuration.
    #[must_use]
    pub fn build(hooks: &BTreeMap<HookEvent, Vec<HookMatcher>>) -> Self {
        let mut callbacks = HashMap::new();
        let mut config = Map::new();
        let mut next_id: u64 = 1;

        for (event, matchers) in hooks {
            if matchers.is_empty() {
                continue;
            }
            let mut entries = Vec::with_capacity(matchers.len());
            for matcher in matchers {
                let mut ids = Vec::with_capacity(matcher.hooks.len());
                for hook in &matcher.hooks {
                    let id = format!("hook_{next_id}");
                    next_id += 1;
                    callbacks.insert(id.clone(), hook.clone());
                    ids.push(id);
                }
                let mut entry = json!({
                    "matcher": matcher.matcher,
                    "hookCallbackIds": ids,
                });
                if let Some(timeout) = matcher.timeout {
                    entry["timeout"] = json!(timeout);
                }
                entries.push(entry);
            }
            config.insert(event.as_str().to_owned(), Value::Array(entries));
        }

        Self {
            callbacks,
            config: if config.is_empty() {
                None
            } else {
                Some(Value::Object(config))
            },
        }
    }

    /// Look up a callback by its generated id.
    #[must_use]
    pub fn get(&self, callback_id: &str) -> Option<&HookCallback> {
        self.callbacks.get(callback_id)
    }

    /// Hook table for the `initialize` request, `None` when empty.
    #[must_use]
    pub fn initialize_config(&self) -> Option<Value> {
        self.config.clone()
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Whether no callbacks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.callbacks.keys().collect();
        ids.sort();
        f.debug_struct("HookRegistry")
            .field("callback_ids", &ids)
            .finish()
    }
}
