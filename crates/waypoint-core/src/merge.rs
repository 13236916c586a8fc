//! Deterministic state merging.
//!
//! `merge` folds a delta namespace into a base namespace: nested objects are
//! merged recursively, every other value in the delta replaces the base value
//! (arrays included). The log is append-only concatenation.

use serde_json::{Map, Value};

use crate::types::{Delta, Namespace, SharedState};

/// Deep-merge `delta` into `base`, returning a new map. Neither input is modified.
pub fn merge(base: &Map<String, Value>, delta: &Map<String, Value>) -> Map<String, Value> {
    let mut out = base.clone();
    for (key, incoming) in delta {
        let merged = match (out.get(key), incoming) {
            (Some(Value::Object(existing)), Value::Object(update)) => {
                Value::Object(merge(existing, update))
            }
            _ => incoming.clone(),
        };
        out.insert(key.clone(), merged);
    }
    out
}

/// Apply a step's delta to a state, producing the next state.
pub fn apply(state: &SharedState, delta: &Delta) -> SharedState {
    SharedState {
        context: merge_namespace(&state.context, &delta.context),
        artifacts: merge_namespace(&state.artifacts, &delta.artifacts),
        quality: merge_namespace(&state.quality, &delta.quality),
        log: state.log.iter().chain(delta.log.iter()).cloned().collect(),
    }
}

/// Combine two deltas in order, with the same rules `apply` uses.
pub fn combine(first: &Delta, later: &Delta) -> Delta {
    Delta {
        context: merge_namespace(&first.context, &later.context),
        artifacts: merge_namespace(&first.artifacts, &later.artifacts),
        quality: merge_namespace(&first.quality, &later.quality),
        log: first.log.iter().chain(later.log.iter()).cloned().collect(),
    }
}

/// Fold a sequence of deltas into a state in order.
pub fn fold<'a>(state: &SharedState, deltas: impl IntoIterator<Item = &'a Delta>) -> SharedState {
    deltas
        .into_iter()
        .fold(state.clone(), |acc, delta| apply(&acc, delta))
}

fn merge_namespace(base: &Namespace, delta: &Namespace) -> Namespace {
    if delta.is_empty() {
        return base.clone();
    }
    merge(base, delta)
}
