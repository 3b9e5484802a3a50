//! JSON merge-patch helpers (RFC 7396)
//!
//! `merge_patch_for` computes the smallest merge patch that makes an observed
//! object contain every field of a desired manifest. Fields the API server adds
//! on its own (defaults, resource versions, status) are not compared, so a
//! converged object yields `None`.

use serde_json::{Map, Value};

/// Returns true when every field set in `desired` has the same value in `actual`.
///
/// Arrays must have the same length and match element-wise, so server-side
/// defaults inside list elements (e.g. container `imagePullPolicy`) are tolerated.
pub fn contains(desired: &Value, actual: &Value) -> bool {
    match (desired, actual) {
        (Value::Object(d), Value::Object(a)) => d
            .iter()
            .all(|(k, dv)| contains(dv, a.get(k).unwrap_or(&Value::Null))),
        (Value::Array(d), Value::Array(a)) => {
            d.len() == a.len() && d.iter().zip(a).all(|(dv, av)| contains(dv, av))
        }
        (d, a) => d == a,
    }
}

/// Minimal merge patch turning `actual` into an object that contains `desired`.
///
/// Returns `None` when nothing needs to change. Arrays are replaced wholesale,
/// as merge-patch semantics require.
pub fn merge_patch_for(desired: &Value, actual: &Value) -> Option<Value> {
    match (desired, actual) {
        (Value::Object(d), Value::Object(a)) => {
            let mut patch = Map::new();
            for (key, dv) in d {
                match a.get(key) {
                    Some(av) => {
                        if let Some(p) = merge_patch_for(dv, av) {
                            patch.insert(key.clone(), p);
                        }
                    }
                    None if dv.is_null() => {}
                    None => {
                        patch.insert(key.clone(), dv.clone());
                    }
                }
            }
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        (d, a) if contains(d, a) => None,
        (d, _) => Some(d.clone()),
    }
}

/// Applies a merge patch in place; `null` removes a field.
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        for (key, value) in patch {
            if value.is_null() {
                map.remove(key);
            } else {
                apply_merge_patch(map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}
