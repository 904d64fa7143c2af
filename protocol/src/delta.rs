//! Versioned incremental state updates.
//!
//! A delta transforms the state at `previousVersion` into the state at
//! `version` through a list of path-addressed operations. Paths use dotted
//! notation with numeric indices, e.g. `units.0.position`. A client whose
//! version does not match `previousVersion` has to request a full sync.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One path-addressed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum DeltaOp {
    /// Sets the value at `path`, creating it if absent.
    Set { path: String, value: Value },
    /// Removes the value at `path`.
    Delete { path: String },
    /// Appends `value` to the array at `path`.
    Push { path: String, value: Value },
    /// Replaces `deleteCount` elements starting at `index` in the array at
    /// `path` with `items`.
    #[serde(rename_all = "camelCase")]
    Splice {
        path: String,
        index: usize,
        delete_count: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        items: Option<Vec<Value>>,
    },
}

/// A versioned batch of changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDelta {
    pub version: u64,
    pub previous_version: u64,
    pub changes: Vec<DeltaOp>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn op_wire_shape() {
        let op = DeltaOp::Set {
            path: "units.0.position".into(),
            value: json!({"x": 3, "y": 3}),
        };
        let v = serde_json::to_value(&op).unwrap();
        assert_eq!(v["op"], "set");
        assert_eq!(v["path"], "units.0.position");

        let op = DeltaOp::Splice {
            path: "combat.initiative".into(),
            index: 2,
            delete_count: 1,
            items: None,
        };
        let v = serde_json::to_value(&op).unwrap();
        assert_eq!(v["op"], "splice");
        assert_eq!(v["deleteCount"], 1);
        assert!(v.get("items").is_none());
    }

    #[test]
    fn delta_round_trip() {
        let delta = StateDelta {
            version: 2,
            previous_version: 1,
            changes: vec![DeltaOp::Delete { path: "lootDrops.0".into() }],
        };
        let text = serde_json::to_string(&delta).unwrap();
        assert!(text.contains("\"previousVersion\":1"));
        let back: StateDelta = serde_json::from_str(&text).unwrap();
        assert_eq!(back, delta);
    }
}
