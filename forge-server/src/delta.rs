//! Computes path-addressed deltas between two state snapshots, and applies
//! them. The contract: `apply(old, diff(old, new)) == new` for any pair of
//! JSON trees, so a client that applies every delta in version order stays
//! byte-for-byte in sync with the server.

use protocol::DeltaOp;
use serde_json::{Map, Value};

/// Diffs two JSON trees into a list of operations transforming `old` into
/// `new`. The result is deterministic: object keys are visited in the
/// (sorted) order serde_json stores them, array indices ascending.
pub fn diff(old: &Value, new: &Value) -> Vec<DeltaOp> {
    let mut ops = Vec::new();
    diff_value(old, new, String::new(), &mut ops);
    ops
}

fn diff_value(old: &Value, new: &Value, path: String, ops: &mut Vec<DeltaOp>) {
    if old == new {
        return;
    }
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            diff_object(old_map, new_map, &path, ops);
        }
        (Value::Array(old_arr), Value::Array(new_arr)) => {
            diff_array(old_arr, new_arr, &path, ops);
        }
        _ => ops.push(DeltaOp::Set { path, value: new.clone() }),
    }
}

fn diff_object(old: &Map<String, Value>, new: &Map<String, Value>, path: &str, ops: &mut Vec<DeltaOp>) {
    for key in old.keys() {
        if !new.contains_key(key) {
            ops.push(DeltaOp::Delete { path: join(path, key) });
        }
    }
    for (key, new_value) in new {
        match old.get(key) {
            Some(old_value) => {
                diff_value(old_value, new_value, join(path, key), ops);
            }
            None => ops.push(DeltaOp::Set {
                path: join(path, key),
                value: new_value.clone(),
            }),
        }
    }
}

fn diff_array(old: &[Value], new: &[Value], path: &str, ops: &mut Vec<DeltaOp>) {
    // Pure append: recurse into the shared prefix, push the tail.
    if new.len() >= old.len() {
        if new.len() > old.len() && new[..old.len()] == *old {
            for item in &new[old.len()..] {
                ops.push(DeltaOp::Push { path: path.to_string(), value: item.clone() });
            }
            return;
        }
        if new.len() == old.len() {
            for (index, (old_item, new_item)) in old.iter().zip(new).enumerate() {
                diff_value(old_item, new_item, join_index(path, index), ops);
            }
            return;
        }
        // Grew and the prefix changed as well: element-wise plus pushed tail.
        for (index, (old_item, new_item)) in old.iter().zip(new).enumerate() {
            diff_value(old_item, new_item, join_index(path, index), ops);
        }
        for item in &new[old.len()..] {
            ops.push(DeltaOp::Push { path: path.to_string(), value: item.clone() });
        }
        return;
    }

    // Shrank by one with everything else intact: the common case of a unit
    // leaving the initiative order. A single splice keeps the delta minimal.
    if new.len() + 1 == old.len() {
        if let Some(removed) = (0..old.len()).find(|&k| {
            old[..k] == new[..k] && old[k + 1..] == new[k..]
        }) {
            ops.push(DeltaOp::Splice {
                path: path.to_string(),
                index: removed,
                delete_count: 1,
                items: None,
            });
            return;
        }
    }

    // General shrink: element-wise on the kept prefix, splice off the rest.
    for (index, (old_item, new_item)) in old.iter().zip(new).enumerate() {
        diff_value(old_item, new_item, join_index(path, index), ops);
    }
    ops.push(DeltaOp::Splice {
        path: path.to_string(),
        index: new.len(),
        delete_count: old.len() - new.len(),
        items: None,
    });
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn join_index(path: &str, index: usize) -> String {
    if path.is_empty() {
        index.to_string()
    } else {
        format!("{path}.{index}")
    }
}

/// Applies a list of operations in place. Returns `false` when an operation
/// does not fit the tree, which means the caller's state is out of sync and
/// a full resync is needed.
pub fn apply(target: &mut Value, ops: &[DeltaOp]) -> bool {
    for op in ops {
        let ok = match op {
            DeltaOp::Set { path, value } => set_at(target, path, value.clone()),
            DeltaOp::Delete { path } => delete_at(target, path),
            DeltaOp::Push { path, value } => lookup_mut(target, path)
                .and_then(Value::as_array_mut)
                .map(|arr| arr.push(value.clone()))
                .is_some(),
            DeltaOp::Splice { path, index, delete_count, items } => {
                match lookup_mut(target, path).and_then(Value::as_array_mut) {
                    Some(arr) if *index <= arr.len() => {
                        let end = (*index + *delete_count).min(arr.len());
                        let replacement = items.clone().unwrap_or_default();
                        arr.splice(*index..end, replacement);
                        true
                    }
                    _ => false,
                }
            }
        };
        if !ok {
            return false;
        }
    }
    true
}

fn lookup_mut<'a>(target: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut cursor = target;
    for segment in path.split('.') {
        cursor = match cursor {
            Value::Object(map) => map.get_mut(segment)?,
            Value::Array(arr) => arr.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cursor)
}

fn set_at(target: &mut Value, path: &str, value: Value) -> bool {
    let Some((parent, last)) = split_parent(path) else {
        return false;
    };
    let Some(container) = (if parent.is_empty() {
        Some(target)
    } else {
        lookup_mut(target, parent)
    }) else {
        return false;
    };
    match container {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            true
        }
        Value::Array(arr) => match last.parse::<usize>() {
            Ok(index) if index < arr.len() => {
                arr[index] = value;
                true
            }
            Ok(index) if index == arr.len() => {
                arr.push(value);
                true
            }
            _ => false,
        },
        _ => false,
    }
}

fn delete_at(target: &mut Value, path: &str) -> bool {
    let Some((parent, last)) = split_parent(path) else {
        return false;
    };
    let Some(container) = (if parent.is_empty() {
        Some(target)
    } else {
        lookup_mut(target, parent)
    }) else {
        return false;
    };
    match container {
        Value::Object(map) => map.remove(last).is_some(),
        Value::Array(arr) => match last.parse::<usize>() {
            Ok(index) if index < arr.len() => {
                arr.remove(index);
                true
            }
            _ => false,
        },
        _ => false,
    }
}

fn split_parent(path: &str) -> Option<(&str, &str)> {
    if path.is_empty() {
        return None;
    }
    Some(match path.rsplit_once('.') {
        Some((parent, last)) => (parent, last),
        None => ("", path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(old: Value, new: Value) -> Vec<DeltaOp> {
        let ops = diff(&old, &new);
        let mut patched = old;
        assert!(apply(&mut patched, &ops), "ops must apply: {ops:?}");
        assert_eq!(patched, new, "apply(old, diff) must equal new");
        ops
    }

    #[test]
    fn identical_trees_produce_no_ops() {
        let v = json!({"a": 1, "b": [1, 2]});
        assert!(diff(&v, &v.clone()).is_empty());
    }

    #[test]
    fn nested_field_change_is_a_single_set() {
        let old = json!({"units": [{"id": 0, "position": {"x": 2, "y": 2}}]});
        let new = json!({"units": [{"id": 0, "position": {"x": 3, "y": 3}}]});
        let ops = round_trip(old, new);
        assert_eq!(ops.len(), 1);
        assert_eq!(
            ops[0],
            DeltaOp::Set {
                path: "units.0.position".into(),
                value: json!({"x": 3, "y": 3}),
            }
        );
    }

    #[test]
    fn scalar_inside_position_changes_alone() {
        let old = json!({"position": {"x": 2, "y": 2}});
        let new = json!({"position": {"x": 2, "y": 5}});
        let ops = round_trip(old, new);
        assert_eq!(ops, vec![DeltaOp::Set { path: "position.y".into(), value: json!(5) }]);
    }

    #[test]
    fn appended_element_becomes_push() {
        let old = json!({"events": [1, 2]});
        let new = json!({"events": [1, 2, 3]});
        let ops = round_trip(old, new);
        assert_eq!(
            ops,
            vec![DeltaOp::Push { path: "events".into(), value: json!(3) }]
        );
    }

    #[test]
    fn removed_middle_element_becomes_splice() {
        let old = json!({"initiative": [4, 1, 3]});
        let new = json!({"initiative": [4, 3]});
        let ops = round_trip(old, new);
        assert_eq!(
            ops,
            vec![DeltaOp::Splice {
                path: "initiative".into(),
                index: 1,
                delete_count: 1,
                items: None,
            }]
        );
    }

    #[test]
    fn added_and_removed_keys() {
        let old = json!({"a": 1, "gone": true});
        let new = json!({"a": 1, "fresh": "yes"});
        let ops = round_trip(old, new);
        assert!(ops.contains(&DeltaOp::Delete { path: "gone".into() }));
        assert!(ops.contains(&DeltaOp::Set { path: "fresh".into(), value: json!("yes") }));
    }

    #[test]
    fn shrink_by_many_round_trips() {
        let old = json!({"drops": [{"id": 1}, {"id": 2}, {"id": 3}]});
        let new = json!({"drops": [{"id": 3}]});
        round_trip(old, new);
    }

    #[test]
    fn type_change_is_a_set() {
        let old = json!({"x": [1, 2]});
        let new = json!({"x": {"a": 1}});
        let ops = round_trip(old, new);
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn mismatched_apply_reports_failure() {
        let mut state = json!({"a": [1]});
        let ops = vec![DeltaOp::Splice {
            path: "a".into(),
            index: 5,
            delete_count: 1,
            items: None,
        }];
        assert!(!apply(&mut state, &ops));
    }

    #[test]
    fn full_simulation_action_round_trips() {
        use protocol::{CharacterClass, Difficulty, GameAction};
        use simulation::{
            GameState, MapOptions, PlayerUnitSpec, UnitOptions, execute_action,
            generate_map, generate_units, start_combat,
        };

        let map = generate_map(&MapOptions::with_seed(42));
        let units = generate_units(
            &UnitOptions {
                seed: 42,
                difficulty: Difficulty::Normal,
                players: vec![
                    PlayerUnitSpec {
                        name: "P1".into(),
                        class: CharacterClass::Warrior,
                        xp: 0,
                        weapon: None,
                    },
                    PlayerUnitSpec {
                        name: "P2".into(),
                        class: CharacterClass::Ranger,
                        xp: 0,
                        weapon: None,
                    },
                ],
            },
            &map,
        );
        let mut state = GameState::new(map, units, 42);
        start_combat(&mut state).unwrap();

        let old = serde_json::to_value(&state).unwrap();
        let unit = state.current_unit_id().unwrap();
        execute_action(&mut state, &GameAction::EndTurn { unit_id: unit }).unwrap();
        let new = serde_json::to_value(&state).unwrap();

        let ops = diff(&old, &new);
        assert!(!ops.is_empty());
        let mut patched = old;
        assert!(apply(&mut patched, &ops));
        assert_eq!(patched, new);
    }
}
