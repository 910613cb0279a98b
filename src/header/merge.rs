//! Deep merge over YAML values.
//!
//! The merge combines an ordered stack of configuration layers (system,
//! workspace, includes, imports, document header, in-pipeline merges) into
//! one effective header. Later layers win. The operation is associative, a
//! law the tests below pin down.

use serde_yaml::{Mapping, Sequence, Value};

/// Merges `right` over `left`.
///
/// Rules:
///   * scalar over scalar: right wins unless right is null;
///   * mapping over mapping: key-wise deep merge, left key order kept,
///     right-only keys appended;
///   * sequence over sequence: elements carrying a string `name` merge by
///     name in place, unnamed elements concatenate in order;
///   * anything else: right replaces left.
pub fn merge_values(left: Value, right: Value) -> Value {
    match (left, right) {
        (l, Value::Null) => l,
        (Value::Mapping(l), Value::Mapping(r)) => Value::Mapping(merge_mappings(l, r)),
        (Value::Sequence(l), Value::Sequence(r)) => Value::Sequence(merge_sequences(l, r)),
        (_, r) => r,
    }
}

fn merge_mappings(left: Mapping, mut right: Mapping) -> Mapping {
    let mut out = Mapping::new();
    for (key, lv) in left {
        match right.shift_remove(&key) {
            Some(rv) => out.insert(key, merge_values(lv, rv)),
            None => out.insert(key, lv),
        };
    }
    for (key, rv) in right {
        out.insert(key, rv);
    }
    out
}

/// The string under a mapping element's `name` key, if any.
fn element_name(v: &Value) -> Option<&str> {
    v.as_mapping()?.get(Value::from("name"))?.as_str()
}

fn merge_sequences(left: Sequence, right: Sequence) -> Sequence {
    let mut consumed = vec![false; right.len()];
    let mut out = Sequence::with_capacity(left.len() + right.len());

    for lv in left {
        let merged = match element_name(&lv) {
            Some(name) => {
                let hit = right.iter().enumerate().find(|(i, rv)| {
                    !consumed[*i] && element_name(rv) == Some(name)
                });
                match hit {
                    Some((i, rv)) => {
                        consumed[i] = true;
                        merge_values(lv.clone(), rv.clone())
                    }
                    None => lv,
                }
            }
            None => lv,
        };
        out.push(merged);
    }

    for (i, rv) in right.into_iter().enumerate() {
        if !consumed[i] {
            out.push(rv);
        }
    }
    out
}

/// Folds a stack of layers, lowest precedence first.
pub fn merge_stack<I>(layers: I) -> Value
where
    I: IntoIterator<Item = Value>,
{
    layers
        .into_iter()
        .fold(Value::Null, |acc, layer| match acc {
            Value::Null => layer,
            acc => merge_values(acc, layer),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn right_scalar_wins() {
        assert_eq!(merge_values(yaml("1"), yaml("2")), yaml("2"));
        assert_eq!(merge_values(yaml("\"a\""), yaml("null")), yaml("\"a\""));
    }

    #[test]
    fn mappings_deep_merge() {
        let merged = merge_values(
            yaml("{a: {x: 1, y: 2}, b: 1}"),
            yaml("{a: {y: 3, z: 4}}"),
        );
        assert_eq!(merged, yaml("{a: {x: 1, y: 3, z: 4}, b: 1}"));
    }

    #[test]
    fn asymmetric_types_replace() {
        assert_eq!(merge_values(yaml("{a: 1}"), yaml("[1]")), yaml("[1]"));
        assert_eq!(merge_values(yaml("[1]"), yaml("2")), yaml("2"));
    }

    #[test]
    fn named_sequence_elements_merge_by_name() {
        let merged = merge_values(
            yaml("[{name: A, model: x}, {name: B, model: y}]"),
            yaml("[{name: B, model: z}, {name: C, model: w}]"),
        );
        assert_eq!(
            merged,
            yaml("[{name: A, model: x}, {name: B, model: z}, {name: C, model: w}]")
        );
    }

    #[test]
    fn unnamed_sequence_elements_concatenate() {
        let merged = merge_values(yaml("[1, 2]"), yaml("[3]"));
        assert_eq!(merged, yaml("[1, 2, 3]"));
    }

    #[test]
    fn merge_is_associative() {
        let h1 = yaml("{interlocutors: [{name: A, model: m1}], macros: [{name: hi, expansion: x}]}");
        let h2 = yaml("{interlocutors: [{name: A, temperature: 0.3}, {name: B, model: m2}]}");
        let h3 = yaml("{interlocutors: [{name: A, model: m3}], extra: true}");

        let left = merge_values(merge_values(h1.clone(), h2.clone()), h3.clone());
        let right = merge_values(h1, merge_values(h2, h3));
        assert_eq!(left, right);
    }

    #[test]
    fn merge_stack_folds_in_order() {
        let merged = merge_stack(vec![
            yaml("{model: x}"),
            yaml("{model: y}"),
            yaml("{other: 1}"),
        ]);
        assert_eq!(merged, yaml("{model: y, other: 1}"));
    }
}
