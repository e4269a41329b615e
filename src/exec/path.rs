//! Concrete (executor-resolved) paths into the result tree (spec.md §3
//! "Insertion-point path segments" and §4.4 `findInsertionPoints`).

use std::fmt;

use apollo_compiler::executable;
use itertools::Itertools;
use serde_json::Value;

use crate::plan::InsertionPoint;

/// One decorated path segment: `field`, `field:N`, or `field:N#ID` /
/// `field#ID`. The `#ID` decoration is informational — navigation only ever
/// uses `field` and `index` — but it is what child steps read as their `id`
/// variable (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcreteSegment {
    pub field: String,
    pub index: Option<usize>,
    pub id: Option<String>,
}

impl fmt::Display for ConcreteSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.field)?;
        if let Some(index) = self.index {
            write!(f, ":{index}")?;
        }
        if let Some(id) = &self.id {
            write!(f, "#{id}")?;
        }
        Ok(())
    }
}

/// A fully resolved path into the result tree: one concrete landing spot for
/// a planner-level [`InsertionPoint`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConcretePath(pub Vec<ConcreteSegment>);

impl ConcretePath {
    /// The id of the object this path points at, if any — this is exactly
    /// the value a boundary-wrapped child step sends as `$id` (spec.md §3).
    pub fn id(&self) -> Option<&str> {
        self.0.last().and_then(|seg| seg.id.as_deref())
    }
}

impl fmt::Display for ConcretePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.iter().join("."))
    }
}

fn find_field<'a>(
    selection_set: &'a executable::SelectionSet,
    response_key: &str,
) -> Option<&'a apollo_compiler::Node<executable::Field>> {
    selection_set.selections.iter().find_map(|selection| match selection {
        executable::Selection::Field(field) => {
            let key = field
                .alias
                .as_ref()
                .map(|a| a.as_str())
                .unwrap_or_else(|| field.name.as_str());
            (key == response_key).then_some(field)
        }
        _ => None,
    })
}

fn extract_id(value: &Value) -> Option<String> {
    let obj = value.as_object()?;
    match obj.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// spec.md §4.4 `findInsertionPoints`: expands a planner-level
/// [`InsertionPoint`] into every concrete path at which non-null data
/// currently sits, using `selection_set` only to tell lists from objects.
pub fn find_insertion_points(
    point: &InsertionPoint,
    selection_set: &executable::SelectionSet,
    data: &Value,
) -> Vec<ConcretePath> {
    walk(&point.0, selection_set, data, ConcretePath::default())
}

fn walk(
    remaining: &[String],
    selection_set: &executable::SelectionSet,
    data: &Value,
    prefix: ConcretePath,
) -> Vec<ConcretePath> {
    let Some((head, rest)) = remaining.split_first() else {
        return vec![prefix];
    };
    let Some(field) = find_field(selection_set, head) else {
        return Vec::new();
    };
    let Some(value) = data.as_object().and_then(|o| o.get(head.as_str())) else {
        return Vec::new();
    };
    if value.is_null() {
        return Vec::new();
    }

    if field.definition.ty.is_list() {
        let Some(items) = value.as_array() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (index, item) in items.iter().enumerate() {
            if item.is_null() {
                continue;
            }
            if rest.is_empty() {
                let mut path = prefix.clone();
                path.0.push(ConcreteSegment {
                    field: head.clone(),
                    index: Some(index),
                    id: extract_id(item),
                });
                out.push(path);
            } else {
                let mut path = prefix.clone();
                path.0.push(ConcreteSegment {
                    field: head.clone(),
                    index: Some(index),
                    id: None,
                });
                out.extend(walk(rest, &field.selection_set, item, path));
            }
        }
        out
    } else if rest.is_empty() {
        let mut path = prefix;
        path.0.push(ConcreteSegment {
            field: head.clone(),
            index: None,
            id: extract_id(value),
        });
        vec![path]
    } else {
        let mut path = prefix;
        path.0.push(ConcreteSegment {
            field: head.clone(),
            index: None,
            id: None,
        });
        walk(rest, &field.selection_set, value, path)
    }
}

/// spec.md §4.4 `extractValue`.
pub fn extract_value<'a>(data: &'a Value, path: &ConcretePath) -> Option<&'a Value> {
    let mut current = data;
    for segment in &path.0 {
        current = current.as_object()?.get(&segment.field)?;
        if let Some(index) = segment.index {
            current = current.as_array()?.get(index)?;
        }
    }
    Some(current)
}

/// spec.md §4.4 `insertObject`, extending lists with `Value::Null`
/// placeholders as needed.
pub fn insert_object(root: &mut Value, path: &ConcretePath, value: Value) {
    insert_rec(root, &path.0, value);
}

fn insert_rec(node: &mut Value, path: &[ConcreteSegment], value: Value) {
    let Some((segment, rest)) = path.split_first() else {
        merge_into(node, value);
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Default::default());
    }
    let slot = node
        .as_object_mut()
        .expect("just ensured object")
        .entry(segment.field.clone())
        .or_insert(Value::Null);

    match segment.index {
        None => insert_rec(slot, rest, value),
        Some(index) => {
            if !slot.is_array() {
                *slot = Value::Array(Vec::new());
            }
            let arr = slot.as_array_mut().expect("just ensured array");
            while arr.len() <= index {
                arr.push(Value::Null);
            }
            insert_rec(&mut arr[index], rest, value);
        }
    }
}

/// Merges `incoming` into `target` in place: objects merge key-by-key,
/// lists merge positionally, scalars last-writer-wins (spec.md §4.4.e —
/// the planner guarantees sibling steps never overlap, so a scalar
/// conflict here indicates a planning bug rather than a legitimate case).
/// A null `incoming` is always a no-op rather than an overwrite: a boundary
/// step whose upstream resolved to null must not clobber data a sibling
/// step already stitched at the same or an enclosing insertion point.
pub fn merge_into(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (_, Value::Null) => {}
        (target @ Value::Null, incoming) => *target = incoming,
        (Value::Object(target_map), Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                merge_into(target_map.entry(key).or_insert(Value::Null), value);
            }
        }
        (Value::Array(target_arr), Value::Array(incoming_arr)) => {
            for (index, value) in incoming_arr.into_iter().enumerate() {
                if index >= target_arr.len() {
                    target_arr.push(Value::Null);
                }
                merge_into(&mut target_arr[index], value);
            }
        }
        (target, incoming) => *target = incoming,
    }
}
