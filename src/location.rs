//! The field-location index: `(parentType, fieldName) -> [Location]` (spec.md §3).

use std::sync::Arc;

use derive_more::Display;
use indexmap::IndexMap;
use indexmap::IndexSet;

/// An opaque upstream identifier. A URL for HTTP queryers, `"internal"` for
/// gateway-owned fields such as the synthetic `node` accessor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub struct Location(Arc<str>);

impl Location {
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    /// The synthetic location used for gateway-owned fields (e.g. `node`).
    pub fn internal() -> Self {
        Self::new("internal")
    }

    pub fn is_internal(&self) -> bool {
        self.0.as_ref() == "internal"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Location {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Location {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Key into the [`FieldLocationIndex`]: `"{parent}.{field}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display(fmt = "{parent_type}.{field_name}")]
pub struct FieldKey {
    pub parent_type: String,
    pub field_name: String,
}

impl FieldKey {
    pub fn new(parent_type: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            parent_type: parent_type.into(),
            field_name: field_name.into(),
        }
    }
}

/// Mapping from `(parentType, fieldName)` to the ordered, append-preserving
/// sequence of upstreams that can resolve it.
///
/// Registration order matters: it is the tie-breaker of last resort in the
/// planner (spec.md §4.3, "pick the first location by original registration
/// order") and it is what [`FieldLocationIndex::union`] must preserve.
#[derive(Debug, Clone, Default)]
pub struct FieldLocationIndex {
    locations: IndexMap<FieldKey, Vec<Location>>,
}

impl FieldLocationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `location` as a provider of `key`, preserving duplicates only
    /// when they are not already the most-recently-registered upstream for
    /// this key (register order still allows the same location to reappear
    /// for a different upstream schema pass, since call sites register once
    /// per upstream).
    pub fn register(&mut self, key: FieldKey, location: Location) {
        self.locations.entry(key).or_default().push(location);
    }

    pub fn locations_for(&self, parent_type: &str, field_name: &str) -> &[Location] {
        self.locations
            .get(&FieldKey::new(parent_type, field_name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, parent_type: &str, field_name: &str) -> bool {
        !self.locations_for(parent_type, field_name).is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldKey, &[Location])> {
        self.locations.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// A type is a *boundary type* if more than one distinct upstream
    /// contributes at least one of its fields.
    pub fn is_boundary_type(&self, type_name: &str) -> bool {
        let mut seen: IndexSet<&Location> = IndexSet::new();
        for (key, locs) in self.iter() {
            if key.parent_type == type_name {
                seen.extend(locs.iter());
                if seen.len() > 1 {
                    return true;
                }
            }
        }
        false
    }

    /// Order-preserving union of two indexes (spec.md §8, "Location-map
    /// union"): `Concat(A, B)[key]` is `A[key]` followed by any locations
    /// in `B[key]` not already present.
    pub fn union(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        for (key, locs) in other.iter() {
            let entry = merged.locations.entry(key.clone()).or_default();
            for loc in locs {
                if !entry.contains(loc) {
                    entry.push(loc.clone());
                }
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_preserves_order_and_dedupes() {
        let mut a = FieldLocationIndex::new();
        a.register(FieldKey::new("Query", "user"), Location::new("a"));
        let mut b = FieldLocationIndex::new();
        b.register(FieldKey::new("Query", "user"), Location::new("a"));
        b.register(FieldKey::new("Query", "user"), Location::new("b"));

        let merged = a.union(&b);
        assert_eq!(
            merged.locations_for("Query", "user"),
            &[Location::new("a"), Location::new("b")]
        );
    }

    #[test]
    fn boundary_type_requires_multiple_upstreams() {
        let mut idx = FieldLocationIndex::new();
        idx.register(FieldKey::new("User", "id"), Location::new("a"));
        idx.register(FieldKey::new("User", "firstName"), Location::new("a"));
        assert!(!idx.is_boundary_type("User"));

        idx.register(FieldKey::new("User", "address"), Location::new("b"));
        assert!(idx.is_boundary_type("User"));
    }
}
