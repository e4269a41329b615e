//! Upstream schema composition (spec.md §4.1): fuses each upstream's SDL
//! into one unified schema plus the [`FieldLocationIndex`] the planner
//! consumes.
//!
//! Grounded on `apollo-federation`'s `merge.rs`: walk each upstream's
//! `schema.types`, copy-or-merge every type into a fresh `Schema::new()`,
//! growing `Component<FieldDefinition>` entries the same way the federation
//! composer does, minus the `@key`/`@external` directive bookkeeping that
//! doesn't apply to this gateway's plain field-location model.

use apollo_compiler::ast;
use apollo_compiler::name;
use apollo_compiler::schema::Component;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::InterfaceType;
use apollo_compiler::schema::ObjectType;
use apollo_compiler::validation::Valid;
use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use indexmap::map::Entry;
use indexmap::IndexMap;

use crate::error::MergeError;
use crate::location::FieldKey;
use crate::location::FieldLocationIndex;
use crate::location::Location;

/// One upstream's already-parsed-and-validated schema plus the location it
/// is served from.
pub struct Upstream {
    pub location: Location,
    pub schema: Valid<Schema>,
}

pub struct Merger;

impl Merger {
    /// spec.md §4.1: merges `upstreams` in the order given. Registration
    /// order in the resulting [`FieldLocationIndex`] is this order, and it
    /// is what the planner's tie-breaker falls back to as a last resort.
    pub fn merge(upstreams: &[Upstream]) -> Result<(Valid<Schema>, FieldLocationIndex), MergeError> {
        let mut supergraph = Schema::new();
        let mut locations = FieldLocationIndex::new();

        for upstream in upstreams {
            merge_schema_definition(&mut supergraph, &upstream.schema);

            for (type_name, ty) in upstream.schema.types.iter() {
                if ty.is_built_in() {
                    continue;
                }
                match ty {
                    ExtendedType::Object(object) => merge_object_type(
                        &mut supergraph.types,
                        &mut locations,
                        &upstream.location,
                        type_name.clone(),
                        object,
                    )?,
                    ExtendedType::Interface(_) => {
                        merge_passthrough_type(&mut supergraph.types, type_name.clone(), ty)?
                    }
                    ExtendedType::Union(_) => {
                        merge_passthrough_type(&mut supergraph.types, type_name.clone(), ty)?
                    }
                    ExtendedType::Enum(_) => {
                        merge_passthrough_type(&mut supergraph.types, type_name.clone(), ty)?
                    }
                    ExtendedType::InputObject(_) => {
                        merge_passthrough_type(&mut supergraph.types, type_name.clone(), ty)?
                    }
                    ExtendedType::Scalar(_) => {
                        supergraph
                            .types
                            .entry(type_name.clone())
                            .or_insert_with(|| ty.clone());
                    }
                }
            }
        }

        install_node_field(&mut supergraph, &mut locations);

        Ok((Valid::assume_valid(supergraph), locations))
    }
}

fn merge_schema_definition(supergraph: &mut Schema, upstream: &Valid<Schema>) {
    let supergraph_def = supergraph.schema_definition.make_mut();
    if upstream.schema_definition.query.is_some() && supergraph_def.query.is_none() {
        supergraph_def.query.clone_from(&upstream.schema_definition.query);
    }
    if upstream.schema_definition.mutation.is_some() && supergraph_def.mutation.is_none() {
        supergraph_def.mutation.clone_from(&upstream.schema_definition.mutation);
    }
    if upstream.schema_definition.subscription.is_some() && supergraph_def.subscription.is_none() {
        supergraph_def
            .subscription
            .clone_from(&upstream.schema_definition.subscription);
    }
}

fn merge_object_type(
    types: &mut IndexMap<Name, ExtendedType>,
    locations: &mut FieldLocationIndex,
    location: &Location,
    type_name: Name,
    object: &Node<ObjectType>,
) -> Result<(), MergeError> {
    let existing = types.entry(type_name.clone()).or_insert_with(|| {
        ExtendedType::Object(Node::new(ObjectType {
            description: object.description.clone(),
            name: type_name.clone(),
            implements_interfaces: Default::default(),
            directives: Default::default(),
            fields: IndexMap::new(),
        }))
    });
    let ExtendedType::Object(merged) = existing else {
        return Err(MergeError::ConflictingTypeShape {
            type_name: type_name.to_string(),
        });
    };
    let mutable = merged.make_mut();
    for interface in object.implements_interfaces.iter() {
        mutable.implements_interfaces.insert(interface.clone());
    }

    for (field_name, field) in object.fields.iter() {
        match mutable.fields.entry(field_name.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(Component::new(ast::FieldDefinition {
                    description: field.description.clone(),
                    name: field.name.clone(),
                    arguments: field.arguments.clone(),
                    ty: field.ty.clone(),
                    directives: Default::default(),
                }));
            }
            Entry::Occupied(slot) => {
                let existing_ty = slot.get().ty.to_string();
                let incoming_ty = field.ty.to_string();
                if existing_ty != incoming_ty {
                    return Err(MergeError::ConflictingFieldType {
                        type_name: type_name.to_string(),
                        field_name: field_name.to_string(),
                        left: existing_ty,
                        right: incoming_ty,
                    });
                }
            }
        }
        locations.register(
            FieldKey::new(type_name.to_string(), field_name.to_string()),
            location.clone(),
        );
    }
    Ok(())
}

/// Interfaces, unions, enums, and input objects are not boundary-splittable
/// the way object types are (spec.md §4.1 scopes boundary types to objects),
/// so these are merged first-upstream-wins: later upstreams redefining one
/// of these types must at least agree on its kind, but field-by-field value
/// agreement isn't required. This is a deliberate simplification, not a
/// correctness guarantee.
fn merge_passthrough_type(
    types: &mut IndexMap<Name, ExtendedType>,
    type_name: Name,
    incoming: &ExtendedType,
) -> Result<(), MergeError> {
    match types.entry(type_name.clone()) {
        Entry::Vacant(slot) => {
            slot.insert(incoming.clone());
        }
        Entry::Occupied(slot) => {
            if std::mem::discriminant(slot.get()) != std::mem::discriminant(incoming) {
                return Err(MergeError::ConflictingTypeShape {
                    type_name: type_name.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Installs the synthetic `Node` interface, `Query.node(id: ID!): Node`
/// field, and `implements Node` + `id: ID!` on every boundary object type
/// (spec.md §4.3 "ID insertion" depends on every boundary type being
/// globally addressable this way).
fn install_node_field(schema: &mut Schema, locations: &mut FieldLocationIndex) {
    schema.types.entry(name!("Node")).or_insert_with(|| {
        let mut fields = IndexMap::new();
        fields.insert(name!("id"), Component::new(id_field_definition()));
        ExtendedType::Interface(Node::new(InterfaceType {
            description: None,
            name: name!("Node"),
            implements_interfaces: Default::default(),
            directives: Default::default(),
            fields,
        }))
    });

    let boundary_types: Vec<Name> = schema
        .types
        .iter()
        .filter(|(name, ty)| matches!(ty, ExtendedType::Object(_)) && locations.is_boundary_type(name))
        .map(|(name, _)| name.clone())
        .collect();

    for type_name in boundary_types {
        if let Some(ExtendedType::Object(object)) = schema.types.get_mut(&type_name) {
            let mutable = object.make_mut();
            mutable.implements_interfaces.insert(name!("Node"));
            mutable
                .fields
                .entry(name!("id"))
                .or_insert_with(|| Component::new(id_field_definition()));
        }
    }

    if let Some(ExtendedType::Object(query)) = schema.types.get_mut(&name!("Query")) {
        let mutable = query.make_mut();
        mutable.fields.entry(name!("node")).or_insert_with(|| {
            Component::new(ast::FieldDefinition {
                description: None,
                name: name!("node"),
                arguments: vec![Node::new(ast::InputValueDefinition {
                    description: None,
                    name: name!("id"),
                    ty: Node::new(ast::Type::NonNullNamed(name!("ID"))),
                    default_value: None,
                    directives: Default::default(),
                })],
                ty: ast::Type::Named(name!("Node")),
                directives: Default::default(),
            })
        });
    }
    locations.register(FieldKey::new("Query", "node"), Location::internal());
}

fn id_field_definition() -> ast::FieldDefinition {
    ast::FieldDefinition {
        description: None,
        name: name!("id"),
        arguments: vec![],
        ty: ast::Type::NonNullNamed(name!("ID")),
        directives: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn upstream(location: &str, sdl: &str) -> Upstream {
        Upstream {
            location: Location::new(location),
            schema: Schema::parse_and_validate(sdl, format!("{location}.graphql")).unwrap(),
        }
    }

    #[test]
    fn merges_fields_and_marks_boundary_type() {
        let a = upstream(
            "a",
            "type Query { user: User } type User { id: ID! firstName: String }",
        );
        let b = upstream(
            "b",
            "type Query { user: User } type User { favoriteCatPhoto: Photo } type Photo { url: String }",
        );
        let (schema, locations) = Merger::merge(&[a, b]).unwrap();

        assert!(locations.is_boundary_type("User"));
        assert_eq!(locations.locations_for("User", "firstName"), &[Location::new("a")]);
        assert_eq!(
            locations.locations_for("User", "favoriteCatPhoto"),
            &[Location::new("b")]
        );
        assert_eq!(locations.locations_for("Query", "node"), &[Location::internal()]);

        let ExtendedType::Object(user) = &schema.types[&name!("User")] else {
            panic!("expected User to merge as an object type");
        };
        assert!(user.implements_interfaces.contains(&name!("Node")));
    }

    #[test]
    fn conflicting_field_types_are_rejected() {
        let a = upstream("a", "type Query { user: User } type User { id: ID! }");
        let b = upstream("b", "type Query { user: User } type User { id: String }");
        let err = Merger::merge(&[a, b]).unwrap_err();
        assert!(matches!(err, MergeError::ConflictingFieldType { .. }));
    }
}
