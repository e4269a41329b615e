//! The planner (spec.md §4.3): turns a parsed operation plus a
//! [`FieldLocationIndex`] into a tree of [`QueryPlanStep`]s.

use std::collections::BTreeSet;

use apollo_compiler::ast;
use apollo_compiler::executable;
use apollo_compiler::name;
use apollo_compiler::validation::Valid;
use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use indexmap::IndexMap;
use tracing::debug;

use crate::error::PlanError;
use crate::location::FieldLocationIndex;
use crate::location::Location;
use crate::plan::InsertionPoint;
use crate::plan::QueryPlan;
use crate::plan::QueryPlanStep;
use crate::selection;

type FragmentDefs = IndexMap<Name, Node<executable::Fragment>>;
/// scrub-map accumulated while classifying one operation: synthetic field
/// name -> insertion points at which it was auto-injected.
type ScrubMap = IndexMap<String, Vec<InsertionPoint>>;

/// Everything the planner needs that isn't carried on the request itself
/// (spec.md §4.3 `PlanningContext`).
pub struct PlanningContext<'a> {
    pub schema: &'a Valid<Schema>,
    pub field_locations: &'a FieldLocationIndex,
    /// Overrides the default tie-breaker: earliest entry wins (spec.md
    /// §4.3 "Location tie-breaker", rule 1).
    pub location_priorities: Option<&'a [Location]>,
}

/// Converts parsed operations into [`QueryPlan`]s. Stateless: all mutable
/// bookkeeping for one operation lives in a fresh [`ScrubMap`] local to
/// [`Planner::plan_operation`].
pub struct Planner;

impl Planner {
    /// One [`QueryPlan`] per named operation in `document`, in declaration
    /// order (spec.md §4.3 "Multi-operation documents").
    pub fn plan(
        ctx: &PlanningContext<'_>,
        document: &Valid<ExecutableDocument>,
    ) -> Result<Vec<QueryPlan>, PlanError> {
        let mut operations: Vec<(Option<Name>, &Node<executable::Operation>)> = Vec::new();
        if let Some(anonymous) = &document.operations.anonymous {
            operations.push((None, anonymous));
        }
        for (name, operation) in document.operations.named.iter() {
            operations.push((Some(name.clone()), operation));
        }
        if operations.is_empty() {
            return Err(PlanError::EmptyDocument);
        }

        operations
            .into_iter()
            .map(|(name, operation)| {
                Self::plan_operation(ctx, name, operation, &document.fragments)
            })
            .collect()
    }

    fn plan_operation(
        ctx: &PlanningContext<'_>,
        operation_name: Option<Name>,
        operation: &Node<executable::Operation>,
        fragment_defs: &FragmentDefs,
    ) -> Result<QueryPlan, PlanError> {
        let root_type = root_type_name(operation.operation_type);
        let top_fields = selection::apply_fragments(&operation.selection_set, fragment_defs)?;

        let mut scrub = ScrubMap::new();
        let (_local, then) = classify(
            ctx,
            root_type,
            None,
            &top_fields,
            &InsertionPoint::root(),
            fragment_defs,
            &mut scrub,
        )?;

        let rendered = then
            .into_iter()
            .map(|step| render(ctx.schema, step, &operation.variables, operation_name.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            operation = %operation_name.as_deref().unwrap_or("<anonymous>"),
            steps = rendered.len(),
            "planned operation"
        );

        Ok(QueryPlan {
            operation_name,
            operation_kind: operation.operation_type,
            variable_definitions: operation.variables.clone(),
            then: rendered,
            fields_to_scrub: scrub,
        })
    }
}

fn root_type_name(kind: ast::OperationType) -> &'static str {
    match kind {
        ast::OperationType::Query => "Query",
        ast::OperationType::Mutation => "Mutation",
        ast::OperationType::Subscription => "Subscription",
    }
}

fn response_key(field: &executable::Field) -> String {
    field
        .alias
        .as_ref()
        .map(|a| a.to_string())
        .unwrap_or_else(|| field.name.to_string())
}

/// Classifies `fields` (already fragment-flattened) that live on
/// `parent_type` at `insertion_point`. Returns the selection to keep at this
/// level plus every child step spawned at or below it — spawned steps
/// bubble straight up to whichever call in the chain owns the step being
/// built, matching spec.md §4.3's description of a step's `Then` children.
#[allow(clippy::too_many_arguments)]
fn classify(
    ctx: &PlanningContext<'_>,
    parent_type: &str,
    location: Option<&Location>,
    fields: &[Node<executable::Field>],
    insertion_point: &InsertionPoint,
    fragment_defs: &FragmentDefs,
    scrub: &mut ScrubMap,
) -> Result<(Vec<Node<executable::Field>>, Vec<QueryPlanStep>), PlanError> {
    let mut local = Vec::new();
    let mut children = Vec::new();
    let mut remote_groups: IndexMap<Location, Vec<Node<executable::Field>>> = IndexMap::new();

    for field in fields {
        if field.name.as_str() == "__typename" {
            local.push(field.clone());
            continue;
        }

        let candidates = ctx.field_locations.locations_for(parent_type, field.name.as_str());
        if candidates.is_empty() {
            return Err(PlanError::UnresolvedField {
                parent_type: parent_type.to_string(),
                field_name: field.name.to_string(),
            });
        }
        let chosen = tie_break(candidates, location, &remote_groups, ctx.location_priorities);

        let is_local = location == Some(&chosen);
        if !is_local {
            remote_groups.entry(chosen).or_default().push(field.clone());
            continue;
        }

        if field.selection_set.selections.is_empty() {
            local.push(field.clone());
            continue;
        }

        let return_type = field.definition.ty.inner_named_type();
        let sub_fields = selection::apply_fragments(&field.selection_set, fragment_defs)?;
        let child_point = insertion_point.extended(response_key(field));
        let (mut sub_local, sub_children) = classify(
            ctx,
            return_type.as_str(),
            location,
            &sub_fields,
            &child_point,
            fragment_defs,
            scrub,
        )?;
        if !sub_children.is_empty() {
            ensure_id(&mut sub_local, &child_point, scrub);
        }
        let mut rebuilt = (**field).clone();
        rebuilt.selection_set = executable::SelectionSet {
            ty: return_type.clone(),
            selections: sub_local.into_iter().map(executable::Selection::Field).collect(),
        };
        local.push(Node::new(rebuilt));
        children.extend(sub_children);
    }

    for (chosen_location, group_fields) in remote_groups {
        let child = build_step(
            ctx,
            parent_type,
            chosen_location,
            insertion_point.clone(),
            group_fields,
            fragment_defs,
            scrub,
        )?;
        children.push(child);
    }

    Ok((local, children))
}

/// spec.md §4.3 "Location tie-breaker".
fn tie_break(
    candidates: &[Location],
    current: Option<&Location>,
    already_chosen: &IndexMap<Location, Vec<Node<executable::Field>>>,
    priorities: Option<&[Location]>,
) -> Location {
    if let Some(priorities) = priorities {
        if let Some(preferred) = priorities.iter().find(|p| candidates.contains(p)) {
            return preferred.clone();
        }
    }
    if let Some(current) = current {
        if candidates.contains(current) {
            return current.clone();
        }
    }
    if let Some(sibling) = candidates.iter().find(|c| already_chosen.contains_key(*c)) {
        return sibling.clone();
    }
    candidates[0].clone()
}

/// spec.md §4.3 "ID insertion": inject `id` and record the scrub entry
/// unless the caller already asked for it explicitly.
fn ensure_id(fields: &mut Vec<Node<executable::Field>>, point: &InsertionPoint, scrub: &mut ScrubMap) {
    if fields.iter().any(|f| response_key(f) == "id") {
        return;
    }
    fields.push(Node::new(synthetic_id_field()));
    scrub.entry("id".to_string()).or_default().push(point.clone());
}

fn synthetic_id_field() -> executable::Field {
    let definition = Node::new(ast::FieldDefinition {
        description: None,
        name: name!("id"),
        arguments: vec![],
        ty: ast::Type::NonNullNamed(name!("ID")),
        directives: Default::default(),
    });
    executable::Field {
        definition,
        alias: None,
        name: name!("id"),
        arguments: vec![],
        directives: Default::default(),
        selection_set: executable::SelectionSet {
            ty: name!("ID"),
            selections: vec![],
        },
    }
}

/// Builds one complete [`QueryPlanStep`] for `fields` served at `location`,
/// recursing into `classify` for its own sub-selections. This is the
/// workhorse shared by root decomposition and remote-field promotion
/// (spec.md §4.3 steps 2 and 3 are the same operation at different
/// insertion points).
#[allow(clippy::too_many_arguments)]
fn build_step(
    ctx: &PlanningContext<'_>,
    parent_type: &str,
    location: Location,
    insertion_point: InsertionPoint,
    fields: Vec<Node<executable::Field>>,
    fragment_defs: &FragmentDefs,
    scrub: &mut ScrubMap,
) -> Result<QueryPlanStep, PlanError> {
    let (selection, then) = classify(
        ctx,
        parent_type,
        Some(&location),
        &fields,
        &insertion_point,
        fragment_defs,
        scrub,
    )?;

    Ok(QueryPlanStep {
        parent_type: parent_type.to_string(),
        selection_set: executable::SelectionSet {
            ty: Name::new(parent_type).map_err(|e| PlanError::Validation(e.to_string()))?,
            selections: selection.into_iter().map(executable::Selection::Field).collect(),
        },
        fragment_definitions: IndexMap::new(),
        insertion_point,
        variables: BTreeSet::new(),
        query_document: ExecutableDocument::new(),
        query_string: String::new(),
        operation_name: None,
        location,
        then,
    })
}

/// spec.md §4.2 `buildQueryForStep` + §4.3 step 6/7 (variables + rendering),
/// applied bottom-up so children are fully rendered before their parent's
/// `then` list is attached (render is actually order-independent since each
/// step's document is self-contained; the recursion here just mirrors the
/// step tree shape).
fn render(
    schema: &Valid<Schema>,
    mut step: QueryPlanStep,
    operation_variables: &[Node<ast::VariableDefinition>],
    operation_name: Option<&Name>,
) -> Result<QueryPlanStep, PlanError> {
    step.then = step
        .then
        .into_iter()
        .map(|child| render(schema, child, operation_variables, operation_name))
        .collect::<Result<Vec<_>, _>>()?;

    let used_vars = selection::extract_variables(&step.selection_set, &FragmentDefs::new());
    step.variables = operation_variables
        .iter()
        .map(|v| v.name.clone())
        .filter(|name| used_vars.contains(name))
        .collect();

    let wrapped = step.is_boundary_wrapped();
    let (top_selection, var_defs) = if wrapped {
        let inline_fragment = executable::InlineFragment {
            type_condition: Some(
                Name::new(&step.parent_type).map_err(|e| PlanError::Validation(e.to_string()))?,
            ),
            directives: Default::default(),
            selection_set: step.selection_set.clone(),
        };
        let node_definition = Node::new(ast::FieldDefinition {
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
        });
        let node_field = executable::Field {
            definition: node_definition,
            alias: None,
            name: name!("node"),
            arguments: vec![Node::new(ast::Argument {
                name: name!("id"),
                value: Node::new(ast::Value::Variable(name!("id"))),
            })],
            directives: Default::default(),
            selection_set: executable::SelectionSet {
                ty: name!("Node"),
                selections: vec![executable::Selection::InlineFragment(Node::new(
                    inline_fragment,
                ))],
            },
        };
        let mut var_defs: Vec<Node<ast::VariableDefinition>> = operation_variables
            .iter()
            .filter(|v| step.variables.contains(&v.name))
            .cloned()
            .collect();
        var_defs.push(Node::new(ast::VariableDefinition {
            name: name!("id"),
            ty: Node::new(ast::Type::NonNullNamed(name!("ID"))),
            default_value: None,
            directives: Default::default(),
        }));
        (
            executable::SelectionSet {
                ty: Name::new(root_type_name(ast::OperationType::Query))
                    .map_err(|e| PlanError::Validation(e.to_string()))?,
                selections: vec![executable::Selection::Field(Node::new(node_field))],
            },
            var_defs,
        )
    } else {
        let var_defs = operation_variables
            .iter()
            .filter(|v| step.variables.contains(&v.name))
            .cloned()
            .collect();
        (step.selection_set.clone(), var_defs)
    };

    let operation_kind = if wrapped {
        ast::OperationType::Query
    } else {
        match step.parent_type.as_str() {
            "Mutation" => ast::OperationType::Mutation,
            "Subscription" => ast::OperationType::Subscription,
            _ => ast::OperationType::Query,
        }
    };

    let operation = executable::Operation {
        operation_type: operation_kind,
        name: operation_name.cloned(),
        variables: var_defs,
        directives: Default::default(),
        selection_set: top_selection,
    };

    step.query_string = operation.serialize().to_string();
    let mut document = ExecutableDocument::new();
    document.insert_operation(operation);
    step.query_document = document;
    step.operation_name = operation_name.cloned();
    let _ = schema; // reserved: future per-step validation against the unified schema

    Ok(step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::FieldKey;

    fn schema_and_index() -> (Valid<Schema>, FieldLocationIndex) {
        let schema = Schema::parse_and_validate(
            r#"
            type Query { user: User favoriteCatPhoto: Photo }
            type User { id: ID! firstName: String favoriteCatPhoto: Photo }
            type Photo { id: ID! url: String createdBy: User }
            "#,
            "schema.graphql",
        )
        .unwrap();

        let mut index = FieldLocationIndex::new();
        index.register(FieldKey::new("Query", "user"), Location::new("a"));
        index.register(FieldKey::new("User", "id"), Location::new("a"));
        index.register(FieldKey::new("User", "firstName"), Location::new("a"));
        index.register(FieldKey::new("User", "favoriteCatPhoto"), Location::new("b"));
        index.register(FieldKey::new("Photo", "url"), Location::new("b"));
        (schema, index)
    }

    #[test]
    fn boundary_descent_spawns_child_step_and_injects_id() {
        let (schema, index) = schema_and_index();
        let document = ExecutableDocument::parse_and_validate(
            &schema,
            "{ user { firstName favoriteCatPhoto { url } } }",
            "query.graphql",
        )
        .unwrap();
        let ctx = PlanningContext {
            schema: &schema,
            field_locations: &index,
            location_priorities: None,
        };
        let plans = Planner::plan(&ctx, &document).unwrap();
        assert_eq!(plans.len(), 1);
        let plan = &plans[0];
        assert_eq!(plan.then.len(), 1);
        let root_step = &plan.then[0];
        assert_eq!(root_step.location, Location::new("a"));
        assert_eq!(root_step.then.len(), 1);
        let child = &root_step.then[0];
        assert_eq!(child.location, Location::new("b"));
        assert_eq!(child.insertion_point, InsertionPoint(vec!["user".into()]));
        assert_eq!(
            plan.fields_to_scrub.get("id"),
            Some(&vec![InsertionPoint(vec!["user".into()])])
        );
    }

    #[test]
    fn boundary_step_wraps_in_node_field_and_carries_id_variable() {
        let (schema, index) = schema_and_index();
        let document = ExecutableDocument::parse_and_validate(
            &schema,
            "{ user { firstName favoriteCatPhoto { url } } }",
            "query.graphql",
        )
        .unwrap();
        let ctx = PlanningContext {
            schema: &schema,
            field_locations: &index,
            location_priorities: None,
        };
        let plans = Planner::plan(&ctx, &document).unwrap();
        let child = &plans[0].then[0].then[0];
        assert!(child.query_string.contains("node(id:"));
        assert!(child.query_string.contains("... on User"));
        assert!(child.query_string.contains("favoriteCatPhoto"));
    }

    #[test]
    fn named_operation_propagates_to_every_step() {
        let (schema, index) = schema_and_index();
        let document = ExecutableDocument::parse_and_validate(
            &schema,
            "query GetUser { user { firstName favoriteCatPhoto { url } } }",
            "query.graphql",
        )
        .unwrap();
        let ctx = PlanningContext {
            schema: &schema,
            field_locations: &index,
            location_priorities: None,
        };
        let plans = Planner::plan(&ctx, &document).unwrap();
        let plan = &plans[0];
        assert_eq!(plan.operation_name.as_deref(), Some("GetUser"));
        let root_step = &plan.then[0];
        assert_eq!(root_step.operation_name.as_deref(), Some("GetUser"));
        let child = &root_step.then[0];
        assert_eq!(child.operation_name.as_deref(), Some("GetUser"));
    }
}
