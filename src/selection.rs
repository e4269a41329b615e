//! Selection-set utilities (spec.md §4.2): flattening fragments, computing
//! free variables, and building the per-step upstream document.
//!
//! These are pure functions over `apollo_compiler::executable` types — the
//! parser and AST themselves are the external collaborator named in
//! spec.md §1, this module only ever consumes already-parsed documents.

use std::collections::BTreeSet;

use apollo_compiler::ast;
use apollo_compiler::executable;
use apollo_compiler::Name;
use apollo_compiler::Node;
use indexmap::IndexMap;

use crate::error::PlanError;

/// The outcome of evaluating a `@skip`/`@include` directive whose argument is
/// a literal boolean. Variable-valued directives are left for execution-time
/// evaluation (spec.md §4.2) and are reported back to the caller instead.
enum LiteralCondition {
    /// The directive's literal condition excludes this selection outright.
    Excluded,
    /// No literal directive applies, or it literally includes the selection.
    Included,
    /// The directive argument is a variable; defer to execution time.
    Deferred,
}

fn literal_condition(directives: &ast::DirectiveList) -> Result<LiteralCondition, PlanError> {
    if let Some(skip) = directives.get("skip") {
        match skip.specified_argument_by_name("if").map(Node::as_ref) {
            Some(ast::Value::Boolean(true)) => return Ok(LiteralCondition::Excluded),
            Some(ast::Value::Boolean(false)) => {}
            Some(ast::Value::Variable(_)) | None => return Ok(LiteralCondition::Deferred),
            Some(other) => {
                return Err(PlanError::UnsupportedDirectiveArgument {
                    name: "skip".into(),
                    argument: other.to_string(),
                })
            }
        }
    }
    if let Some(include) = directives.get("include") {
        match include.specified_argument_by_name("if").map(Node::as_ref) {
            Some(ast::Value::Boolean(false)) => return Ok(LiteralCondition::Excluded),
            Some(ast::Value::Boolean(true)) => {}
            Some(ast::Value::Variable(_)) | None => return Ok(LiteralCondition::Deferred),
            Some(other) => {
                return Err(PlanError::UnsupportedDirectiveArgument {
                    name: "include".into(),
                    argument: other.to_string(),
                })
            }
        }
    }
    Ok(LiteralCondition::Included)
}

/// Recursively inlines every `FragmentSpread`/`InlineFragment` in
/// `selection_set` into a flat list of `Field` selections, respecting
/// literal `@skip`/`@include` directives. Duplicate fields by response key
/// are merged by union-ing their sub-selections (spec.md §4.2).
pub fn apply_fragments(
    selection_set: &executable::SelectionSet,
    fragment_defs: &IndexMap<Name, Node<executable::Fragment>>,
) -> Result<Vec<Node<executable::Field>>, PlanError> {
    let mut merged: IndexMap<String, Node<executable::Field>> = IndexMap::new();
    flatten_into(selection_set, fragment_defs, &mut merged)?;
    Ok(merged.into_values().collect())
}

fn flatten_into(
    selection_set: &executable::SelectionSet,
    fragment_defs: &IndexMap<Name, Node<executable::Fragment>>,
    out: &mut IndexMap<String, Node<executable::Field>>,
) -> Result<(), PlanError> {
    for selection in &selection_set.selections {
        match selection {
            executable::Selection::Field(field) => {
                match literal_condition(&field.directives)? {
                    LiteralCondition::Excluded => continue,
                    LiteralCondition::Included | LiteralCondition::Deferred => {}
                }
                let key = field
                    .alias
                    .as_ref()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| field.name.to_string());
                merge_field_into(out, key, field.clone());
            }
            executable::Selection::FragmentSpread(spread) => {
                match literal_condition(&spread.directives)? {
                    LiteralCondition::Excluded => continue,
                    LiteralCondition::Included | LiteralCondition::Deferred => {}
                }
                let fragment = fragment_defs
                    .get(&spread.fragment_name)
                    .ok_or_else(|| PlanError::UnknownFragment(spread.fragment_name.to_string()))?;
                flatten_into(&fragment.selection_set, fragment_defs, out)?;
            }
            executable::Selection::InlineFragment(inline) => {
                match literal_condition(&inline.directives)? {
                    LiteralCondition::Excluded => continue,
                    LiteralCondition::Included | LiteralCondition::Deferred => {}
                }
                flatten_into(&inline.selection_set, fragment_defs, out)?;
            }
        }
    }
    Ok(())
}

fn merge_field_into(
    out: &mut IndexMap<String, Node<executable::Field>>,
    key: String,
    field: Node<executable::Field>,
) {
    match out.get(&key) {
        None => {
            out.insert(key, field);
        }
        Some(existing) if existing.selection_set.selections.is_empty() => {
            out.insert(key, field);
        }
        Some(existing) => {
            let mut merged = (**existing).clone();
            merged
                .selection_set
                .selections
                .extend(field.selection_set.selections.iter().cloned());
            out.insert(key, Node::new(merged));
        }
    }
}

/// Returns the set of variable names referenced in arguments and directive
/// arguments throughout `selection_set` and any nested fragments (spec.md
/// §4.2).
pub fn extract_variables(
    selection_set: &executable::SelectionSet,
    fragment_defs: &IndexMap<Name, Node<executable::Fragment>>,
) -> BTreeSet<Name> {
    let mut out = BTreeSet::new();
    collect_variables(selection_set, fragment_defs, &mut out);
    out
}

fn collect_variables(
    selection_set: &executable::SelectionSet,
    fragment_defs: &IndexMap<Name, Node<executable::Fragment>>,
    out: &mut BTreeSet<Name>,
) {
    for selection in &selection_set.selections {
        match selection {
            executable::Selection::Field(field) => {
                collect_from_arguments(&field.arguments, out);
                collect_from_directives(&field.directives, out);
                collect_variables(&field.selection_set, fragment_defs, out);
            }
            executable::Selection::FragmentSpread(spread) => {
                collect_from_directives(&spread.directives, out);
                if let Some(fragment) = fragment_defs.get(&spread.fragment_name) {
                    collect_variables(&fragment.selection_set, fragment_defs, out);
                }
            }
            executable::Selection::InlineFragment(inline) => {
                collect_from_directives(&inline.directives, out);
                collect_variables(&inline.selection_set, fragment_defs, out);
            }
        }
    }
}

fn collect_from_arguments(arguments: &[Node<ast::Argument>], out: &mut BTreeSet<Name>) {
    for argument in arguments {
        collect_from_value(&argument.value, out);
    }
}

fn collect_from_directives(directives: &ast::DirectiveList, out: &mut BTreeSet<Name>) {
    for directive in directives.iter() {
        collect_from_arguments(&directive.arguments, out);
    }
}

fn collect_from_value(value: &ast::Value, out: &mut BTreeSet<Name>) {
    match value {
        ast::Value::Variable(name) => {
            out.insert(name.clone());
        }
        ast::Value::List(items) => {
            for item in items {
                collect_from_value(item, out);
            }
        }
        ast::Value::Object(fields) => {
            for (_, v) in fields {
                collect_from_value(v, out);
            }
        }
        _ => {}
    }
}
