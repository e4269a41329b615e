//! Query plan data model (spec.md §3) and the planner that produces it.

pub mod planner;

use std::collections::BTreeSet;
use std::fmt;

use apollo_compiler::ast;
use apollo_compiler::executable;
use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::Node;
use indexmap::IndexMap;

use crate::location::Location;

/// A path into the result tree, planner-level: bare field names only.
/// Executor-resolved paths carry positional/identity decoration and live in
/// [`crate::exec::path::ConcretePath`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct InsertionPoint(pub Vec<String>);

impl InsertionPoint {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn extended(&self, field: impl Into<String>) -> Self {
        let mut path = self.0.clone();
        path.push(field.into());
        Self(path)
    }
}

impl fmt::Display for InsertionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join("."))
    }
}

/// One node of the step tree (spec.md §3 `QueryPlanStep`). Immutable once
/// the planner finishes building it.
#[derive(Debug, Clone)]
pub struct QueryPlanStep {
    pub parent_type: String,
    pub selection_set: executable::SelectionSet,
    pub fragment_definitions: IndexMap<Name, Node<executable::Fragment>>,
    pub insertion_point: InsertionPoint,
    pub variables: BTreeSet<Name>,
    pub query_document: ExecutableDocument,
    pub query_string: String,
    /// The enclosing operation's name, carried through to the upstream
    /// request envelope (spec.md §4.4.c) — `None` for anonymous operations.
    pub operation_name: Option<Name>,
    pub location: Location,
    pub then: Vec<QueryPlanStep>,
}

impl QueryPlanStep {
    /// Whether this step must be dispatched via the `node(id: $id) { ... on
    /// ParentType { ... } }` boundary wrap (spec.md §4.2
    /// `buildQueryForStep`): true for every non-root step.
    pub fn is_boundary_wrapped(&self) -> bool {
        !matches!(
            self.parent_type.as_str(),
            "Query" | "Mutation" | "Subscription"
        )
    }
}

/// A rooted tree of [`QueryPlanStep`]s plus the metadata spec.md §3 names.
/// The root itself carries no upstream binding; `then` holds the first-wave
/// steps.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub operation_name: Option<Name>,
    pub operation_kind: ast::OperationType,
    pub variable_definitions: Vec<Node<ast::VariableDefinition>>,
    pub then: Vec<QueryPlanStep>,
    /// synthetic field name -> insertion points where it was auto-injected
    /// and must be removed before returning to the client.
    pub fields_to_scrub: IndexMap<String, Vec<InsertionPoint>>,
}

impl QueryPlan {
    /// Depth-first walk over every step in the plan, root's children first.
    pub fn steps(&self) -> impl Iterator<Item = &QueryPlanStep> {
        fn walk<'a>(steps: &'a [QueryPlanStep], out: &mut Vec<&'a QueryPlanStep>) {
            for step in steps {
                out.push(step);
                walk(&step.then, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.then, &mut out);
        out.into_iter()
    }
}
