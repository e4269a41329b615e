//! The plan executor (spec.md §4.4): drives a [`QueryPlan`] to completion
//! against a set of [`Queryer`]s, stitching every step's response into one
//! result tree.

pub mod path;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::instrument;
use tracing::warn;

use crate::error::ExecutionError;
use crate::middleware::Middleware;
use crate::plan::QueryPlan;
use crate::plan::QueryPlanStep;
use crate::queryer::GraphQlError;
use crate::queryer::QueryerFactory;
use crate::queryer::QueryerRequest;

/// Everything the executor needs beyond the plan itself.
pub struct ExecutionContext<'a> {
    pub queryer_factory: &'a dyn QueryerFactory,
    pub middlewares: &'a [Middleware],
    /// Top-level operation variables supplied by the client request.
    pub variables: &'a HashMap<String, Value>,
}

/// Drives one [`QueryPlan`] and returns the stitched result tree plus any
/// upstream GraphQL errors collected along the way (spec.md §4.4, §6).
pub struct Executor;

struct Shared {
    tree: Mutex<Value>,
    errors: Mutex<Vec<GraphQlError>>,
}

impl Executor {
    #[instrument(skip_all, fields(operation = %plan.operation_name.as_deref().unwrap_or("<anonymous>")))]
    pub async fn execute(
        ctx: &ExecutionContext<'_>,
        plan: &QueryPlan,
    ) -> Result<(Value, Vec<GraphQlError>), ExecutionError> {
        let shared = Arc::new(Shared {
            tree: Mutex::new(Value::Object(Default::default())),
            errors: Mutex::new(Vec::new()),
        });

        let root_point = path::ConcretePath::default();
        let futures = plan
            .then
            .iter()
            .map(|step| Self::run_step(ctx, shared.clone(), step, root_point.clone()));
        join_all(futures).await;

        let tree = shared.tree.lock().clone();
        let errors = shared.errors.lock().clone();
        Ok((tree, errors))
    }

    /// Dispatches `step` at the single concrete `point` it was scheduled at,
    /// stitches the response in, then fans out to its children at every
    /// concrete insertion point their own selection set resolves to inside
    /// this step's freshly stitched data (spec.md §4.4 steps 3-6).
    fn run_step<'a>(
        ctx: &'a ExecutionContext<'a>,
        shared: Arc<Shared>,
        step: &'a QueryPlanStep,
        point: path::ConcretePath,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let mut variables: HashMap<String, Value> = step
                .variables
                .iter()
                .filter_map(|name| {
                    ctx.variables
                        .get(name.as_str())
                        .map(|v| (name.to_string(), v.clone()))
                })
                .collect();
            if step.is_boundary_wrapped() {
                match point.id() {
                    Some(id) => {
                        variables.insert("id".to_string(), Value::String(id.to_string()));
                    }
                    None => {
                        warn!(point = %point, "boundary step scheduled without an id; skipping");
                        return;
                    }
                }
            }

            let mut request = QueryerRequest::new(step.query_string.clone(), variables);
            request.operation_name = step.operation_name.as_ref().map(|name| name.to_string());
            for middleware in ctx.middlewares {
                if let Middleware::Request(m) = middleware {
                    m.on_request(step, &point, &mut request).await;
                }
            }

            let queryer = match ctx.queryer_factory.queryer_for(&step.location) {
                Some(q) => q,
                None => {
                    shared.errors.lock().push(GraphQlError {
                        message: format!("no queryer registered for location {}", step.location),
                        path: None,
                        extensions: None,
                    });
                    return;
                }
            };

            let mut response = match queryer.query(&step.location, request).await {
                Ok(response) => response,
                Err(err) => {
                    shared.errors.lock().push(GraphQlError {
                        message: err.to_string(),
                        path: None,
                        extensions: None,
                    });
                    return;
                }
            };
            for middleware in ctx.middlewares {
                if let Middleware::Response(m) = middleware {
                    m.on_response(step, &point, &mut response).await;
                }
            }
            shared.errors.lock().extend(response.errors);

            let Some(mut data) = response.data else {
                return;
            };
            if step.is_boundary_wrapped() {
                data = match unwrap_node(data) {
                    Some(inner) => inner,
                    None => return,
                };
            }
            if data.is_null() {
                return;
            }

            {
                let mut tree = shared.tree.lock();
                path::insert_object(&mut tree, &point, data);
            }

            if step.then.is_empty() {
                return;
            }

            let tree_snapshot = shared.tree.lock().clone();
            let Some(local_view) = path::extract_value(&tree_snapshot, &point) else {
                return;
            };
            let child_futures = step.then.iter().flat_map(|child| {
                let relative = relative_point(&point, &child.insertion_point);
                path::find_insertion_points(&relative, &step.selection_set, local_view)
                    .into_iter()
                    .map(move |concrete| Self::run_step(ctx, shared.clone(), child, concrete))
            });
            join_all(child_futures).await;
        })
    }
}

/// A child step's `insertion_point` is absolute from the plan root; to find
/// it inside the data we just stitched at `parent_point` we need the
/// remaining suffix relative to the parent's own position.
fn relative_point(
    parent_point: &path::ConcretePath,
    child_absolute: &crate::plan::InsertionPoint,
) -> crate::plan::InsertionPoint {
    crate::plan::InsertionPoint(child_absolute.0[parent_point.0.len()..].to_vec())
}

/// Strips the `node(id: ...) { ... on T { ... } }` wrapper off a boundary
/// step's response, returning the inline fragment's selection data
/// (spec.md §4.4.d).
fn unwrap_node(data: Value) -> Option<Value> {
    match data {
        Value::Object(mut map) => map.swap_remove("node"),
        other => Some(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Location;
    use crate::queryer::Queryer;
    use crate::queryer::QueryerResponse;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    struct RecordingQueryer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Queryer for RecordingQueryer {
        async fn query(
            &self,
            _location: &Location,
            request: QueryerRequest,
        ) -> Result<QueryerResponse, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.query.contains("node(") {
                Ok(QueryerResponse {
                    data: Some(
                        json!({ "node": { "favoriteCatPhoto": { "url": "https://example.com/cat.png" } } }),
                    ),
                    errors: vec![],
                })
            } else {
                Ok(QueryerResponse {
                    data: Some(json!({ "user": { "firstName": "Ada", "id": "u1" } })),
                    errors: vec![],
                })
            }
        }
    }

    struct SingleQueryerFactory(Arc<RecordingQueryer>);

    impl QueryerFactory for SingleQueryerFactory {
        fn queryer_for(&self, _location: &Location) -> Option<Arc<dyn Queryer>> {
            Some(self.0.clone() as Arc<dyn Queryer>)
        }
    }

    #[tokio::test]
    async fn stitches_boundary_child_at_parent_id() {
        use crate::plan::InsertionPoint;
        use apollo_compiler::Schema;

        let schema = Schema::parse_and_validate(
            "type Query { user: User } type User { id: ID! firstName: String favoriteCatPhoto: Photo } type Photo { url: String }",
            "s.graphql",
        )
        .unwrap();
        let doc = apollo_compiler::ExecutableDocument::parse_and_validate(
            &schema,
            "{ user { firstName favoriteCatPhoto { url } } }",
            "q.graphql",
        )
        .unwrap();
        let op = doc.operations.get(None).unwrap();
        let user_field_set = op.selection_set.clone();

        let child_selection = apollo_compiler::executable::SelectionSet {
            ty: apollo_compiler::name!("Photo"),
            selections: vec![],
        };
        let mut document = apollo_compiler::ExecutableDocument::new();
        document.insert_operation(apollo_compiler::executable::Operation {
            operation_type: apollo_compiler::ast::OperationType::Query,
            name: None,
            variables: vec![],
            directives: Default::default(),
            selection_set: child_selection.clone(),
        });

        let child_step = QueryPlanStep {
            parent_type: "User".into(),
            selection_set: child_selection,
            fragment_definitions: Default::default(),
            insertion_point: InsertionPoint(vec!["user".into()]),
            variables: Default::default(),
            query_document: document.clone(),
            query_string: "query($id: ID!) { node(id: $id) { ... on User { favoriteCatPhoto { url } } } }".into(),
            operation_name: None,
            location: Location::new("b"),
            then: vec![],
        };

        let mut root_document = apollo_compiler::ExecutableDocument::new();
        root_document.insert_operation(apollo_compiler::executable::Operation {
            operation_type: apollo_compiler::ast::OperationType::Query,
            name: None,
            variables: vec![],
            directives: Default::default(),
            selection_set: user_field_set.clone(),
        });
        let root_step = QueryPlanStep {
            parent_type: "Query".into(),
            selection_set: user_field_set,
            fragment_definitions: Default::default(),
            insertion_point: InsertionPoint::root(),
            variables: Default::default(),
            query_document: root_document,
            query_string: "{ user { firstName favoriteCatPhoto { url } id } }".into(),
            operation_name: None,
            location: Location::new("a"),
            then: vec![child_step],
        };

        let plan = QueryPlan {
            operation_name: None,
            operation_kind: apollo_compiler::ast::OperationType::Query,
            variable_definitions: vec![],
            then: vec![root_step],
            fields_to_scrub: Default::default(),
        };

        let queryer = Arc::new(RecordingQueryer {
            calls: AtomicUsize::new(0),
        });
        let factory = SingleQueryerFactory(queryer.clone());
        let variables = HashMap::new();
        let ctx = ExecutionContext {
            queryer_factory: &factory,
            middlewares: &[],
            variables: &variables,
        };

        let (tree, errors) = Executor::execute(&ctx, &plan).await.unwrap();
        assert!(errors.is_empty());
        assert_eq!(queryer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            tree,
            json!({ "user": { "firstName": "Ada", "id": "u1", "favoriteCatPhoto": { "url": "https://example.com/cat.png" } } })
        );
    }
}
