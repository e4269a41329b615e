//! The gateway facade (spec.md §5): ties schema merging, planning, caching,
//! and execution together behind one entry point.
//!
//! The builder follows the consuming-`self` style of `apollo-router`'s
//! `TestHarness` (`apollo-router/src/test_harness.rs`): every setter takes
//! and returns `Self` so calls chain without an intermediate binding.

use std::collections::HashMap;
use std::sync::Arc;

use apollo_compiler::validation::Valid;
use apollo_compiler::ExecutableDocument;
use apollo_compiler::Schema;
use serde_json::Value;
use tracing::instrument;

use crate::cache::cache_key;
use crate::cache::AutomaticPersistedQueryRegistry;
use crate::cache::NoCache;
use crate::cache::PersistedQueryRequest;
use crate::cache::PlanCache;
use crate::error::GatewayError;
use crate::error::PlanError;
use crate::exec::ExecutionContext;
use crate::exec::Executor;
use crate::location::FieldLocationIndex;
use crate::location::Location;
use crate::merge::Merger;
use crate::merge::Upstream;
use crate::middleware::scrub_synthetic_fields;
use crate::middleware::Middleware;
use crate::plan::planner::PlanningContext;
use crate::plan::planner::Planner;
use crate::plan::QueryPlan;
use crate::queryer::GraphQlError;
use crate::queryer::QueryerFactory;

/// A client GraphQL request as it arrives at the facade (spec.md §5, §4.6).
#[derive(Debug, Clone, Default)]
pub struct GatewayRequest {
    pub query: Option<String>,
    pub sha256_hash: Option<String>,
    pub operation_name: Option<String>,
    pub variables: HashMap<String, Value>,
}

/// The top-level response shape (spec.md §6): `data` plus `errors`, either
/// of which may be absent depending on how far execution got.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GatewayResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQlError>,
}

/// The assembled gateway: a unified schema, its field-location index, and
/// the collaborators needed to plan and execute requests against it.
pub struct Gateway {
    schema: Valid<Schema>,
    field_locations: FieldLocationIndex,
    queryer_factory: Arc<dyn QueryerFactory>,
    plan_cache: Arc<dyn PlanCache>,
    persisted_queries: AutomaticPersistedQueryRegistry,
    middlewares: Vec<Middleware>,
    location_priorities: Option<Vec<Location>>,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    /// spec.md §5 end-to-end request handling: resolve APQ, check the plan
    /// cache, plan on a miss, execute, scrub synthetic fields, and return
    /// the wire-shaped response.
    #[instrument(skip_all)]
    pub async fn execute(&self, request: GatewayRequest) -> GatewayResponse {
        match self.execute_inner(request).await {
            Ok(response) => response,
            Err(err) => GatewayResponse {
                data: None,
                errors: vec![err.to_graphql_error()],
            },
        }
    }

    async fn execute_inner(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let query_text = self.persisted_queries.resolve(&PersistedQueryRequest {
            query: request.query,
            sha256_hash: request.sha256_hash,
            operation_name: request.operation_name.clone(),
        })?;

        let plans = self.plans_for(&query_text)?;
        let plan = select_operation(&plans, request.operation_name.as_deref())?;

        let ctx = ExecutionContext {
            queryer_factory: self.queryer_factory.as_ref(),
            middlewares: &self.middlewares,
            variables: &request.variables,
        };
        let (mut data, errors) = Executor::execute(&ctx, plan).await?;
        scrub_synthetic_fields(&mut data, &plan.fields_to_scrub);

        Ok(GatewayResponse {
            data: Some(data),
            errors,
        })
    }

    /// Plans `query_text` without executing it — the same planning path
    /// `execute` uses internally, exposed for callers that want to inspect
    /// or snapshot a plan (spec.md §4.8 `GetPlans`).
    pub fn get_plans(&self, query_text: &str) -> Result<Arc<Vec<QueryPlan>>, GatewayError> {
        self.plans_for(query_text)
    }

    /// Returns the cached plans for `query_text`, planning and populating
    /// the cache on a miss (spec.md §4.6).
    fn plans_for(&self, query_text: &str) -> Result<Arc<Vec<QueryPlan>>, GatewayError> {
        let key = cache_key(query_text);
        if let Some(plans) = self.plan_cache.get(&key) {
            return Ok(plans);
        }

        let document = ExecutableDocument::parse_and_validate(&self.schema, query_text, "query.graphql")
            .map_err(|e| PlanError::Validation(e.to_string()))?;
        let planning_ctx = PlanningContext {
            schema: &self.schema,
            field_locations: &self.field_locations,
            location_priorities: self.location_priorities.as_deref(),
        };
        let plans = Arc::new(Planner::plan(&planning_ctx, &document)?);
        self.plan_cache.insert(key, plans.clone());
        Ok(plans)
    }
}

fn select_operation<'a>(
    plans: &'a [QueryPlan],
    operation_name: Option<&str>,
) -> Result<&'a QueryPlan, GatewayError> {
    match operation_name {
        Some(name) => plans
            .iter()
            .find(|plan| plan.operation_name.as_deref() == Some(name))
            .ok_or_else(|| GatewayError::Plan(PlanError::UnknownOperation(name.to_string()))),
        None if plans.len() == 1 => Ok(&plans[0]),
        None => Err(GatewayError::Plan(PlanError::UnknownOperation(
            "<anonymous>".to_string(),
        ))),
    }
}

/// Consuming-self builder for [`Gateway`] (spec.md §5).
pub struct GatewayBuilder {
    upstreams: Vec<Upstream>,
    queryer_factory: Option<Arc<dyn QueryerFactory>>,
    plan_cache: Option<Arc<dyn PlanCache>>,
    middlewares: Vec<Middleware>,
    location_priorities: Option<Vec<Location>>,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self {
            upstreams: Vec::new(),
            queryer_factory: None,
            plan_cache: None,
            middlewares: Vec::new(),
            location_priorities: None,
        }
    }
}

impl GatewayBuilder {
    pub fn upstream(mut self, location: impl Into<Location>, schema: Valid<Schema>) -> Self {
        self.upstreams.push(Upstream {
            location: location.into(),
            schema,
        });
        self
    }

    pub fn queryer_factory(mut self, factory: Arc<dyn QueryerFactory>) -> Self {
        self.queryer_factory = Some(factory);
        self
    }

    pub fn plan_cache(mut self, cache: Arc<dyn PlanCache>) -> Self {
        self.plan_cache = Some(cache);
        self
    }

    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn location_priorities(mut self, priorities: Vec<Location>) -> Self {
        self.location_priorities = Some(priorities);
        self
    }

    /// spec.md §4.1: merges every registered upstream into the unified
    /// schema, builds the field-location index, and assembles the gateway.
    pub fn build(self) -> Result<Gateway, GatewayError> {
        let (schema, field_locations) = Merger::merge(&self.upstreams)?;
        let queryer_factory = self
            .queryer_factory
            .unwrap_or_else(|| Arc::new(crate::queryer::StaticQueryerFactory::new(NoUpstreamQueryer)));
        Ok(Gateway {
            schema,
            field_locations,
            queryer_factory,
            plan_cache: self.plan_cache.unwrap_or_else(|| Arc::new(NoCache)),
            persisted_queries: AutomaticPersistedQueryRegistry::new(),
            middlewares: self.middlewares,
            location_priorities: self.location_priorities,
        })
    }
}

/// The default queryer when none is configured: every dispatch fails with a
/// clear transport error instead of panicking, so a gateway built without a
/// queryer still fails requests gracefully rather than at construction time.
struct NoUpstreamQueryer;

#[async_trait::async_trait]
impl crate::queryer::Queryer for NoUpstreamQueryer {
    async fn query(
        &self,
        location: &Location,
        _request: crate::queryer::QueryerRequest,
    ) -> Result<crate::queryer::QueryerResponse, crate::error::ExecutionError> {
        Err(crate::error::ExecutionError::Transport {
            location: location.to_string(),
            message: "gateway built without a queryer factory".into(),
        })
    }
}
