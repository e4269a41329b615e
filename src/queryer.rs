//! Upstream transport abstraction (spec.md §4.5 `Queryer`).
//!
//! A [`Queryer`] is the only thing in this crate that knows how to actually
//! reach a [`crate::location::Location`]. The executor is generic over it;
//! [`HttpQueryer`] is the default production implementation, grounded on
//! `apollo-federation`'s `connectors::runtime::http` request/response shape.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::ExecutionError;
use crate::location::Location;

/// One GraphQL request dispatched to an upstream (spec.md §4.5).
#[derive(Debug, Clone, Serialize)]
pub struct QueryerRequest {
    pub query: String,
    #[serde(rename = "operationName", skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    pub variables: HashMap<String, Value>,
    /// Outgoing transport headers, populated by request middleware (e.g. a
    /// trace-context propagator). Not part of the GraphQL-over-HTTP body.
    #[serde(skip)]
    pub headers: http::HeaderMap,
}

impl QueryerRequest {
    pub fn new(query: String, variables: HashMap<String, Value>) -> Self {
        Self {
            query,
            operation_name: None,
            variables,
            headers: http::HeaderMap::new(),
        }
    }
}

/// A single GraphQL error as it appears in an upstream or top-level response
/// (spec.md §6 wire contract).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GraphQlError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

/// One GraphQL response as received from an upstream.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct QueryerResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

/// Dispatches one rendered [`crate::plan::QueryPlanStep`]'s request to its
/// [`Location`] and returns the raw response (spec.md §4.5).
#[async_trait]
pub trait Queryer: Send + Sync {
    async fn query(
        &self,
        location: &Location,
        request: QueryerRequest,
    ) -> Result<QueryerResponse, ExecutionError>;
}

/// Looks up a [`Queryer`] for a [`Location`] — the gateway facade holds one
/// of these rather than a single `Queryer`, since different upstreams may
/// need different transports (spec.md §4.5 "Queryer factory").
pub trait QueryerFactory: Send + Sync {
    fn queryer_for(&self, location: &Location) -> Option<Arc<dyn Queryer>>;
}

/// The default HTTP transport: one upstream URL per [`Location`], JSON over
/// POST, grounded on `apollo-federation`'s connector HTTP runtime shape.
pub struct HttpQueryer {
    client: reqwest::Client,
    endpoints: HashMap<Location, url::Url>,
}

impl HttpQueryer {
    pub fn new(endpoints: HashMap<Location, url::Url>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
        }
    }

    pub fn with_client(client: reqwest::Client, endpoints: HashMap<Location, url::Url>) -> Self {
        Self { client, endpoints }
    }
}

#[async_trait]
impl Queryer for HttpQueryer {
    async fn query(
        &self,
        location: &Location,
        request: QueryerRequest,
    ) -> Result<QueryerResponse, ExecutionError> {
        let endpoint = self.endpoints.get(location).ok_or_else(|| ExecutionError::Transport {
            location: location.to_string(),
            message: "no endpoint registered for this location".into(),
        })?;

        let response = self
            .client
            .post(endpoint.clone())
            .headers(request.headers.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| ExecutionError::Transport {
                location: location.to_string(),
                message: e.to_string(),
            })?;

        response
            .json::<QueryerResponse>()
            .await
            .map_err(|e| ExecutionError::Transport {
                location: location.to_string(),
                message: format!("invalid upstream response body: {e}"),
            })
    }
}

/// A [`QueryerFactory`] that always hands back the same [`HttpQueryer`],
/// suitable when every upstream is reachable over HTTP.
pub struct StaticQueryerFactory<Q> {
    queryer: Arc<Q>,
}

impl<Q: Queryer + 'static> StaticQueryerFactory<Q> {
    pub fn new(queryer: Q) -> Self {
        Self {
            queryer: Arc::new(queryer),
        }
    }
}

impl<Q: Queryer + 'static> QueryerFactory for StaticQueryerFactory<Q> {
    fn queryer_for(&self, _location: &Location) -> Option<Arc<dyn Queryer>> {
        Some(self.queryer.clone())
    }
}

/// A queryer that resolves fields by calling a plain Rust closure rather
/// than dispatching over the network — used for gateway-owned fields such as
/// the synthetic `node` accessor, and in tests (spec.md §4.5 "In-process
/// queryer").
pub struct FunctionQueryer<F> {
    resolver: F,
}

impl<F> FunctionQueryer<F>
where
    F: Fn(&QueryerRequest) -> Result<QueryerResponse, ExecutionError> + Send + Sync,
{
    pub fn new(resolver: F) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl<F> Queryer for FunctionQueryer<F>
where
    F: Fn(&QueryerRequest) -> Result<QueryerResponse, ExecutionError> + Send + Sync,
{
    async fn query(
        &self,
        _location: &Location,
        request: QueryerRequest,
    ) -> Result<QueryerResponse, ExecutionError> {
        (self.resolver)(&request)
    }
}

/// Like [`FunctionQueryer`] but for async resolvers that live in the same
/// process as the gateway — e.g. a plugin implemented in Rust rather than a
/// remote HTTP service. The synthetic `node` location is the common case,
/// but any upstream the gateway can satisfy without a network round trip
/// fits here (spec.md §4.5 "in-process queryer").
pub struct InProcessQueryer<F> {
    resolver: F,
}

impl<F, Fut> InProcessQueryer<F>
where
    F: Fn(QueryerRequest) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<QueryerResponse, ExecutionError>> + Send,
{
    pub fn new(resolver: F) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl<F, Fut> Queryer for InProcessQueryer<F>
where
    F: Fn(QueryerRequest) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<QueryerResponse, ExecutionError>> + Send,
{
    async fn query(
        &self,
        _location: &Location,
        request: QueryerRequest,
    ) -> Result<QueryerResponse, ExecutionError> {
        (self.resolver)(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn function_queryer_invokes_closure() {
        let queryer = FunctionQueryer::new(|_req: &QueryerRequest| {
            Ok(QueryerResponse {
                data: Some(json!({ "node": { "id": "1" } })),
                errors: vec![],
            })
        });
        let response = queryer
            .query(
                &Location::internal(),
                QueryerRequest::new("{ node(id: \"1\") { id } }".into(), HashMap::new()),
            )
            .await
            .unwrap();
        assert_eq!(response.data, Some(json!({ "node": { "id": "1" } })));
    }
}
