//! End-to-end coverage over [`federation_gateway::Gateway`]: each test wires
//! up real upstream mock servers via `wiremock` and drives a request all
//! the way from GraphQL text to a stitched response, the way
//! `apollo-router`'s `TestHarness` integration tests exercise the whole
//! request pipeline rather than individual services in isolation.

use std::collections::HashMap;
use std::sync::Arc;

use apollo_compiler::Schema;
use federation_gateway::gateway::GatewayRequest;
use federation_gateway::queryer::HttpQueryer;
use federation_gateway::queryer::StaticQueryerFactory;
use federation_gateway::Gateway;
use federation_gateway::Location;
use serde_json::json;
use serde_json::Value;
use wiremock::matchers::method;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::Request;
use wiremock::ResponseTemplate;

/// Matches a mocked upstream request by a substring of its GraphQL query
/// text, since each test's two upstreams are told apart by which query
/// shape they expect, not by their request path.
struct BodyContains(&'static str);

impl wiremock::Match for BodyContains {
    fn matches(&self, request: &Request) -> bool {
        String::from_utf8_lossy(&request.body).contains(self.0)
    }
}

async fn mount_response(server: &MockServer, query_fragment: &'static str, body: Value) {
    Mock::given(method("POST"))
        .and(BodyContains(query_fragment))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn endpoint(server: &MockServer) -> url::Url {
    url::Url::parse(&server.uri()).unwrap()
}

#[tokio::test]
async fn single_service_one_field() {
    let service = MockServer::start().await;
    mount_response(
        &service,
        "favoriteCatPhoto",
        json!({ "data": { "favoriteCatPhoto": { "url": "https://example.com/cat.png" } } }),
    )
    .await;

    let schema = Schema::parse_and_validate(
        "type Query { favoriteCatPhoto: Photo } type Photo { url: String }",
        "schema.graphql",
    )
    .unwrap();
    let mut endpoints = HashMap::new();
    endpoints.insert(Location::new("a"), endpoint(&service));

    let gateway = Gateway::builder()
        .upstream("a", schema)
        .queryer_factory(Arc::new(StaticQueryerFactory::new(HttpQueryer::new(endpoints))))
        .build()
        .unwrap();

    let response = gateway
        .execute(GatewayRequest {
            query: Some("{ favoriteCatPhoto { url } }".into()),
            ..Default::default()
        })
        .await;

    assert!(response.errors.is_empty());
    assert_eq!(
        response.data,
        Some(json!({ "favoriteCatPhoto": { "url": "https://example.com/cat.png" } }))
    );
}

#[tokio::test]
async fn two_service_boundary_object_and_scrubbing() {
    let service_a = MockServer::start().await;
    let service_b = MockServer::start().await;
    mount_response(
        &service_a,
        "firstName",
        json!({ "data": { "user": { "firstName": "Ada", "id": "u1" } } }),
    )
    .await;
    mount_response(
        &service_b,
        "node(",
        json!({ "data": { "node": { "favoriteCatPhoto": { "url": "https://example.com/cat.png" } } } }),
    )
    .await;

    let schema_a = Schema::parse_and_validate(
        "type Query { user: User } type User { id: ID! firstName: String }",
        "a.graphql",
    )
    .unwrap();
    let schema_b = Schema::parse_and_validate(
        "type Query { user: User } type User { favoriteCatPhoto: Photo } type Photo { url: String }",
        "b.graphql",
    )
    .unwrap();

    let mut endpoints = HashMap::new();
    endpoints.insert(Location::new("a"), endpoint(&service_a));
    endpoints.insert(Location::new("b"), endpoint(&service_b));

    let gateway = Gateway::builder()
        .upstream("a", schema_a)
        .upstream("b", schema_b)
        .queryer_factory(Arc::new(StaticQueryerFactory::new(HttpQueryer::new(endpoints))))
        .build()
        .unwrap();

    let response = gateway
        .execute(GatewayRequest {
            query: Some("{ user { firstName favoriteCatPhoto { url } } }".into()),
            ..Default::default()
        })
        .await;

    assert!(response.errors.is_empty());
    let data = response.data.unwrap();
    assert_eq!(
        data,
        json!({
            "user": {
                "firstName": "Ada",
                "favoriteCatPhoto": { "url": "https://example.com/cat.png" }
            }
        })
    );
    // the synthetic `id` used to stitch across services must never leak.
    assert!(data["user"].get("id").is_none());
}

#[tokio::test]
async fn fragment_spread_triggers_boundary_descent() {
    let service_a = MockServer::start().await;
    let service_b = MockServer::start().await;
    mount_response(
        &service_a,
        "firstName",
        json!({ "data": { "user": { "firstName": "Ada", "id": "u1" } } }),
    )
    .await;
    mount_response(
        &service_b,
        "node(",
        json!({ "data": { "node": { "favoriteCatPhoto": { "url": "https://example.com/cat.png" } } } }),
    )
    .await;

    let schema_a = Schema::parse_and_validate(
        "type Query { user: User } type User { id: ID! firstName: String }",
        "a.graphql",
    )
    .unwrap();
    let schema_b = Schema::parse_and_validate(
        "type Query { user: User } type User { favoriteCatPhoto: Photo } type Photo { url: String }",
        "b.graphql",
    )
    .unwrap();

    let mut endpoints = HashMap::new();
    endpoints.insert(Location::new("a"), endpoint(&service_a));
    endpoints.insert(Location::new("b"), endpoint(&service_b));

    let gateway = Gateway::builder()
        .upstream("a", schema_a)
        .upstream("b", schema_b)
        .queryer_factory(Arc::new(StaticQueryerFactory::new(HttpQueryer::new(endpoints))))
        .build()
        .unwrap();

    let response = gateway
        .execute(GatewayRequest {
            query: Some(
                "{ user { ...UserFields } } fragment UserFields on User { firstName favoriteCatPhoto { url } }"
                    .into(),
            ),
            ..Default::default()
        })
        .await;

    assert!(response.errors.is_empty());
    assert_eq!(
        response.data,
        Some(json!({
            "user": {
                "firstName": "Ada",
                "favoriteCatPhoto": { "url": "https://example.com/cat.png" }
            }
        }))
    );
}

#[tokio::test]
async fn list_fan_out_dispatches_one_request_per_element() {
    let service_a = MockServer::start().await;
    let service_b = MockServer::start().await;
    mount_response(
        &service_a,
        "friends",
        json!({
            "data": {
                "users": [
                    { "id": "1", "friends": [{ "id": "10" }, { "id": "11" }] },
                    { "id": "2", "friends": [{ "id": "20" }] }
                ]
            }
        }),
    )
    .await;
    mount_response(
        &service_b,
        "node(",
        json!({ "data": { "node": { "handle": "h" } } }),
    )
    .await;

    let schema_a = Schema::parse_and_validate(
        "type Query { users: [User] } type User { id: ID! friends: [User] }",
        "a.graphql",
    )
    .unwrap();
    let schema_b = Schema::parse_and_validate(
        "type Query { users: [User] } type User { handle: String }",
        "b.graphql",
    )
    .unwrap();

    let mut endpoints = HashMap::new();
    endpoints.insert(Location::new("a"), endpoint(&service_a));
    endpoints.insert(Location::new("b"), endpoint(&service_b));

    let gateway = Gateway::builder()
        .upstream("a", schema_a)
        .upstream("b", schema_b)
        .queryer_factory(Arc::new(StaticQueryerFactory::new(HttpQueryer::new(endpoints))))
        .build()
        .unwrap();

    let response = gateway
        .execute(GatewayRequest {
            query: Some("{ users { friends { handle } } }".into()),
            ..Default::default()
        })
        .await;

    assert!(response.errors.is_empty());
    let data = response.data.unwrap();
    let friends = &data["users"][0]["friends"];
    assert_eq!(friends[0]["handle"], json!("h"));
    assert_eq!(friends[1]["handle"], json!("h"));
}

#[tokio::test]
async fn literal_include_false_skips_the_field_entirely() {
    let service = MockServer::start().await;
    mount_response(
        &service,
        "firstName",
        json!({ "data": { "user": { "firstName": "Ada" } } }),
    )
    .await;

    let schema = Schema::parse_and_validate(
        "type Query { user: User } type User { id: ID! firstName: String lastName: String }",
        "schema.graphql",
    )
    .unwrap();
    let mut endpoints = HashMap::new();
    endpoints.insert(Location::new("a"), endpoint(&service));

    let gateway = Gateway::builder()
        .upstream("a", schema)
        .queryer_factory(Arc::new(StaticQueryerFactory::new(HttpQueryer::new(endpoints))))
        .build()
        .unwrap();

    let response = gateway
        .execute(GatewayRequest {
            query: Some("{ user { firstName lastName @include(if: false) } }".into()),
            ..Default::default()
        })
        .await;

    assert!(response.errors.is_empty());
    assert_eq!(response.data, Some(json!({ "user": { "firstName": "Ada" } })));
}

#[tokio::test]
async fn upstream_errors_from_both_services_are_aggregated() {
    let service_a = MockServer::start().await;
    let service_b = MockServer::start().await;
    mount_response(
        &service_a,
        "firstName",
        json!({
            "data": { "user": { "firstName": null, "id": "u1" } },
            "errors": [{ "message": "firstName failed upstream" }]
        }),
    )
    .await;
    mount_response(
        &service_b,
        "node(",
        json!({
            "data": { "node": null },
            "errors": [{ "message": "favoriteCatPhoto failed upstream" }]
        }),
    )
    .await;

    let schema_a = Schema::parse_and_validate(
        "type Query { user: User } type User { id: ID! firstName: String }",
        "a.graphql",
    )
    .unwrap();
    let schema_b = Schema::parse_and_validate(
        "type Query { user: User } type User { favoriteCatPhoto: Photo } type Photo { url: String }",
        "b.graphql",
    )
    .unwrap();
    let mut endpoints = HashMap::new();
    endpoints.insert(Location::new("a"), endpoint(&service_a));
    endpoints.insert(Location::new("b"), endpoint(&service_b));

    let gateway = Gateway::builder()
        .upstream("a", schema_a)
        .upstream("b", schema_b)
        .queryer_factory(Arc::new(StaticQueryerFactory::new(HttpQueryer::new(endpoints))))
        .build()
        .unwrap();

    let response = gateway
        .execute(GatewayRequest {
            query: Some("{ user { firstName favoriteCatPhoto { url } } }".into()),
            ..Default::default()
        })
        .await;

    assert_eq!(response.errors.len(), 2);
    let messages: Vec<&str> = response.errors.iter().map(|e| e.message.as_str()).collect();
    assert!(messages.contains(&"firstName failed upstream"));
    assert!(messages.contains(&"favoriteCatPhoto failed upstream"));

    // service_b's null `node` must not clobber the `user` object service_a
    // already stitched in — only `favoriteCatPhoto` should be missing.
    let data = response.data.unwrap();
    assert_eq!(data["user"]["firstName"], Value::Null);
    assert!(data["user"].get("favoriteCatPhoto").is_none());
}

#[tokio::test]
async fn named_operation_is_selected_from_a_multi_operation_document() {
    let service = MockServer::start().await;
    mount_response(
        &service,
        "favoriteCatPhoto",
        json!({ "data": { "favoriteCatPhoto": { "url": "https://example.com/cat.png" } } }),
    )
    .await;

    let schema = Schema::parse_and_validate(
        "type Query { favoriteCatPhoto: Photo dog: String } type Photo { url: String }",
        "schema.graphql",
    )
    .unwrap();
    let mut endpoints = HashMap::new();
    endpoints.insert(Location::new("a"), endpoint(&service));

    let gateway = Gateway::builder()
        .upstream("a", schema)
        .queryer_factory(Arc::new(StaticQueryerFactory::new(HttpQueryer::new(endpoints))))
        .build()
        .unwrap();

    let response = gateway
        .execute(GatewayRequest {
            query: Some(
                "query GetCat { favoriteCatPhoto { url } } query GetDog { dog }".into(),
            ),
            operation_name: Some("GetCat".into()),
            ..Default::default()
        })
        .await;

    assert!(response.errors.is_empty());
    assert_eq!(
        response.data,
        Some(json!({ "favoriteCatPhoto": { "url": "https://example.com/cat.png" } }))
    );
}
