//! Request/response middleware hooks around each upstream dispatch (spec.md
//! §4.5 "Middleware").

use async_trait::async_trait;
use serde_json::Value;

use crate::exec::path::ConcretePath;
use crate::plan::InsertionPoint;
use crate::plan::QueryPlanStep;
use crate::queryer::QueryerRequest;
use crate::queryer::QueryerResponse;

/// Runs before a step's request is sent, with the chance to add headers,
/// tracing metadata, or otherwise mutate the outgoing request.
#[async_trait]
pub trait RequestMiddleware: Send + Sync {
    async fn on_request(&self, step: &QueryPlanStep, point: &ConcretePath, request: &mut QueryerRequest);
}

/// Runs after a step's response is received, before its data is stitched
/// into the result tree.
#[async_trait]
pub trait ResponseMiddleware: Send + Sync {
    async fn on_response(&self, step: &QueryPlanStep, point: &ConcretePath, response: &mut QueryerResponse);
}

/// One registered hook, tagged by which phase it runs in (spec.md §4.5).
pub enum Middleware {
    Request(Box<dyn RequestMiddleware>),
    Response(Box<dyn ResponseMiddleware>),
}

impl Middleware {
    pub fn request(middleware: impl RequestMiddleware + 'static) -> Self {
        Self::Request(Box::new(middleware))
    }

    pub fn response(middleware: impl ResponseMiddleware + 'static) -> Self {
        Self::Response(Box::new(middleware))
    }
}

/// Removes every gateway-synthesized field recorded in
/// `fields_to_scrub` from the final stitched result tree, so clients never
/// see an `id` they did not ask for (spec.md §4.3 "ID insertion" / §4.4
/// step "scrub synthetic fields").
pub fn scrub_synthetic_fields(
    data: &mut Value,
    fields_to_scrub: &indexmap::IndexMap<String, Vec<InsertionPoint>>,
) {
    for (field_name, points) in fields_to_scrub {
        for point in points {
            scrub_at(data, &point.0, field_name);
        }
    }
}

fn scrub_at(data: &mut Value, remaining: &[String], field_name: &str) {
    match data {
        Value::Object(map) => match remaining.split_first() {
            Some((head, rest)) => {
                if let Some(next) = map.get_mut(head.as_str()) {
                    scrub_at(next, rest, field_name);
                }
            }
            None => {
                map.shift_remove(field_name);
            }
        },
        Value::Array(items) => {
            for item in items {
                scrub_at(item, remaining, field_name);
            }
        }
        _ => {}
    }
}
