//! Error types for every fallible operation in the gateway core.
//!
//! Each subsystem gets its own `thiserror` enum (mirroring how
//! `apollo-federation` separates `FederationError` from subgraph- and
//! link-specific error types) and `GatewayError` is the top-level sum the
//! facade in [`crate::gateway`] returns.

use displaydoc::Display;
use thiserror::Error;

/// Failure while fusing upstream schemas into the unified schema (spec.md §4.1).
#[derive(Debug, Display, Error)]
pub enum MergeError {
    /// type `{type_name}` has incompatible field `{field_name}`: `{left}` vs `{right}`
    ConflictingFieldType {
        type_name: String,
        field_name: String,
        left: String,
        right: String,
    },
    /// scalar/enum/union `{type_name}` is defined incompatibly across upstreams
    ConflictingTypeShape { type_name: String },
    /// root type `{root}` cannot be merged: {reason}
    InvalidRootType { root: String, reason: String },
    /// upstream schema failed to validate: {0}
    InvalidUpstreamSchema(String),
}

/// Failure while turning a parsed query into a [`crate::plan::QueryPlan`] (spec.md §4.3).
#[derive(Debug, Display, Error)]
pub enum PlanError {
    /// query failed to validate against the unified schema: {0}
    Validation(String),
    /// no operation named `{0}` in the document
    UnknownOperation(String),
    /// document declares no operations
    EmptyDocument,
    /// field `{parent_type}.{field_name}` has no known upstream location
    UnresolvedField {
        parent_type: String,
        field_name: String,
    },
    /// fragment spread `...{0}` has no matching fragment definition
    UnknownFragment(String),
    /// directive `@{name}` argument `{argument}` is neither a literal boolean nor a declared variable
    UnsupportedDirectiveArgument { name: String, argument: String },
}

/// Failure while driving a [`crate::plan::QueryPlan`] (spec.md §4.4).
#[derive(Debug, Display, Error)]
pub enum ExecutionError {
    /// upstream `{location}` did not respond: {message}
    Transport { location: String, message: String },
    /// response middleware failed: {0}
    Middleware(String),
    /// request was cancelled
    Cancelled,
}

/// Failure reading or writing the plan cache (spec.md §4.6).
#[derive(Debug, Display, Error)]
pub enum CacheError {
    /// PersistedQueryNotFound
    ///
    /// The message text is part of the wire contract (spec.md §6): clients key
    /// their retry-with-full-query behavior off this exact string.
    PersistedQueryNotFound,
    /// planning failed while populating the cache: {0}
    Plan(#[from] PlanError),
}

/// Top-level error returned by [`crate::gateway::Gateway`].
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("schema merge failed: {0}")]
    Merge(#[from] MergeError),
    #[error("query planning failed: {0}")]
    Plan(#[from] PlanError),
    #[error("plan execution failed: {0}")]
    Execution(#[from] ExecutionError),
    #[error("plan cache failed: {0}")]
    Cache(#[from] CacheError),
}

impl GatewayError {
    /// Render this error the way spec.md §6 describes a top-level GraphQL error:
    /// `{"message": String, "path": ..., "extensions": ...}`. The persisted-query
    /// miss is a wire-contract sentinel (spec.md §4.6): clients key their
    /// retry-with-full-query behavior off the message being exactly
    /// `PersistedQueryNotFound`, not off `GatewayError`'s own `Display` wrapping.
    pub fn to_graphql_error(&self) -> crate::queryer::GraphQlError {
        let message = match self {
            GatewayError::Cache(CacheError::PersistedQueryNotFound) => {
                crate::cache::PERSISTED_QUERY_NOT_FOUND.to_string()
            }
            other => other.to_string(),
        };
        crate::queryer::GraphQlError {
            message,
            path: None,
            extensions: None,
        }
    }
}
