//! A GraphQL federation gateway core: merges upstream schemas, plans
//! incoming operations into per-upstream steps, and executes those steps
//! concurrently, stitching their responses into one result tree.
//!
//! Parsing and AST types are supplied by `apollo_compiler`; this crate's
//! job starts once an operation is already parsed against the unified
//! schema.

pub mod cache;
pub mod error;
pub mod exec;
pub mod gateway;
pub mod location;
pub mod merge;
pub mod middleware;
pub mod plan;
pub mod queryer;
pub mod selection;

pub use error::GatewayError;
pub use gateway::Gateway;
pub use gateway::GatewayBuilder;
pub use gateway::GatewayRequest;
pub use gateway::GatewayResponse;
pub use location::Location;
