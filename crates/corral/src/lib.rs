//! corral — typed MongoDB object-document mapper
//!
//! Binds caller-defined entity types to collections through a generic
//! [`Model`] gateway that layers schema defaults, lifecycle hooks, reference
//! population and filter sanitization over the MongoDB driver.
//!
//! # Features
//! - Explicitly registered field metadata compiled once per entity type
//! - Identity/timestamp stamping on insert, readonly and zero-skip policy on
//!   update
//! - Ordered pre/post hooks per operation, synchronous or fire-and-forget
//! - Opt-in strict filter mode rejecting injection-style query operators
//! - `$lookup`-based reference population on reads
//! - Session transactions with session-aware mutation variants

pub mod connection;
pub mod entity;
pub mod error;
pub mod hook;
pub mod model;
mod mutation;
pub mod query;
pub mod sanitize;
mod transaction;
pub mod type_cache;

pub use connection::{Connection, PoolConfig, RetryPolicy};
pub use entity::{
    BaseSchema, BaseTimestamp, Entity, FieldKind, FieldSpec, CREATED_AT_KEY, ID_KEY,
    UPDATED_AT_KEY,
};
pub use error::{Error, Result};
pub use hook::{hook_fn, HookArgs, HookFn, Op};
pub use model::{to_document, Model, ModelConfig};
pub use query::{FindOneOptions, FindOptions};
pub use sanitize::{is_dangerous_operator, sanitize_filter, DANGEROUS_OPERATORS};
pub use type_cache::{type_info, FieldInfo, RefPath, TypeInfo};
