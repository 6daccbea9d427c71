//! CRUD channel access control.
//!
//! [`AccessControl`] is built once from a [`RuleRegistry`] and a set of
//! [`PolicyDefaults`] and then shared by every connection of the transport.

pub mod channel;
pub mod condition;
pub mod engine;
pub mod errors;
pub mod loader;
pub mod pipeline;
pub mod policy;
pub mod registry;
pub mod types;
pub mod web;

pub use channel::{classify_channel, parse_channel, Channel, ResourceQuery};
pub use engine::{evaluator_fn, Decision, Evaluator};
pub use errors::{AccessError, AuthzError, EvaluationError};
pub use pipeline::{AccessControl, PolicyDefaults};
pub use registry::{AccessRule, RuleRegistry};
pub use types::{AccessContext, Action, Direction, Query, Socket};
