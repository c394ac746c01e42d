//! Declarative flow interpreter.
//!
//! A flow is an ordered list of nodes. Execution starts at the first node
//! and follows array order; condition nodes are the only way to jump.

pub mod condition;
pub mod engine;
pub mod node;
pub mod state;
pub mod template;

pub use engine::{CompiledFlow, FlowEngine, FlowOutcome, DEFAULT_MAX_NODE_EXECUTIONS};
pub use node::{NodeOutcome, RunContext};
pub use state::{FlowState, FlowStatus};
