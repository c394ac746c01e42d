pub mod delegate;
pub mod flow;
pub mod runtime;
pub mod session;
pub mod single_shot;
pub mod store;

pub use delegate::{AgentDelegate, AgentInvoker};
pub use flow::{CompiledFlow, FlowEngine, FlowOutcome, FlowState, FlowStatus, RunContext};
pub use runtime::{ModelProvider, QueryOutcome, ResolvedAgent, Runtime, RuntimeBuilder};
pub use session::{ChatSession, SessionManager};
pub use single_shot::ToolLoop;
pub use store::{validate_dir, validate_file, AgentResolver, DefinitionStatus, DefinitionStore, ValidationReport};
