pub mod builtin;
pub mod factory;
pub mod knowledge;
pub mod table;

pub use factory::{BuildContext, BuiltinConstructor, CapabilityFactory};
pub use knowledge::{HttpKnowledgeSource, KnowledgeCapability, KNOWLEDGE_CAPABILITY};
pub use table::CapabilityTable;
