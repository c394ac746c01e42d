pub mod config;
pub mod definition;
pub mod delegation;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use definition::AgentDefinition;
pub use delegation::DelegationContext;
pub use error::{FlowhostError, Result};
pub use event::EventBus;
pub use types::*;
