//! Mocks and fixtures shared by the Flowhost test suites.

pub mod fixtures;
mod llm;
mod capability;

pub use capability::{FailingCapability, StaticCapability};
pub use llm::{RecordedCall, ScriptedLlm};
