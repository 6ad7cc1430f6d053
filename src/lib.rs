//! Email workers: LLM-configured, scheduled email automations.

pub mod config;
pub mod error;
pub mod llm;
pub mod store;
pub mod worker;
