pub mod cli;
pub mod config;
pub mod error;
pub mod hub;
pub mod llm;
pub mod orchestrator;
pub mod safety;
pub mod text;
