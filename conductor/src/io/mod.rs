//! Side-effecting helpers: sandbox filesystem, processes, model backend, prompts.

pub mod config;
pub mod file_cache;
pub mod llm;
pub mod preferences;
pub mod process;
pub mod project;
pub mod prompt;
pub mod sandbox;
pub mod trash;
