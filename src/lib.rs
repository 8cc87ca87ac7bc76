//! javagen: LLM-backed unit-test generation for Java and Kotlin projects.
//!
//! Pipeline: [`context`] extracts a structural summary of each source file
//! and resolves the imports a test needs, [`llm::prompt`] turns that into a
//! prompt, [`llm::gateway`] sends it to a provider with retry and failover,
//! [`testgen::validate`] checks the answer, and [`llm::orchestrator`] drives
//! the whole run and writes the files and the report.

pub mod config;
pub mod context;
pub mod detectors;
pub mod error;
pub mod llm;
pub mod logger;
pub mod project;
pub mod testgen;

pub use config::GenConfig;
pub use error::{GenError, Result};
