//! rag-core - Core types and traits for the retrieval-augmented QA pipeline
//!
//! This crate provides the foundational types, capability traits, error
//! taxonomy and configuration shared by every other crate in the workspace.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{Fault, RagError, Result};
pub use traits::*;
pub use types::*;
