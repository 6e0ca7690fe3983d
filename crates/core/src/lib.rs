//! Core domain models and contracts for the support ticket pipeline
//!
//! This crate contains the domain layer shared by every other crate:
//! - Ticket labels: category, priority, sentiment, status, message role
//! - Value types: conversation messages, retrieved documents, pending actions
//! - Contracts for the pipeline's external collaborators: prompt rendering,
//!   knowledge retrieval, action execution
//! - `PromptLibrary`, the YAML-backed default prompt renderer

pub mod contracts;
pub mod domain;
pub mod prompts;

pub use contracts::*;
pub use domain::*;
pub use prompts::{PromptError, PromptLibrary};

/// Re-export common types
pub use anyhow::{Error, Result};
