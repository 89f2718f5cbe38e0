//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate store, tracker and collaborator calls into use-case APIs.
//! - Keep UI/CLI layers decoupled from sequencing and error branching.

pub mod refinement_workflow;
