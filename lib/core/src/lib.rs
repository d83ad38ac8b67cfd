//! Core domain types and utilities for blockflow.
//!
//! This crate provides the identifier types and error-handling foundation
//! shared by the workflow engine and the server.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ParseIdError, WorkflowId, hex_token};
