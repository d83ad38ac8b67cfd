//! blockflow HTTP API.
//!
//! Serves workflow documents to the editor, accepts run requests, and hosts
//! the wake-up consumer that drives runs forward.

pub mod app;
pub mod config;
pub mod error;
pub mod routes;
