//! HTTP surface of the judge engine.
//!
//! Exposes config, state, error mapping and routes so integration tests and
//! the binary entrypoint build the same application.

pub mod config;
pub mod error;
pub mod handlers;
pub mod router;
pub mod routes;
pub mod state;
