//! Pure domain logic for the forum triage judge pipeline.
//!
//! Nothing in this crate touches the database, the filesystem or child
//! processes; the db and worker crates build on these helpers.

pub mod error;
pub mod judge_output;
pub mod quota;
pub mod types;
