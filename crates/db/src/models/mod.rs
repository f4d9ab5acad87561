//! Row models for the judge tables.

pub mod job;
pub mod judgment;
pub mod state;
pub mod status;
