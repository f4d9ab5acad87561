//! Route tables. Paths are mounted at the root, next to `/health`.

pub mod health;
pub mod judge;
