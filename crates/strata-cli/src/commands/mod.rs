//! CLI command implementations.

pub mod addr;
pub mod config;
pub mod inspect;
pub mod probe;
