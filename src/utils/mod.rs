//! Shared utilities.

mod decimal;

pub use decimal::*;
