//! Command-line host for the stucco Rhai driver.

pub mod cli;
pub mod logger;
