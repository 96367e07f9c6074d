//! Command line interface module
//!
//! Argument parsing, layered configuration and the runner that drives the
//! `sync`, `replicate-tree` and `checkpoint` commands.

pub mod args;
pub mod config;
pub mod runner;

pub use args::Args;
pub use config::AppConfig;
pub use runner::Runner;
