//! Command-line boundary for batchline: argument parsing, command dispatch and
//! the exit policy.

pub mod args;
pub mod commands;
pub mod outcome;

pub use args::{Cli, Command};
pub use outcome::{Exit, JobOutcome};
