//! Command-line interface for inspecting a persisted operation queue.

mod commands;
mod icons;

pub use commands::{is_verbose, run};
