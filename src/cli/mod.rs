//! CLI subcommand implementations for the formrelay binary.

pub mod output;
pub mod probe_cmd;
pub mod run_cmd;
