//! Output-mode helpers shared by the subcommands.
//!
//! The global `--json` / `--quiet` flags are stored in environment variables
//! by `main` so every module can check them without threading flags through
//! every call.

/// Whether machine-readable JSON output was requested.
pub fn is_json() -> bool {
    std::env::var("FORMRELAY_JSON").is_ok()
}

/// Whether non-essential output is suppressed.
pub fn is_quiet() -> bool {
    std::env::var("FORMRELAY_QUIET").is_ok()
}

/// Print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
    );
}
