pub mod admin;
pub mod serve;

// Re-export command functions for convenience
pub use admin::{diagnostics, drain, files, ingest, operations, run_once, undrain};
pub use serve::serve;

/// Actor recorded on audit entries written from the command line
pub const CLI_ACTOR: &str = "cli";
