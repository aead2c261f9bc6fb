//! CLI module
//!
//! Command-line argument parsing for the reconciliation replay binary.

pub mod args;

pub use args::CliArgs;

/// Parse command-line arguments
pub fn parse_args() -> CliArgs {
    use clap::Parser;
    CliArgs::parse()
}
