//! XFormat command-line entry point.

use clap::Parser;
use std::process::ExitCode;
use xformat::cli::{execute, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();

    #[cfg(feature = "logging")]
    init_logging(cli.verbose);

    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr, filtered by `RUST_LOG` (default `warn`, `info` when verbose).
#[cfg(feature = "logging")]
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
