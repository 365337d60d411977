#![forbid(unsafe_code)]

//! wcache: windowed cache simulation and diagnostics CLI.

use clap::Parser;

mod cli_app;

fn main() {
    let args = cli_app::Cli::parse();
    if let Err(e) = cli_app::run(&args) {
        eprintln!("wcache: {e}");
        std::process::exit(e.exit_code());
    }
}
