use std::process::ExitCode;

use clap::Parser;
use retouch::cli::{self, CliArgs};

fn main() -> ExitCode {
    // Parse first so `--help` / usage errors never touch the log file.
    let args = CliArgs::parse();

    retouch::logger::init();
    retouch::log_info!("retouch {} (cli)", env!("CARGO_PKG_VERSION"));

    cli::run(args)
}
