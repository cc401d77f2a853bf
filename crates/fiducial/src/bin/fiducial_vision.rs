use std::process::ExitCode;

use clap::Parser;
use fiducial::cli::{run, Cli};

fn main() -> ExitCode {
    run(Cli::parse())
}
