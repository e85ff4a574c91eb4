use clap::Parser;
use finledger::cli::{Cli, run};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
