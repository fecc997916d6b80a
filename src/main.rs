use std::process::ExitCode;

use clap::Parser;

use discolour::cli::{self, CliArgs};
use discolour::logger;

fn main() -> ExitCode {
    let args = CliArgs::parse();
    logger::init(args.verbose);
    cli::run(args)
}
