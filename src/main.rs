use clap::Parser;
use std::process::ExitCode;
use tidywatch::cli::{Cli, run};
use tidywatch::logging;
use tidywatch::output::OutputFormatter;

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            OutputFormatter::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}
