//! Prints a Letterboxd user's watchlist as JSON, or writes it with `--out`.

use std::process::ExitCode;

use clap::Parser;

use ihavewatchit::cli;
use ihavewatchit::config::{FetchArgs, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match FetchArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(cli::usage_exit_code(&e));
        }
    };
    init_tracing(if args.log { "ihavewatchit=info" } else { "ihavewatchit=warn" });

    match cli::run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
