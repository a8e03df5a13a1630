use std::process::ExitCode;

use clap::Parser;

use batchline_cli::{commands, Cli, Exit};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = batchline_observability::init_with(cli.observability()) {
        eprintln!("error: {e}");
        return Exit::Failure.into();
    }

    match commands::run(cli).await {
        Ok(exit) => exit.into(),
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e:#}");
            Exit::Failure.into()
        }
    }
}
