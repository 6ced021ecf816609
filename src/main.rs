//! codemend CLI entry point.

use clap::Parser;
use codemend::cli::{self, Cli};
use codemend::logging::init_logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level, cli.log_json);

    let exit_code = cli::run(cli).await;
    std::process::exit(exit_code);
}
