use anyhow::Result;
use clap::Parser;
use tessera_matrix::cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();
    cli.run()
}
