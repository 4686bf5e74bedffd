mod calculate;
mod config;
mod handler;
mod logging;
mod model;
mod serve;
mod server;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "packer")]
#[command(about = "Compute the best packs to ship for an order")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP service
    Serve(serve::ServeArgs),

    /// Compute the packs for one order and print them
    Calculate(calculate::CalculateArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn run() -> Result<i32> {
    let args = Args::parse();

    match args.command {
        Commands::Serve(serve_args) => serve::execute(serve_args),
        Commands::Calculate(calculate_args) => calculate::execute(calculate_args),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Args::command(), "packer", &mut std::io::stdout());
            Ok(0)
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("Error: {}", e);
            // Print the error chain for debugging
            for cause in e.chain().skip(1) {
                eprintln!("  Caused by: {}", cause);
            }
            ExitCode::FAILURE
        }
    }
}
