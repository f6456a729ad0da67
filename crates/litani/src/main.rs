mod capabilities;
mod cli;
mod commands;
mod run_build;

use clap::Parser as _;

use crate::cli::{Cli, Command};

fn init_tracing(verbose: bool, very_verbose: bool) {
    let default_level = if very_verbose {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.very_verbose);

    let exit_code = match cli.command {
        Command::Init(args) => {
            commands::init(args)?;
            0
        }
        Command::AddJob(args) => {
            commands::add_job(args)?;
            0
        }
        Command::Exec(args) => commands::exec(args).await?,
        Command::RunBuild(args) => run_build::run_build(args).await?,
        Command::DumpRun(args) => {
            commands::dump_run(args).await?;
            0
        }
        Command::PrintGraph(args) => {
            commands::print_graph(args)?;
            0
        }
        Command::PrintCapabilities(args) => {
            if args.human_readable {
                println!("{}", capabilities::human_readable());
            } else {
                println!("{}", capabilities::machine_readable()?);
            }
            0
        }
    };

    std::process::exit(exit_code)
}
