use clap::Parser;
use fieldstep::cli::{self, Args, CliError};
use fieldstep::physics::propagator::Propagator;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if args.list_auctioneers {
        cli::handle_list_auctioneers();
        return ExitCode::SUCCESS;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), CliError> {
    let config = cli::load_and_apply_config(args)?;

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let mut propagator = Propagator::from_config(&config)?;
    let result = propagator.propagate(config.initial_state())?;
    print!("{}", cli::format_result(&result, args.trajectory));
    Ok(())
}
