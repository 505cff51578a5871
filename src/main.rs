type Result<T> = color_eyre::eyre::Result<T>;

mod suites;

use clap::Parser;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use forktest::cli::{Config, HarnessArgs};
use suites::Suite;

/// Runs one of forktest's own demonstration suites
#[derive(Parser)]
#[command(name = "forktest-selftest")]
#[command(about = "Runs one of forktest's own demonstration suites")]
#[command(version)]
struct Cli {
    /// Suite to run
    #[arg(value_enum)]
    suite: Suite,

    #[command(flatten)]
    harness: HarnessArgs,
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    // stdout carries the report, so logs go to stderr
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_args(cli.harness)?;
    config.flags |= cli.suite.forced_flags();

    let runner = cli.suite.build()?;
    info!("{} suite registered {} group(s)", cli.suite.name(), runner.groups().len());

    println!("\nRunning {} suite\n", cli.suite.name());
    let stats = runner.run(&config.run_options(suites::global_context()))?;

    Ok(stats.exit_code())
}
