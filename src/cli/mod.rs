use std::num::NonZero;

use clap::Parser;
use clx::progress::ProgressOutput;

use crate::{Result, logger, settings::Settings, trace::TraceMode};

mod cache;
mod check;
mod fix;
mod run;

#[derive(clap::Parser)]
#[clap(name = "hk-engine", version = env!("CARGO_PKG_VERSION"), about = env!("CARGO_PKG_DESCRIPTION"))]
struct Cli {
    /// Number of steps to run in parallel
    #[clap(short, long, global = true)]
    jobs: Option<NonZero<usize>>,
    /// Profiles to enable; prefix with ! to disable, e.g. `--profile slow --profile !docs`
    #[clap(short, long, global = true)]
    profile: Vec<String>,
    /// Shorthand for --profile=slow
    #[clap(short, long, global = true)]
    slow: bool,
    /// Enables verbose output
    #[clap(short, long, global = true, action = clap::ArgAction::Count, overrides_with = "quiet")]
    verbose: u8,
    /// Disables progress output
    #[clap(long, global = true)]
    no_progress: bool,
    /// Only show warnings and errors
    #[clap(short, long, global = true, overrides_with = "verbose")]
    quiet: bool,
    /// Emit tracing spans
    #[clap(long, global = true)]
    trace: bool,
    /// Write traces as JSON Lines to stdout
    #[clap(long, global = true)]
    json: bool,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    Cache(Box<cache::Cache>),
    Check(Box<check::Check>),
    Fix(Box<fix::Fix>),
    Run(Box<run::Run>),
    Test(Box<test::Test>),
}

pub async fn run() -> Result<()> {
    let args = Cli::parse();
    let slow = args.slow.then(|| "slow".to_string());
    let settings = Settings::from_env()
        .with_jobs(args.jobs)
        .with_profiles(&args.profile)
        .with_profiles(slow.as_slice())
        .with_trace(args.trace || args.json, args.json)
        .with_progress(!args.no_progress);

    // tracing has to be installed before anything logs
    crate::trace::init_tracing(settings.trace)?;

    let mut level = None;
    if args.verbose > 1 {
        level = Some(log::LevelFilter::Trace);
    } else if args.verbose == 1 {
        level = Some(log::LevelFilter::Debug);
    }
    if args.quiet {
        level = Some(log::LevelFilter::Warn);
    }
    if !settings.progress || level.is_some() {
        clx::progress::set_output(ProgressOutput::Text);
    }
    let settings = settings.with_progress(clx::progress::output() != ProgressOutput::Text);
    if settings.trace == TraceMode::Off {
        logger::init(level);
    }

    match args.command {
        Commands::Cache(cmd) => cmd.run(&settings).await,
        Commands::Check(cmd) => run::run_hook("check", cmd.hook, &settings).await,
        Commands::Fix(cmd) => run::run_hook("fix", cmd.hook, &settings).await,
        Commands::Run(cmd) => cmd.run(&settings).await,
        Commands::Test(cmd) => cmd.run(&settings).await,
    }
}
