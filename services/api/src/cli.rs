use crate::demo::{run_demo, run_validate, DemoArgs, ValidateArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use sglgb::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "SGLGB Assessment Service",
    about = "Run and demonstrate the barangay governance assessment service",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Inspect assessment framework definitions
    Framework {
        #[command(subcommand)]
        command: FrameworkCommand,
    },
    /// Walk one assessment from draft to completion against the bundled framework
    Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
enum FrameworkCommand {
    /// Load and validate a framework JSON file
    Validate(ValidateArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Framework {
            command: FrameworkCommand::Validate(args),
        } => run_validate(args),
        Command::Demo(args) => run_demo(args),
    }
}
