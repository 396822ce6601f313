use crate::demo::{run_demo, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use credit_desk::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Credit Desk",
    about = "Run the business credit evaluation desk from the command line",
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
    /// Seed the first administrator into an empty store
    Bootstrap(BootstrapArgs),
    /// Walk one request through lookup and verdict against an in-memory desk
    Demo(DemoArgs),
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

#[derive(Args, Debug)]
pub(crate) struct BootstrapArgs {
    /// Login name of the administrator
    #[arg(long, default_value = "admin")]
    pub(crate) username: String,
    /// Name shown next to audit entries
    #[arg(long, default_value = "Administrator")]
    pub(crate) display_name: String,
    /// Initial secret (6+ characters mixing upper case, lower case and digits)
    #[arg(long)]
    pub(crate) secret: String,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Bootstrap(args) => server::bootstrap(args),
        Command::Demo(args) => run_demo(args).await,
    }
}
