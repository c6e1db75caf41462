use clap::{Parser, Subcommand};
use crucible::cmd::{execute, ExecuteArgs};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Executes a single function request read from stdin or a file.
    Execute(ExecuteArgs),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Diagnostics go to stderr; stdout is reserved for protocol lines.
    let filter = if debug_log_requested() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let cli = Cli::parse();

    match cli.command {
        Commands::Execute(args) => execute::execute(args).await?,
    }

    Ok(())
}

/// Debug logging can be requested through either of two legacy-compatible
/// environment variables, independent of the standard filter variable.
fn debug_log_requested() -> bool {
    ["SI_LANG_JS_LOG", "SI_LOG"].iter().any(|name| {
        std::env::var(name).is_ok_and(|value| {
            !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
        })
    })
}
