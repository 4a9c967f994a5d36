use clap::Parser;
use tracing_subscriber::EnvFilter;

use sc_cli::cli::{self, Cli, Command, ConfigCommand};
use sc_worker::WorkerKind;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.internal_worker {
        init_cli_tracing("info", false);
        return cli::worker::run_internal_worker().await;
    }
    init_cli_tracing("warn", true);

    let code = match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => {
            cli::chat::chat(cli.global.services()?).await?;
            0
        }
        Command::Run { message, json } => cli::run::run(cli.global.services()?, message, json).await?,
        Command::Check(args) => {
            let (config, path) = cli.global.load_config()?;
            cli::check::check(&config, &path, args, WorkerKind::Check).await?
        }
        Command::Review(args) => {
            let (config, path) = cli.global.load_config()?;
            cli::check::check(&config, &path, args, WorkerKind::Review).await?
        }
        Command::Config(ConfigCommand::Validate) => {
            let (config, path) = cli.global.load_config()?;
            i32::from(!cli::config::validate(&config, &path))
        }
        Command::Config(ConfigCommand::Show) => {
            let (config, _) = cli.global.load_config()?;
            cli::config::show(&config)?;
            0
        }
        Command::Version => {
            println!("serialcode {}", env!("CARGO_PKG_VERSION"));
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Logs go to stderr; stdout carries assistant output (or, in a worker,
/// the protocol).
fn init_cli_tracing(default_level: &str, ansi: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_ansi(ansi)
        .compact()
        .init();
}
