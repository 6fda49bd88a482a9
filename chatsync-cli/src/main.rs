mod config;
mod diagnostics;
mod replay;

use anyhow::{Context, Result};
use chatsync_protocol::SendOutcome;
use clap::Parser;
use diagnostics::{BuildInfo, Cli, DiagnosticCommand};
use replay::ReplayOptions;
use tracing::{error, info};

use config::Config;

async fn handle_command(cli: &Cli, config: Config) -> Result<()> {
    match &cli.command {
        DiagnosticCommand::Version { verbose } => {
            BuildInfo::get().display(*verbose);
            Ok(())
        }
        DiagnosticCommand::DumpConfig => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            println!("# {}", path.display());
            let contents = toml::to_string_pretty(&config).context("Failed to serialize config")?;
            println!("{}", contents);
            Ok(())
        }
        DiagnosticCommand::Replay {
            events,
            messages,
            conversation,
            prompt,
            chunk_size,
        } => {
            let options = ReplayOptions {
                events: events.clone(),
                messages: messages.clone(),
                conversation_id: conversation.clone(),
                prompt: prompt.clone(),
                chunk_size: *chunk_size,
            };

            let report = replay::run_replay(config.engine, options)
                .await
                .context("Replay failed")?;
            report.metrics.display();

            match report.outcome {
                Ok(SendOutcome::Completed(completed)) => {
                    info!("Replay completed with message {}", completed.message.id);
                    Ok(())
                }
                Ok(SendOutcome::Recovered(message)) => {
                    info!("Replay recovered message {}", message.id);
                    Ok(())
                }
                Ok(SendOutcome::Incomplete { content }) => {
                    println!(
                        "Stream ended without a response; {} chars kept as incomplete",
                        content.chars().count()
                    );
                    Ok(())
                }
                Ok(SendOutcome::Aborted) => {
                    println!("Replay aborted");
                    Ok(())
                }
                Err(e) => {
                    error!("Replay ended with an error: {}", e);
                    eprintln!("{}", e.user_message());
                    std::process::exit(1);
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    diagnostics::init_logging(&cli.logging(&config.logging))
        .context("Failed to initialize logging")?;

    handle_command(&cli, config).await
}
