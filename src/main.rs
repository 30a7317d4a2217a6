mod cli;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use boardroom::api::HttpCouncilApi;
use boardroom::app::ClientSession;
use boardroom::commands::{self, ask::AskConfig, chat::ChatConfig};
use boardroom::config::{self, API_BASE_ENV, CONFIG_PATH};
use boardroom::display::renderer::terminal_width;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

/// Environment variable holding the log filter, e.g. `boardroom=debug`.
const LOG_ENV: &str = "BOARDROOM_LOG";

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_logging();
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(|| PathBuf::from(CONFIG_PATH));
    let config = config::load(&config_path)?
        .with_overrides(std::env::var(API_BASE_ENV).ok(), cli.api_base);
    let api = HttpCouncilApi::new(&config)?;
    let mut session = ClientSession::new(api);
    let stdout = std::io::stdout();
    let term_width = Some(terminal_width());

    match cli.command {
        Command::List => commands::conversations::list(&mut session, stdout).await?,
        Command::New => commands::conversations::create(&mut session, stdout).await?,
        Command::Show { id, display } => {
            commands::conversations::show(&mut session, &id, display.details, term_width, stdout)
                .await?;
        }
        Command::Rename { id, title } => {
            commands::conversations::rename(&mut session, &id, &title, stdout).await?;
        }
        Command::Delete { id } => {
            commands::conversations::delete(&mut session, &id, stdout).await?;
        }
        Command::Export { id, output } => {
            commands::conversations::export(&mut session, &id, output, stdout).await?;
        }
        Command::Ask {
            prompt,
            conversation,
            display,
        } => {
            let completed = commands::ask::ask(
                AskConfig {
                    prompt,
                    conversation,
                    show_details: display.details,
                    term_width,
                },
                &mut session,
                stdout,
            )
            .await?;
            if !completed {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Chat { id, display } => {
            commands::chat::chat(
                ChatConfig {
                    conversation: id,
                    show_details: display.details,
                    term_width,
                },
                &mut session,
                &mut std::io::stdin().lock(),
                stdout,
            )
            .await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Log to stderr so rendered output on stdout stays clean. Quiet unless
/// `BOARDROOM_LOG` asks for more.
fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
