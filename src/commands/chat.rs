use std::io::{BufRead, Write};

use anyhow::Result;

use super::{default_export_path, renderer, resolve_id};
use crate::api::CouncilApi;
use crate::app::ClientSession;
use crate::display::renderer::Renderer;
use crate::error::SendError;

pub struct ChatConfig {
    /// Conversation to open; a new one is created on the first message when unset.
    pub conversation: Option<String>,
    pub show_details: bool,
    pub term_width: Option<usize>,
}

#[derive(Debug, PartialEq, Eq)]
enum ChatCommand<'a> {
    New,
    List,
    Switch(&'a str),
    Rename(&'a str),
    Export(Option<&'a str>),
    Details,
    Help,
    Quit,
    Unknown(&'a str),
}

/// Parse a `/command arg` line. Anything else is a message.
fn parse_command(line: &str) -> Option<ChatCommand<'_>> {
    let rest = line.strip_prefix('/')?;
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    Some(match name {
        "new" => ChatCommand::New,
        "list" => ChatCommand::List,
        "switch" => ChatCommand::Switch(arg),
        "rename" => ChatCommand::Rename(arg),
        "export" => ChatCommand::Export((!arg.is_empty()).then_some(arg)),
        "details" => ChatCommand::Details,
        "help" => ChatCommand::Help,
        "quit" | "exit" => ChatCommand::Quit,
        other => ChatCommand::Unknown(other),
    })
}

/// Line-oriented chat: each line is a message or a `/command`. Ends at EOF or `/quit`.
pub async fn chat<A: CouncilApi, R: BufRead, W: Write>(
    config: ChatConfig,
    session: &mut ClientSession<A>,
    input: &mut R,
    writer: W,
) -> Result<()> {
    let mut show_details = config.show_details;
    let mut renderer = renderer(writer, show_details, config.term_width);

    if let Some(query) = config.conversation {
        let id = resolve_id(session, &query).await?;
        let conversation = session.select_conversation(&id).await?;
        renderer.render_transcript(conversation);
    }
    renderer.render_help();

    let mut line = String::new();
    loop {
        renderer.show_prompt();
        line.clear();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let Some(command) = parse_command(text) else {
            send(session, &mut renderer, text).await?;
            continue;
        };
        let result = match command {
            ChatCommand::Quit => break,
            ChatCommand::Details => {
                show_details = !show_details;
                renderer.set_show_details(show_details);
                let state = if show_details { "on" } else { "off" };
                renderer.write_raw(&format!("Details {state}\n"));
                Ok(())
            }
            ChatCommand::Help => {
                renderer.render_help();
                Ok(())
            }
            ChatCommand::Unknown(name) => {
                renderer.render_warning(&format!("unknown command /{name}"));
                Ok(())
            }
            command => run_command(command, session, &mut renderer).await,
        };
        if let Err(e) = result {
            renderer.render_error(&format!("{e:#}"));
        }
    }
    Ok(())
}

async fn run_command<A: CouncilApi, W: Write>(
    command: ChatCommand<'_>,
    session: &mut ClientSession<A>,
    renderer: &mut Renderer<W>,
) -> Result<()> {
    match command {
        ChatCommand::New => {
            let conversation = session.new_conversation().await?;
            renderer.render_header(conversation);
        }
        ChatCommand::List => {
            session.refresh_conversations().await?;
            renderer.render_conversation_list(session.conversations(), session.active_id());
        }
        ChatCommand::Switch(query) => {
            let id = resolve_id(session, query).await?;
            let conversation = session.select_conversation(&id).await?;
            renderer.render_transcript(conversation);
        }
        ChatCommand::Rename(title) => {
            anyhow::ensure!(!title.is_empty(), "usage: /rename TITLE");
            let id = active_id(session)?;
            session.rename_conversation(&id, title).await?;
            renderer.render_title(title);
        }
        ChatCommand::Export(path) => {
            let id = active_id(session)?;
            let markdown = session.export_conversation(&id).await?;
            let path = path.map_or_else(|| default_export_path(&id), Into::into);
            std::fs::write(&path, markdown)?;
            renderer.write_raw(&format!("Exported to {}\n", path.display()));
        }
        ChatCommand::Details | ChatCommand::Help | ChatCommand::Quit | ChatCommand::Unknown(_) => {}
    }
    Ok(())
}

fn active_id<A: CouncilApi>(session: &ClientSession<A>) -> Result<String> {
    session
        .active_id()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("no conversation selected"))
}

async fn send<A: CouncilApi, W: Write>(
    session: &mut ClientSession<A>,
    renderer: &mut Renderer<W>,
    text: &str,
) -> Result<()> {
    if session.is_loading() {
        renderer.render_warning("still processing the previous message");
        return Ok(());
    }
    if session.active().is_none() {
        let conversation = session.new_conversation().await?;
        renderer.render_header(conversation);
    }
    match session.send_message(text, renderer).await {
        Ok(()) => {}
        // Rendered by the observer, and the transcript is already rolled back.
        Err(e) if e.rolled_back() => {}
        Err(SendError::Precondition(e)) => renderer.render_error(&e.to_string()),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
