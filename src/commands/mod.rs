use std::io::Write;
use std::path::PathBuf;

use anyhow::{Result, bail};

use crate::api::{ConversationSummary, CouncilApi};
use crate::app::ClientSession;
use crate::display::renderer::{Renderer, short_id};

pub mod ask;
pub mod chat;
pub mod conversations;

/// Renderer for council output. `term_width` defaults to 80 columns.
fn renderer<W: Write>(writer: W, show_details: bool, term_width: Option<usize>) -> Renderer<W> {
    let mut renderer = Renderer::with_writer(writer);
    renderer.set_show_details(show_details);
    if let Some(width) = term_width {
        renderer.set_width(width);
    }
    renderer
}

/// File an export is written to when no path is given.
pub fn default_export_path(id: &str) -> PathBuf {
    PathBuf::from(format!("boardroom-session-{}.md", short_id(id)))
}

/// Expand a full id or unique id prefix against the conversation list.
pub async fn resolve_id<A: CouncilApi>(session: &mut ClientSession<A>, query: &str) -> Result<String> {
    session.refresh_conversations().await?;
    match_id(session.conversations(), query)
}

fn match_id(conversations: &[ConversationSummary], query: &str) -> Result<String> {
    if query.is_empty() {
        bail!("empty conversation id");
    }
    if let Some(exact) = conversations.iter().find(|c| c.id == query) {
        return Ok(exact.id.clone());
    }
    let mut matches = conversations.iter().filter(|c| c.id.starts_with(query));
    match (matches.next(), matches.next()) {
        (Some(only), None) => Ok(only.id.clone()),
        (Some(_), Some(_)) => bail!("conversation id '{query}' is ambiguous"),
        (None, _) => bail!("no conversation matches '{query}'"),
    }
}
