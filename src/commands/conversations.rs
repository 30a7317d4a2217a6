//! One-shot commands over the conversation list.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};

use super::{default_export_path, renderer, resolve_id};
use crate::api::CouncilApi;
use crate::app::ClientSession;
use crate::display::renderer::Renderer;

pub async fn list<A: CouncilApi, W: Write>(session: &mut ClientSession<A>, writer: W) -> Result<()> {
    session.refresh_conversations().await?;
    let mut renderer = Renderer::with_writer(writer);
    renderer.render_conversation_list(session.conversations(), None);
    Ok(())
}

pub async fn create<A: CouncilApi, W: Write>(session: &mut ClientSession<A>, writer: W) -> Result<()> {
    let conversation = session.new_conversation().await?;
    let mut renderer = Renderer::with_writer(writer);
    renderer.write_raw(&format!("{}\n", conversation.id));
    Ok(())
}

pub async fn show<A: CouncilApi, W: Write>(
    session: &mut ClientSession<A>,
    query: &str,
    show_details: bool,
    term_width: Option<usize>,
    writer: W,
) -> Result<()> {
    let id = resolve_id(session, query).await?;
    let conversation = session.select_conversation(&id).await?;
    renderer(writer, show_details, term_width).render_transcript(conversation);
    Ok(())
}

pub async fn rename<A: CouncilApi, W: Write>(
    session: &mut ClientSession<A>,
    query: &str,
    title: &str,
    writer: W,
) -> Result<()> {
    let title = title.trim();
    anyhow::ensure!(!title.is_empty(), "title is empty");
    let id = resolve_id(session, query).await?;
    session.rename_conversation(&id, title).await?;
    let mut renderer = Renderer::with_writer(writer);
    renderer.write_raw(&format!("Renamed to {title}\n"));
    Ok(())
}

pub async fn delete<A: CouncilApi, W: Write>(
    session: &mut ClientSession<A>,
    query: &str,
    writer: W,
) -> Result<()> {
    let id = resolve_id(session, query).await?;
    session.delete_conversation(&id).await?;
    let mut renderer = Renderer::with_writer(writer);
    renderer.write_raw(&format!("Deleted {id}\n"));
    Ok(())
}

/// Write the backend's markdown export to `output`, or to
/// `boardroom-session-<id>.md` in the working directory.
pub async fn export<A: CouncilApi, W: Write>(
    session: &mut ClientSession<A>,
    query: &str,
    output: Option<PathBuf>,
    writer: W,
) -> Result<PathBuf> {
    let id = resolve_id(session, query).await?;
    let markdown = session.export_conversation(&id).await?;
    let path = output.unwrap_or_else(|| default_export_path(&id));
    std::fs::write(&path, markdown).with_context(|| format!("writing {}", path.display()))?;
    let mut renderer = Renderer::with_writer(writer);
    renderer.write_raw(&format!("Exported to {}\n", path.display()));
    Ok(path)
}
