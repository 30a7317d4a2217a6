use std::io::Write;

use anyhow::Result;

use super::{renderer, resolve_id};
use crate::api::CouncilApi;
use crate::app::ClientSession;

pub struct AskConfig {
    pub prompt: String,
    /// Conversation to continue; a new one is created when unset.
    pub conversation: Option<String>,
    pub show_details: bool,
    pub term_width: Option<usize>,
}

/// Put one question to the council and stream the stages as they finish.
///
/// Returns whether the council completed. Failures after the message was
/// sent are rendered rather than returned.
pub async fn ask<A: CouncilApi, W: Write>(
    config: AskConfig,
    session: &mut ClientSession<A>,
    writer: W,
) -> Result<bool> {
    match config.conversation {
        Some(query) => {
            let id = resolve_id(session, &query).await?;
            session.select_conversation(&id).await?;
        }
        None => {
            session.new_conversation().await?;
        }
    }

    let mut renderer = renderer(writer, config.show_details, config.term_width);
    if let Some(conversation) = session.active() {
        renderer.render_header(conversation);
    }
    renderer.render_user_message(&config.prompt);
    match session.send_message(&config.prompt, &mut renderer).await {
        Ok(()) => Ok(true),
        // Already reported by the renderer.
        Err(e) if e.rolled_back() => Ok(false),
        Err(e) => Err(e.into()),
    }
}
