use std::io::Write;

use crossterm::queue;
use crossterm::style::Print;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use super::theme;
use crate::api::ConversationSummary;
use crate::error::SendError;
use crate::protocol::types::{
    ModelResponse, PeerRanking, RankingMetadata, Stage, StageEvent, Synthesis,
};
use crate::session::runner::SessionObserver;
use crate::session::state::{AssistantMessage, Conversation, Message, SendHandle};

/// Shown for conversations the backend has not titled yet.
const UNTITLED: &str = "New Session";

/// Width of the title column in the conversation list.
const TITLE_COLUMN: usize = 40;

/// Display configuration for the renderer.
#[derive(Default)]
pub struct RendererConfig {
    /// Print stage 1 responses and stage 2 evaluations in full instead of one line each.
    pub show_details: bool,
}

/// Produces colored terminal output for transcripts and stage progress.
pub struct Renderer<W: Write> {
    config: RendererConfig,
    /// Columns available for one-line summaries.
    width: usize,
    out: W,
}

impl<W: Write> Renderer<W> {
    /// Render into `writer` at a fixed 80 columns.
    pub fn with_writer(writer: W) -> Self {
        Self {
            config: RendererConfig::default(),
            width: 80,
            out: writer,
        }
    }

    pub fn set_show_details(&mut self, show: bool) {
        self.config.show_details = show;
    }

    pub fn set_width(&mut self, width: usize) {
        self.width = width.max(1);
    }

    // --- Conversation list ---

    pub fn render_conversation_list(
        &mut self,
        conversations: &[ConversationSummary],
        active: Option<&str>,
    ) {
        if conversations.is_empty() {
            queue!(
                self.out,
                Print(theme::dim().apply("No conversations yet.")),
                Print("\n")
            )
            .ok();
            self.out.flush().ok();
            return;
        }
        for conv in conversations {
            let marker = if active == Some(conv.id.as_str()) {
                "*"
            } else {
                " "
            };
            let title = display_title(conv.title.as_deref());
            let title = pad_to_width(&truncate_to_width(title, TITLE_COLUMN), TITLE_COLUMN);
            let noun = if conv.message_count == 1 {
                "message"
            } else {
                "messages"
            };
            queue!(
                self.out,
                Print(format!("{marker} {}  ", short_id(&conv.id))),
                Print(title),
                Print(theme::dim().apply(format!("  {} {noun}", conv.message_count))),
                Print("\n"),
            )
            .ok();
        }
        self.out.flush().ok();
    }

    // --- Transcript ---

    pub fn render_header(&mut self, conversation: &Conversation) {
        let title = display_title(conversation.title.as_deref());
        queue!(
            self.out,
            Print(theme::stage_header().apply(title)),
            Print(theme::dim().apply(format!("  ({})", short_id(&conversation.id)))),
            Print("\n\n"),
        )
        .ok();
        self.out.flush().ok();
    }

    /// Render a whole conversation as loaded from the backend.
    pub fn render_transcript(&mut self, conversation: &Conversation) {
        self.render_header(conversation);
        for message in &conversation.messages {
            match message {
                Message::User(user) => self.render_user_message(&user.content),
                Message::Assistant(assistant) => self.render_assistant(assistant),
            }
        }
    }

    pub fn render_user_message(&mut self, text: &str) {
        let mut lines = text.lines();
        let first = lines.next().unwrap_or("");
        queue!(
            self.out,
            Print(theme::prompt_style().apply("> ")),
            Print(first),
            Print("\n")
        )
        .ok();
        for line in lines {
            queue!(self.out, Print(format!("  {line}\n"))).ok();
        }
        queue!(self.out, Print("\n")).ok();
        self.out.flush().ok();
    }

    pub fn render_assistant(&mut self, message: &AssistantMessage) {
        if let Some(ref responses) = message.stage1 {
            self.render_stage1(responses);
        }
        if let Some(ref rankings) = message.stage2 {
            self.render_stage2(rankings, message.metadata.as_ref());
        }
        if let Some(ref synthesis) = message.stage3 {
            self.render_stage3(synthesis);
        }
    }

    // --- Stages ---

    pub fn render_stage_started(&mut self, stage: Stage) {
        let line = format!("{stage} · {}...", stage.title());
        queue!(self.out, Print(theme::dim().apply(line)), Print("\n")).ok();
        self.out.flush().ok();
    }

    pub fn render_stage1(&mut self, responses: &[ModelResponse]) {
        self.stage_heading(Stage::Stage1, None);
        if responses.is_empty() {
            self.dim_line("  (no responses)");
        }
        for response in responses {
            if self.config.show_details {
                self.model_line(&response.model);
                self.indented(&response.response);
            } else {
                self.summary_line(&response.model, first_line(&response.response));
            }
        }
        queue!(self.out, Print("\n")).ok();
        self.out.flush().ok();
    }

    pub fn render_stage2(&mut self, rankings: &[PeerRanking], metadata: Option<&RankingMetadata>) {
        self.stage_heading(Stage::Stage2, None);
        let leaderboard = metadata.map(RankingMetadata::leaderboard).unwrap_or_default();

        if self.config.show_details {
            for ranking in rankings {
                self.model_line(&ranking.model);
                let text = match metadata {
                    Some(metadata) => deanonymize(&ranking.ranking, metadata),
                    None => ranking.ranking.clone(),
                };
                self.indented(&text);
            }
        } else if leaderboard.is_empty() {
            for ranking in rankings {
                let order: Vec<String> = ranking
                    .parsed_ranking
                    .iter()
                    .map(|label| resolve_label(label, metadata))
                    .collect();
                self.summary_line(&ranking.model, &order.join(" > "));
            }
        }

        for (position, (model, average)) in leaderboard.iter().enumerate() {
            queue!(
                self.out,
                Print(format!("  {}. ", position + 1)),
                Print(theme::model_name().apply(*model)),
                Print(theme::dim().apply(format!("  avg {average:.2}"))),
                Print("\n"),
            )
            .ok();
        }
        if rankings.is_empty() && leaderboard.is_empty() {
            self.dim_line("  (no rankings)");
        }
        queue!(self.out, Print("\n")).ok();
        self.out.flush().ok();
    }

    pub fn render_stage3(&mut self, synthesis: &Synthesis) {
        self.stage_heading(Stage::Stage3, synthesis.model());
        for line in synthesis.text().lines() {
            queue!(self.out, Print(line), Print("\n")).ok();
        }
        queue!(self.out, Print("\n")).ok();
        self.out.flush().ok();
    }

    // --- Chat ---

    pub fn render_help(&mut self) {
        let help = "/new · /list · /switch ID · /rename TITLE · /export [PATH] · /details · /quit";
        self.dim_line(help);
    }

    pub fn show_prompt(&mut self) {
        queue!(self.out, Print(theme::prompt_style().apply("> "))).ok();
        self.out.flush().ok();
    }

    // --- Send lifecycle ---

    pub fn render_title(&mut self, title: &str) {
        self.dim_line(&format!("Title: {title}"));
    }

    pub fn render_done(&mut self) {
        queue!(self.out, Print(theme::result_line().apply("Done")), Print("\n")).ok();
        self.out.flush().ok();
    }

    pub fn render_error(&mut self, text: &str) {
        queue!(
            self.out,
            Print(theme::error().apply(format!("✗ {text}"))),
            Print("\n")
        )
        .ok();
        self.out.flush().ok();
    }

    pub fn render_warning(&mut self, warning: &str) {
        self.dim_line(&format!("[warn] {warning}"));
    }

    /// Write raw text without styling.
    pub fn write_raw(&mut self, text: &str) {
        queue!(self.out, Print(text)).ok();
        self.out.flush().ok();
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn stage_heading(&mut self, stage: Stage, model: Option<&str>) {
        queue!(
            self.out,
            Print(theme::stage_header().apply(format!("{stage} · {}", stage.title())))
        )
        .ok();
        if let Some(model) = model {
            queue!(self.out, Print(theme::dim().apply(format!(" ({model})")))).ok();
        }
        queue!(self.out, Print("\n")).ok();
    }

    fn model_line(&mut self, model: &str) {
        queue!(
            self.out,
            Print("  "),
            Print(theme::model_name().apply(model)),
            Print("\n")
        )
        .ok();
    }

    /// `  <model>: <text>`, with `text` cut to the line width.
    fn summary_line(&mut self, model: &str, text: &str) {
        let used = 4 + model.width();
        let text = truncate_to_width(text, self.width.saturating_sub(used));
        queue!(
            self.out,
            Print("  "),
            Print(theme::model_name().apply(model)),
            Print(format!(": {text}\n")),
        )
        .ok();
    }

    fn indented(&mut self, text: &str) {
        for line in text.lines() {
            if line.is_empty() {
                queue!(self.out, Print("\n")).ok();
            } else {
                queue!(self.out, Print(format!("    {line}\n"))).ok();
            }
        }
    }

    fn dim_line(&mut self, text: &str) {
        queue!(self.out, Print(theme::dim().apply(text)), Print("\n")).ok();
        self.out.flush().ok();
    }
}

impl<W: Write> SessionObserver for Renderer<W> {
    fn transcript_changed(
        &mut self,
        conversation: &Conversation,
        handle: &SendHandle,
        event: &StageEvent,
    ) {
        let active = conversation
            .messages
            .get(handle.user_index() + 1)
            .and_then(Message::as_assistant);
        match event {
            StageEvent::Stage1Start => self.render_stage_started(Stage::Stage1),
            StageEvent::Stage2Start => self.render_stage_started(Stage::Stage2),
            StageEvent::Stage3Start => self.render_stage_started(Stage::Stage3),
            StageEvent::Stage1Complete { .. } => {
                if let Some(responses) = active.and_then(|m| m.stage1.as_ref()) {
                    self.render_stage1(responses);
                }
            }
            StageEvent::Stage2Complete { .. } => {
                if let Some(msg) = active
                    && let Some(ref rankings) = msg.stage2
                {
                    self.render_stage2(rankings, msg.metadata.as_ref());
                }
            }
            StageEvent::Stage3Complete { .. } => {
                if let Some(synthesis) = active.and_then(|m| m.stage3.as_ref()) {
                    self.render_stage3(synthesis);
                }
            }
            StageEvent::TitleComplete { data } => {
                if let Some(update) = data {
                    self.render_title(&update.title);
                }
            }
            StageEvent::Complete => self.render_done(),
            // Reported once through `send_failed`, after rollback.
            StageEvent::Error { .. } => {}
        }
    }

    fn send_failed(&mut self, _conversation: &Conversation, error: &SendError) {
        self.render_error(&format!("{error} (message withdrawn)"));
    }
}

/// Current terminal width, 80 when stdout is not a terminal.
pub fn terminal_width() -> usize {
    crossterm::terminal::size()
        .map_or(80, |(width, _)| usize::from(width))
        .max(1)
}

fn display_title(title: Option<&str>) -> &str {
    title.filter(|t| !t.trim().is_empty()).unwrap_or(UNTITLED)
}

/// First 8 characters of a conversation id, enough to tell rows apart.
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

/// Replace anonymous labels (`Response A`) with the models that wrote them.
pub fn deanonymize(text: &str, metadata: &RankingMetadata) -> String {
    metadata
        .label_to_model
        .iter()
        .fold(text.to_string(), |acc, (label, model)| acc.replace(label.as_str(), model))
}

fn resolve_label(label: &str, metadata: Option<&RankingMetadata>) -> String {
    metadata
        .and_then(|m| m.label_to_model.get(label))
        .cloned()
        .unwrap_or_else(|| label.to_string())
}

/// Extract the first line of a string (no truncation).
fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}

/// Truncate a string to fit within `max_width` display columns, appending `...` if truncated.
fn truncate_to_width(s: &str, max_width: usize) -> String {
    let ellipsis_width = 3;
    let mut width = 0;
    let mut cut_pos = 0;
    let mut result = String::new();
    for ch in s.chars() {
        let ch_width = ch.width().unwrap_or(0);
        if width + ch_width > max_width {
            if max_width >= ellipsis_width {
                result.truncate(cut_pos);
                result.push_str("...");
            } else {
                result.clear();
            }
            return result;
        }
        result.push(ch);
        width += ch_width;
        if width <= max_width.saturating_sub(ellipsis_width) {
            cut_pos = result.len();
        }
    }
    result
}

/// Right-pad with spaces to `width` display columns.
fn pad_to_width(s: &str, width: usize) -> String {
    let padding = width.saturating_sub(s.width());
    format!("{s}{}", " ".repeat(padding))
}
