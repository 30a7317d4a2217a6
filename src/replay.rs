//! Recorded council runs, replayed without a backend.
//!
//! A case is a `.toml` file naming the prompt(s) to send; `record-stream`
//! captures the raw response body of each send next to it as `.sse`.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use serde::Deserialize;

use crate::api::{ChunkStream, ConversationSummary, CouncilApi, CreatedConversation};
use crate::display::renderer::short_id;
use crate::error::ApiError;
use crate::protocol::decode::FrameDecoder;
use crate::protocol::interpret::{Interpretation, interpret};
use crate::protocol::types::StageEvent;
use crate::session::state::{Conversation, Message, Reduction, Transcript, UserMessage};

/// Separates the bodies of consecutive sends in a `.sse` recording.
pub const BODY_SEPARATOR: &str = "\n--- next send ---\n";

const CREATED_AT: &str = "2025-01-01T00:00:00";

/// Test case definition loaded from a `.toml` file.
#[derive(Debug, Deserialize)]
pub struct ReplayCase {
    /// First message of the conversation.
    pub prompt: String,
    /// Follow-up messages, sent in order after the first completes.
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub display: DisplayConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct DisplayConfig {
    #[serde(default)]
    pub details: bool,
}

impl ReplayCase {
    /// Every message of the case, first prompt included.
    pub fn sends(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.prompt.as_str()).chain(self.messages.iter().map(String::as_str))
    }
}

/// Split a `.sse` recording into one body per send.
pub fn split_bodies(recording: &str) -> Vec<Vec<u8>> {
    recording
        .split(BODY_SEPARATOR)
        .map(|body| body.as_bytes().to_vec())
        .collect()
}

#[derive(Default)]
struct Backend {
    conversations: Vec<Conversation>,
    bodies: VecDeque<Vec<u8>>,
    created: usize,
}

/// In-memory `CouncilApi` that answers each send with the next recorded body.
///
/// Bodies are delivered in `chunk_size`-byte pieces. Each send is persisted
/// the way the backend would: the user message is stored up front, and the
/// assistant message only when the body runs to `complete`.
pub struct ReplayApi {
    backend: Mutex<Backend>,
    chunk_size: usize,
}

impl ReplayApi {
    pub fn new(bodies: Vec<Vec<u8>>) -> Self {
        Self {
            backend: Mutex::new(Backend {
                bodies: bodies.into(),
                ..Backend::default()
            }),
            chunk_size: usize::MAX,
        }
    }

    /// Deliver bodies in pieces of at most `size` bytes.
    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Seed a stored conversation.
    #[must_use]
    pub fn with_conversation(self, conversation: Conversation) -> Self {
        self.lock().conversations.push(conversation);
        self
    }

    /// Stored copy of a conversation.
    pub fn stored(&self, id: &str) -> Option<Conversation> {
        self.lock().conversations.iter().find(|c| c.id == id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Backend> {
        self.backend.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn not_found(context: &'static str) -> ApiError {
    ApiError::Status {
        status: 404,
        context,
    }
}

/// Fold a whole body into `conversation` as the backend would store it.
///
/// A failed or truncated body still leaves the user message (and any title
/// generated before the failure) behind.
fn persist(conversation: &Conversation, content: &str, body: &[u8]) -> Conversation {
    let mut stored = conversation.clone();
    stored.messages.push(Message::User(UserMessage {
        content: content.to_string(),
    }));

    let mut transcript = Transcript::new(conversation.clone());
    let Ok(handle) = transcript.begin_send(content) else {
        return stored;
    };
    let mut decoder = FrameDecoder::new();
    let frames = decoder.push(body).into_iter().chain(decoder.finish());
    for frame in frames {
        let Interpretation::Event(event) = interpret(frame) else {
            continue;
        };
        if let StageEvent::TitleComplete { data: Some(update) } = &event {
            stored.title = Some(update.title.clone());
        }
        match transcript.apply(&handle, &event) {
            Reduction::Completed => return transcript.into_conversation(),
            Reduction::Failed(_) => break,
            _ => {}
        }
    }
    stored
}

#[async_trait]
impl CouncilApi for ReplayApi {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ApiError> {
        Ok(self
            .lock()
            .conversations
            .iter()
            .rev()
            .map(|c| ConversationSummary {
                id: c.id.clone(),
                created_at: c.created_at.clone(),
                message_count: u32::try_from(c.messages.len()).unwrap_or(u32::MAX),
                title: c.title.clone(),
            })
            .collect())
    }

    async fn create_conversation(&self) -> Result<CreatedConversation, ApiError> {
        let mut backend = self.lock();
        backend.created += 1;
        let id = format!("conv-{:03}", backend.created);
        backend
            .conversations
            .push(Conversation::new(id.clone(), CREATED_AT));
        Ok(CreatedConversation {
            id,
            created_at: CREATED_AT.to_string(),
        })
    }

    async fn get_conversation(&self, id: &str) -> Result<Conversation, ApiError> {
        self.stored(id).ok_or_else(|| not_found("get conversation"))
    }

    async fn rename_conversation(&self, id: &str, title: &str) -> Result<(), ApiError> {
        let mut backend = self.lock();
        let conversation = backend
            .conversations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| not_found("rename conversation"))?;
        conversation.title = Some(title.to_string());
        Ok(())
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), ApiError> {
        let mut backend = self.lock();
        let before = backend.conversations.len();
        backend.conversations.retain(|c| c.id != id);
        if backend.conversations.len() == before {
            return Err(not_found("delete conversation"));
        }
        Ok(())
    }

    async fn export_conversation(&self, id: &str) -> Result<String, ApiError> {
        let conversation = self
            .stored(id)
            .ok_or_else(|| not_found("export conversation"))?;
        let mut markdown = format!(
            "# The Board Room Session\n\n**ID:** {}\n**Title:** {}\n\n---\n\n",
            short_id(&conversation.id),
            conversation.title.as_deref().unwrap_or("New Conversation")
        );
        for message in &conversation.messages {
            match message {
                Message::User(user) => {
                    let _ = write!(markdown, "## Your Question\n\n{}\n\n", user.content);
                }
                Message::Assistant(assistant) => {
                    if let Some(synthesis) = &assistant.stage3 {
                        let _ = write!(
                            markdown,
                            "## Board Room Decision\n\n{}\n\n---\n\n",
                            synthesis.text()
                        );
                    }
                }
            }
        }
        Ok(markdown)
    }

    async fn open_message_stream(
        &self,
        id: &str,
        content: &str,
    ) -> Result<ChunkStream, ApiError> {
        let mut backend = self.lock();
        let Some(index) = backend.conversations.iter().position(|c| c.id == id) else {
            return Err(not_found("send message"));
        };
        let Some(body) = backend.bodies.pop_front() else {
            return Err(ApiError::Status {
                status: 503,
                context: "send message",
            });
        };
        backend.conversations[index] = persist(&backend.conversations[index], content, &body);

        let chunks: Vec<Result<Vec<u8>, ApiError>> = body
            .chunks(self.chunk_size)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}
