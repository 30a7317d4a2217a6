use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PreconditionError;
use crate::protocol::types::{
    ModelResponse, PeerRanking, RankingMetadata, Stage, StageEvent, Synthesis,
};

/// A conversation as held by the client. The backend owns everything except
/// the optimistic pair appended while a send is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    /// Backend timestamp, kept verbatim.
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, created_at: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: created_at.into(),
            title: None,
            messages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
}

impl Message {
    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Message::Assistant(msg) => Some(msg),
            Message::User(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub content: String,
}

/// The council's answer to one user message, filled in stage by stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub stage1: Option<Vec<ModelResponse>>,
    #[serde(default)]
    pub stage2: Option<Vec<PeerRanking>>,
    #[serde(default)]
    pub stage3: Option<Synthesis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RankingMetadata>,
    #[serde(default, skip_serializing_if = "StageLoading::is_idle")]
    pub loading: StageLoading,
}

/// Per-stage "in progress" flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLoading {
    pub stage1: bool,
    pub stage2: bool,
    pub stage3: bool,
}

impl StageLoading {
    pub fn get(&self, stage: Stage) -> bool {
        match stage {
            Stage::Stage1 => self.stage1,
            Stage::Stage2 => self.stage2,
            Stage::Stage3 => self.stage3,
        }
    }

    pub fn set(&mut self, stage: Stage, loading: bool) {
        match stage {
            Stage::Stage1 => self.stage1 = loading,
            Stage::Stage2 => self.stage2 = loading,
            Stage::Stage3 => self.stage3 = loading,
        }
    }

    pub fn is_idle(&self) -> bool {
        !(self.stage1 || self.stage2 || self.stage3)
    }
}

/// Payload of a `stageN_complete` transition.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    Stage1(Option<Vec<ModelResponse>>),
    Stage2 {
        rankings: Option<Vec<PeerRanking>>,
        metadata: Option<RankingMetadata>,
    },
    Stage3(Option<Synthesis>),
}

impl StageOutput {
    pub fn stage(&self) -> Stage {
        match self {
            StageOutput::Stage1(_) => Stage::Stage1,
            StageOutput::Stage2 { .. } => Stage::Stage2,
            StageOutput::Stage3(_) => Stage::Stage3,
        }
    }
}

/// Identifies the send that subsequent transitions target.
///
/// Returned by [`Transcript::begin_send`]. Transitions carrying a handle from
/// an earlier send are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendHandle {
    conversation_id: String,
    seq: u64,
    user_index: usize,
}

impl SendHandle {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Index of the optimistic user message; the assistant message follows it.
    pub fn user_index(&self) -> usize {
        self.user_index
    }
}

/// Lifecycle of the most recent send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SendState {
    #[default]
    Idle,
    /// In flight. `stage` is the highest stage seen so far (0 before any).
    Sending { stage: u8 },
    Complete,
    /// Server reported an error; waiting for rollback.
    Failed { message: String },
}

/// Request to the conversation list view, raised by the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refresh {
    /// Title or message counts changed; refetch the list.
    ConversationList,
    /// The send finished; refetch the list and the active conversation.
    Reconcile,
}

/// What applying one transition did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reduction {
    Updated,
    /// No open send matched; nothing changed.
    Ignored,
    Refresh(Refresh),
    Completed,
    Failed(String),
}

#[derive(Debug, Clone)]
struct OpenSend {
    seq: u64,
    user_index: usize,
    /// Title before the send, restored on rollback.
    prior_title: Option<String>,
}

/// Sole owner of transcript mutation for one conversation.
#[derive(Debug)]
pub struct Transcript {
    conversation: Conversation,
    state: SendState,
    open: Option<OpenSend>,
    next_seq: u64,
}

impl Transcript {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            state: SendState::Idle,
            open: None,
            next_seq: 0,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn into_conversation(self) -> Conversation {
        self.conversation
    }

    pub fn id(&self) -> &str {
        &self.conversation.id
    }

    pub fn state(&self) -> &SendState {
        &self.state
    }

    /// A send is in flight; new sends are refused until it ends.
    pub fn is_open(&self) -> bool {
        matches!(self.state, SendState::Sending { .. })
    }

    /// Append the optimistic user/assistant pair and open a send.
    pub fn begin_send(&mut self, content: impl Into<String>) -> Result<SendHandle, PreconditionError> {
        match self.state {
            SendState::Sending { .. } => return Err(PreconditionError::SendInFlight),
            SendState::Failed { .. } => return Err(PreconditionError::RollbackPending),
            SendState::Idle | SendState::Complete => {}
        }
        let content = content.into();
        if content.trim().is_empty() {
            return Err(PreconditionError::EmptyMessage);
        }

        let user_index = self.conversation.messages.len();
        self.conversation
            .messages
            .push(Message::User(UserMessage { content }));
        self.conversation
            .messages
            .push(Message::Assistant(AssistantMessage::default()));

        let seq = self.next_seq;
        self.next_seq += 1;
        self.open = Some(OpenSend {
            seq,
            user_index,
            prior_title: self.conversation.title.clone(),
        });
        self.state = SendState::Sending { stage: 0 };

        Ok(SendHandle {
            conversation_id: self.conversation.id.clone(),
            seq,
            user_index,
        })
    }

    /// The assistant message being filled by `handle`, if that send is still open.
    pub fn active_message(&self, handle: &SendHandle) -> Option<&AssistantMessage> {
        if !self.targets(handle) {
            return None;
        }
        self.conversation
            .messages
            .get(handle.user_index + 1)
            .and_then(Message::as_assistant)
    }

    pub fn apply_stage_start(&mut self, handle: &SendHandle, stage: Stage) -> Reduction {
        let Some(msg) = self.active_mut(handle) else {
            return ignored(handle, "stage start");
        };
        msg.loading.set(stage, true);
        self.advance(stage);
        Reduction::Updated
    }

    pub fn apply_stage_complete(&mut self, handle: &SendHandle, output: StageOutput) -> Reduction {
        let stage = output.stage();
        let Some(msg) = self.active_mut(handle) else {
            return ignored(handle, "stage complete");
        };
        match output {
            StageOutput::Stage1(data) => msg.stage1 = data,
            StageOutput::Stage2 { rankings, metadata } => {
                msg.stage2 = rankings;
                msg.metadata = metadata;
            }
            StageOutput::Stage3(data) => msg.stage3 = data,
        }
        msg.loading.set(stage, false);
        self.advance(stage);
        Reduction::Updated
    }

    /// Record the generated title and ask the list view to refresh.
    ///
    /// Messages are not touched. A rollback of the send restores the old title.
    pub fn apply_title_complete(&mut self, handle: &SendHandle, title: Option<String>) -> Reduction {
        if handle.conversation_id != self.conversation.id {
            return ignored(handle, "title");
        }
        if let Some(title) = title {
            self.conversation.title = Some(title);
        }
        Reduction::Refresh(Refresh::ConversationList)
    }

    pub fn apply_complete(&mut self, handle: &SendHandle) -> Reduction {
        if !self.targets(handle) {
            return ignored(handle, "complete");
        }
        if let Some(msg) = self.active_mut(handle) {
            msg.loading = StageLoading::default();
        }
        self.state = SendState::Complete;
        self.open = None;
        Reduction::Completed
    }

    pub fn apply_error(&mut self, handle: &SendHandle, message: impl Into<String>) -> Reduction {
        if !self.targets(handle) {
            return ignored(handle, "error");
        }
        if let Some(msg) = self.active_mut(handle) {
            msg.loading = StageLoading::default();
        }
        let message = message.into();
        self.state = SendState::Failed {
            message: message.clone(),
        };
        Reduction::Failed(message)
    }

    /// Dispatch a decoded transition to the matching operation.
    pub fn apply(&mut self, handle: &SendHandle, event: &StageEvent) -> Reduction {
        match event {
            StageEvent::Stage1Start => self.apply_stage_start(handle, Stage::Stage1),
            StageEvent::Stage2Start => self.apply_stage_start(handle, Stage::Stage2),
            StageEvent::Stage3Start => self.apply_stage_start(handle, Stage::Stage3),
            StageEvent::Stage1Complete { data } => {
                self.apply_stage_complete(handle, StageOutput::Stage1(data.clone()))
            }
            StageEvent::Stage2Complete { data, metadata } => self.apply_stage_complete(
                handle,
                StageOutput::Stage2 {
                    rankings: data.clone(),
                    metadata: metadata.clone(),
                },
            ),
            StageEvent::Stage3Complete { data } => {
                self.apply_stage_complete(handle, StageOutput::Stage3(data.clone()))
            }
            StageEvent::TitleComplete { data } => {
                self.apply_title_complete(handle, data.as_ref().map(|d| d.title.clone()))
            }
            StageEvent::Complete => self.apply_complete(handle),
            StageEvent::Error { message } => self.apply_error(
                handle,
                message.clone().unwrap_or_else(|| "unknown error".to_string()),
            ),
        }
    }

    /// Remove the pair appended by `handle`'s send, restoring the prior transcript.
    ///
    /// Returns `false` (and changes nothing) when that send already completed
    /// or was already rolled back.
    pub fn rollback_last_send(&mut self, handle: &SendHandle) -> bool {
        if handle.conversation_id != self.conversation.id
            || self.open.as_ref().is_none_or(|open| open.seq != handle.seq)
        {
            return false;
        }
        let Some(open) = self.open.take() else {
            return false;
        };
        self.conversation.messages.truncate(open.user_index);
        self.conversation.title = open.prior_title;
        self.state = SendState::Idle;
        true
    }

    /// Replace the transcript with the backend's copy.
    pub fn reconcile(&mut self, conversation: Conversation) -> Result<(), PreconditionError> {
        if self.is_open() {
            return Err(PreconditionError::SendInFlight);
        }
        self.conversation = conversation;
        self.open = None;
        self.state = SendState::Idle;
        Ok(())
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.conversation.title = Some(title.into());
    }

    fn targets(&self, handle: &SendHandle) -> bool {
        self.is_open()
            && handle.conversation_id == self.conversation.id
            && self.open.as_ref().is_some_and(|open| open.seq == handle.seq)
    }

    fn active_mut(&mut self, handle: &SendHandle) -> Option<&mut AssistantMessage> {
        if !self.targets(handle) {
            return None;
        }
        match self.conversation.messages.get_mut(handle.user_index + 1) {
            Some(Message::Assistant(msg)) => Some(msg),
            _ => None,
        }
    }

    fn advance(&mut self, stage: Stage) {
        if let SendState::Sending { stage: current } = &mut self.state {
            *current = (*current).max(stage.number());
        }
    }
}

fn ignored(handle: &SendHandle, what: &str) -> Reduction {
    debug!(
        conversation = handle.conversation_id(),
        "ignoring {what} for a send that is not open"
    );
    Reduction::Ignored
}
