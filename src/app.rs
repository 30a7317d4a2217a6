//! Client-side session state: the conversation list and the active transcript.

use tracing::{debug, warn};

use crate::api::{ConversationSummary, CouncilApi};
use crate::error::{ApiError, SendError};
use crate::protocol::types::StageEvent;
use crate::session::runner::{SessionObserver, StreamSession};
use crate::session::state::{Conversation, Refresh, SendHandle, Transcript};

/// Everything a front end shows: the list on the side, the open conversation.
pub struct ClientSession<A> {
    api: A,
    conversations: Vec<ConversationSummary>,
    active: Option<Transcript>,
}

impl<A: CouncilApi> ClientSession<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            conversations: Vec::new(),
            active: None,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    pub fn active(&self) -> Option<&Conversation> {
        self.active.as_ref().map(Transcript::conversation)
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_ref().map(Transcript::id)
    }

    /// A send is in flight; input should stay disabled.
    pub fn is_loading(&self) -> bool {
        self.active.as_ref().is_some_and(Transcript::is_open)
    }

    pub async fn refresh_conversations(&mut self) -> Result<(), ApiError> {
        self.conversations = self.api.list_conversations().await?;
        Ok(())
    }

    /// Create a conversation, put it at the top of the list and select it.
    pub async fn new_conversation(&mut self) -> Result<&Conversation, ApiError> {
        let created = self.api.create_conversation().await?;
        self.conversations.insert(0, created.summary());
        let transcript = Transcript::new(Conversation::new(created.id, created.created_at));
        Ok(self.active.insert(transcript).conversation())
    }

    pub async fn select_conversation(&mut self, id: &str) -> Result<&Conversation, ApiError> {
        let conversation = self.api.get_conversation(id).await?;
        Ok(self.active.insert(Transcript::new(conversation)).conversation())
    }

    pub async fn delete_conversation(&mut self, id: &str) -> Result<(), ApiError> {
        self.api.delete_conversation(id).await?;
        self.conversations.retain(|c| c.id != id);
        if self.active_id() == Some(id) {
            self.active = None;
        }
        Ok(())
    }

    pub async fn rename_conversation(&mut self, id: &str, title: &str) -> Result<(), ApiError> {
        self.api.rename_conversation(id, title).await?;
        if let Some(row) = self.conversations.iter_mut().find(|c| c.id == id) {
            row.title = Some(title.to_string());
        }
        if let Some(transcript) = self.active.as_mut().filter(|t| t.id() == id) {
            transcript.set_title(title);
        }
        Ok(())
    }

    pub async fn export_conversation(&self, id: &str) -> Result<String, ApiError> {
        self.api.export_conversation(id).await
    }

    /// Send `content` to the active conversation, reporting progress to `observer`.
    ///
    /// Refresh requests raised while streaming are served after the stream
    /// ends. Refresh failures are logged, not returned: the send itself
    /// already succeeded or failed on its own terms.
    pub async fn send_message<O: SessionObserver>(
        &mut self,
        content: &str,
        observer: &mut O,
    ) -> Result<(), SendError> {
        let mut tracking = RefreshTracker {
            inner: observer,
            list: false,
            reconcile: false,
        };
        let result = StreamSession::new(&self.api, &mut tracking)
            .send(self.active.as_mut(), content)
            .await;
        let (list, reconcile) = (tracking.list, tracking.reconcile);

        if list || reconcile {
            if let Err(e) = self.refresh_conversations().await {
                warn!(error = %e, "failed to refresh conversation list");
            }
        }
        if reconcile {
            self.reconcile_active().await;
        }
        result
    }

    /// Replace the active transcript with the backend's copy.
    async fn reconcile_active(&mut self) {
        let Some(id) = self.active_id().map(str::to_string) else {
            return;
        };
        match self.api.get_conversation(&id).await {
            Ok(conversation) => {
                if let Some(transcript) = self.active.as_mut()
                    && let Err(e) = transcript.reconcile(conversation)
                {
                    debug!(error = %e, "skipped reconciliation");
                }
            }
            Err(e) => warn!(error = %e, conversation = %id, "failed to reconcile conversation"),
        }
    }
}

/// Forwards to the caller's observer and remembers which refreshes were asked for.
struct RefreshTracker<'o, O> {
    inner: &'o mut O,
    list: bool,
    reconcile: bool,
}

impl<O: SessionObserver> SessionObserver for RefreshTracker<'_, O> {
    fn send_started(&mut self, conversation: &Conversation, handle: &SendHandle) {
        self.inner.send_started(conversation, handle);
    }

    fn transcript_changed(
        &mut self,
        conversation: &Conversation,
        handle: &SendHandle,
        event: &StageEvent,
    ) {
        self.inner.transcript_changed(conversation, handle, event);
    }

    fn refresh_requested(&mut self, refresh: Refresh) {
        match refresh {
            Refresh::ConversationList => self.list = true,
            Refresh::Reconcile => self.reconcile = true,
        }
        self.inner.refresh_requested(refresh);
    }

    fn send_failed(&mut self, conversation: &Conversation, error: &SendError) {
        self.inner.send_failed(conversation, error);
    }
}
