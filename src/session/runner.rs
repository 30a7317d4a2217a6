use tracing::{debug, info, warn};

use crate::api::CouncilApi;
use crate::error::{PreconditionError, SendError};
use crate::protocol::decode::FrameReader;
use crate::protocol::interpret::{Interpretation, interpret};
use crate::protocol::types::StageEvent;
use crate::session::state::{Conversation, Reduction, Refresh, SendHandle, Transcript};

/// Receives transcript updates as a send progresses.
///
/// Called after every applied transition, never batched. All methods default
/// to no-ops.
pub trait SessionObserver {
    /// The optimistic user/assistant pair was appended.
    fn send_started(&mut self, _conversation: &Conversation, _handle: &SendHandle) {}

    /// A transition was applied to the transcript.
    fn transcript_changed(
        &mut self,
        _conversation: &Conversation,
        _handle: &SendHandle,
        _event: &StageEvent,
    ) {
    }

    /// The conversation list (or the whole conversation) should be refetched.
    fn refresh_requested(&mut self, _refresh: Refresh) {}

    /// The send failed and the optimistic pair was removed.
    fn send_failed(&mut self, _conversation: &Conversation, _error: &SendError) {}
}

impl SessionObserver for () {}

/// Drives one streaming send from `begin_send` to `complete` or rollback.
pub struct StreamSession<'a, A: ?Sized, O> {
    api: &'a A,
    observer: &'a mut O,
}

impl<'a, A, O> StreamSession<'a, A, O>
where
    A: CouncilApi + ?Sized,
    O: SessionObserver,
{
    pub fn new(api: &'a A, observer: &'a mut O) -> Self {
        Self { api, observer }
    }

    /// Send `content` to the active conversation and apply the council's
    /// progress to `transcript` as it streams in.
    ///
    /// On any failure after the optimistic append, the pair is rolled back
    /// before the error is returned; `transcript` is then exactly as it was.
    pub async fn send(
        &mut self,
        transcript: Option<&mut Transcript>,
        content: &str,
    ) -> Result<(), SendError> {
        let transcript = transcript.ok_or(PreconditionError::NoActiveConversation)?;
        if transcript.id().is_empty() {
            return Err(PreconditionError::NoActiveConversation.into());
        }
        let handle = transcript.begin_send(content)?;
        info!(conversation = handle.conversation_id(), "send started");
        self.observer.send_started(transcript.conversation(), &handle);

        match self.pump(transcript, &handle, content).await {
            Ok(()) => {
                info!(conversation = handle.conversation_id(), "send complete");
                Ok(())
            }
            Err(err) => {
                let removed = transcript.rollback_last_send(&handle);
                warn!(
                    conversation = handle.conversation_id(),
                    error = %err,
                    removed,
                    "send failed, rolled back"
                );
                self.observer.send_failed(transcript.conversation(), &err);
                Err(err)
            }
        }
    }

    async fn pump(
        &mut self,
        transcript: &mut Transcript,
        handle: &SendHandle,
        content: &str,
    ) -> Result<(), SendError> {
        let chunks = self
            .api
            .open_message_stream(handle.conversation_id(), content)
            .await?;
        let mut frames = FrameReader::new(chunks);

        while let Some(frame) = frames.next_frame().await? {
            let event = match interpret(frame) {
                Interpretation::Event(event) => event,
                Interpretation::Unknown(kind) => {
                    debug!(%kind, "ignoring unknown event kind");
                    continue;
                }
                Interpretation::Malformed(reason) => {
                    warn!(%reason, "dropping malformed event");
                    continue;
                }
            };

            match transcript.apply(handle, &event) {
                Reduction::Ignored => {}
                Reduction::Updated => {
                    self.observer
                        .transcript_changed(transcript.conversation(), handle, &event);
                }
                Reduction::Refresh(refresh) => {
                    self.observer
                        .transcript_changed(transcript.conversation(), handle, &event);
                    self.observer.refresh_requested(refresh);
                }
                Reduction::Completed => {
                    self.observer
                        .transcript_changed(transcript.conversation(), handle, &event);
                    self.observer.refresh_requested(Refresh::Reconcile);
                    return Ok(());
                }
                Reduction::Failed(message) => {
                    self.observer
                        .transcript_changed(transcript.conversation(), handle, &event);
                    return Err(SendError::Stage(message));
                }
            }
        }

        Err(SendError::StreamEnded)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures::StreamExt;
    use futures::stream;

    use super::*;
    use crate::api::{ChunkStream, ConversationSummary, CreatedConversation};
    use crate::error::ApiError;
    use crate::session::state::{Message, SendState};

    /// Serves one scripted stream body; the other calls are unused here.
    struct Scripted {
        chunks: Mutex<Option<Vec<Result<Vec<u8>, ApiError>>>>,
        open_error: Option<u16>,
    }

    impl Scripted {
        fn body(chunks: &[&str]) -> Self {
            Self {
                chunks: Mutex::new(Some(
                    chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect(),
                )),
                open_error: None,
            }
        }

        fn then_fail(self) -> Self {
            self.chunks
                .lock()
                .unwrap()
                .as_mut()
                .unwrap()
                .push(Err(ApiError::Status {
                    status: 502,
                    context: "stream",
                }));
            self
        }
    }

    #[async_trait]
    impl CouncilApi for Scripted {
        async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ApiError> {
            Ok(Vec::new())
        }
        async fn create_conversation(&self) -> Result<CreatedConversation, ApiError> {
            unimplemented!()
        }
        async fn get_conversation(&self, _id: &str) -> Result<Conversation, ApiError> {
            unimplemented!()
        }
        async fn rename_conversation(&self, _id: &str, _title: &str) -> Result<(), ApiError> {
            Ok(())
        }
        async fn delete_conversation(&self, _id: &str) -> Result<(), ApiError> {
            Ok(())
        }
        async fn export_conversation(&self, _id: &str) -> Result<String, ApiError> {
            Ok(String::new())
        }
        async fn open_message_stream(
            &self,
            _id: &str,
            _content: &str,
        ) -> Result<ChunkStream, ApiError> {
            if let Some(status) = self.open_error {
                return Err(ApiError::Status {
                    status,
                    context: "send message",
                });
            }
            let chunks = self.chunks.lock().unwrap().take().unwrap_or_default();
            Ok(stream::iter(chunks).boxed())
        }
    }

    #[derive(Default)]
    struct Recorder {
        kinds: Vec<&'static str>,
        refreshes: Vec<Refresh>,
        started: usize,
        failed: Vec<String>,
    }

    impl SessionObserver for Recorder {
        fn send_started(&mut self, _conversation: &Conversation, _handle: &SendHandle) {
            self.started += 1;
        }
        fn transcript_changed(
            &mut self,
            _conversation: &Conversation,
            _handle: &SendHandle,
            event: &StageEvent,
        ) {
            self.kinds.push(event.kind());
        }
        fn refresh_requested(&mut self, refresh: Refresh) {
            self.refreshes.push(refresh);
        }
        fn send_failed(&mut self, _conversation: &Conversation, error: &SendError) {
            self.failed.push(error.to_string());
        }
    }

    fn transcript() -> Transcript {
        let mut conversation = Conversation::new("abc", "2025-01-01T00:00:00");
        conversation.messages.push(Message::User(
            crate::session::state::UserMessage {
                content: "older".to_string(),
            },
        ));
        Transcript::new(conversation)
    }

    const FULL: &[&str] = &[
        "data: {\"type\":\"stage1_start\"}\n\n",
        "data: {\"type\":\"stage1_complete\",\"data\":[{\"model\":\"A\",\"response\":\"a\"}]}\n\n",
        "data: {\"type\":\"stage2_start\"}\n\ndata: {\"type\":\"stage2_complete\",\"data\":[],",
        "\"metadata\":{\"label_to_model\":{\"Response A\":\"A\"},\"aggregate_rankings\":{\"A\":1.0}}}\n\n",
        "data: {\"type\":\"stage3_start\"}\n\ndata: {\"type\":\"stage3_complete\",\"data\":\"final\"}\n\n",
        "data: {\"type\":\"title_complete\",\"data\":{\"title\":\"Older\"}}\n\n",
        "data: {\"type\":\"complete\"}\n\n",
    ];

    #[tokio::test]
    async fn complete_stream_fills_the_assistant_message() {
        let api = Scripted::body(FULL);
        let mut recorder = Recorder::default();
        let mut t = transcript();

        StreamSession::new(&api, &mut recorder)
            .send(Some(&mut t), "question")
            .await
            .unwrap();

        let msg = t.conversation().messages[2].as_assistant().unwrap();
        assert!(msg.stage1.is_some() && msg.stage2.is_some() && msg.stage3.is_some());
        assert!(msg.loading.is_idle());
        assert_eq!(msg.metadata.as_ref().unwrap().aggregate_rankings["A"], 1.0);
        assert_eq!(t.state(), &SendState::Complete);
        assert_eq!(recorder.started, 1);
        assert_eq!(recorder.kinds.len(), 8);
        assert_eq!(
            recorder.refreshes,
            vec![Refresh::ConversationList, Refresh::Reconcile]
        );
    }

    #[tokio::test]
    async fn transport_failure_rolls_back() {
        let api = Scripted::body(&["data: {\"type\":\"stage1_start\"}\n\n"]).then_fail();
        let mut recorder = Recorder::default();
        let mut t = transcript();
        let before = t.conversation().clone();

        let err = StreamSession::new(&api, &mut recorder)
            .send(Some(&mut t), "question")
            .await
            .unwrap_err();

        assert!(matches!(err, SendError::Transport(_)));
        assert_eq!(t.conversation(), &before);
        assert_eq!(t.state(), &SendState::Idle);
        assert_eq!(recorder.kinds, vec!["stage1_start"]);
        assert_eq!(recorder.failed.len(), 1);
    }

    #[tokio::test]
    async fn transport_failure_after_title_restores_conversation() {
        let api = Scripted::body(&[
            "data: {\"type\":\"stage1_start\"}\n\n",
            "data: {\"type\":\"title_complete\",\"data\":{\"title\":\"New\"}}\n\n",
        ])
        .then_fail();
        let mut t = transcript();
        let before = t.conversation().clone();

        let err = StreamSession::new(&api, &mut ())
            .send(Some(&mut t), "question")
            .await
            .unwrap_err();

        assert!(err.rolled_back());
        assert_eq!(t.conversation(), &before);
    }

    #[tokio::test]
    async fn null_content_keeps_the_other_responses() {
        let api = Scripted::body(&[
            "data: {\"type\":\"stage1_start\"}\n",
            "data: {\"type\":\"stage1_complete\",\"data\":[{\"model\":\"A\",\"response\":\"a\"},{\"model\":\"B\",\"response\":null}]}\n",
            "data: {\"type\":\"complete\"}\n",
        ]);
        let mut t = transcript();

        StreamSession::new(&api, &mut ())
            .send(Some(&mut t), "question")
            .await
            .unwrap();

        let msg = t.conversation().messages[2].as_assistant().unwrap();
        let stage1 = msg.stage1.as_ref().unwrap();
        assert_eq!(stage1.len(), 2);
        assert_eq!(stage1[1].model, "B");
        assert_eq!(stage1[1].response, "");
        assert!(msg.loading.is_idle());
    }

    #[tokio::test]
    async fn early_end_of_stream_rolls_back() {
        let api = Scripted::body(&["data: {\"type\":\"stage1_start\"}\n\n"]);
        let mut t = transcript();
        let before = t.conversation().clone();

        let err = StreamSession::new(&api, &mut ())
            .send(Some(&mut t), "question")
            .await
            .unwrap_err();

        assert!(matches!(err, SendError::StreamEnded));
        assert_eq!(t.conversation(), &before);
    }

    #[tokio::test]
    async fn server_error_event_rolls_back() {
        let api = Scripted::body(&[
            "data: {\"type\":\"stage1_start\"}\n\n",
            "data: {\"type\":\"error\",\"message\":\"All models failed\"}\n\n",
            "data: {\"type\":\"complete\"}\n\n",
        ]);
        let mut t = transcript();

        let err = StreamSession::new(&api, &mut ())
            .send(Some(&mut t), "question")
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "council failed: All models failed");
        assert_eq!(t.conversation().messages.len(), 1);
        assert_eq!(t.state(), &SendState::Idle);
    }

    #[tokio::test]
    async fn rejected_open_rolls_back() {
        let api = Scripted {
            chunks: Mutex::new(None),
            open_error: Some(404),
        };
        let mut t = transcript();
        let err = StreamSession::new(&api, &mut ())
            .send(Some(&mut t), "question")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SendError::Transport(ApiError::Status { status: 404, .. })
        ));
        assert_eq!(t.conversation().messages.len(), 1);
    }

    #[tokio::test]
    async fn malformed_line_is_skipped() {
        let api = Scripted::body(&[
            "data: {not valid json\n",
            "data: {\"type\":\"stage1_complete\",\"data\":[{\"model\":\"A\",\"response\":\"a\"}]}\n",
            "data: {\"type\":\"stage9_start\"}\n",
            "data: {\"type\":\"complete\"}\n",
        ]);
        let mut recorder = Recorder::default();
        let mut t = transcript();

        StreamSession::new(&api, &mut recorder)
            .send(Some(&mut t), "question")
            .await
            .unwrap();

        let msg = t.conversation().messages[2].as_assistant().unwrap();
        assert_eq!(msg.stage1.as_ref().unwrap()[0].model, "A");
        assert!(recorder.failed.is_empty());
        assert_eq!(recorder.kinds, vec!["stage1_complete", "complete"]);
    }

    #[tokio::test]
    async fn no_active_conversation_never_opens_a_stream() {
        let api = Scripted {
            chunks: Mutex::new(None),
            open_error: Some(500),
        };
        let err = StreamSession::new(&api, &mut ())
            .send(None, "question")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SendError::Precondition(PreconditionError::NoActiveConversation)
        ));
        assert!(!err.rolled_back());
    }

    #[tokio::test]
    async fn send_while_open_is_rejected() {
        let api = Scripted::body(FULL);
        let mut t = transcript();
        t.begin_send("first").unwrap();
        let before = t.conversation().clone();

        let err = StreamSession::new(&api, &mut ())
            .send(Some(&mut t), "second")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SendError::Precondition(PreconditionError::SendInFlight)
        ));
        assert_eq!(t.conversation(), &before);
    }
}
