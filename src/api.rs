//! Backend collaborator: conversation CRUD plus the streaming send.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::ApiError;
use crate::protocol::types::{RenameRequest, SendMessageRequest};
use crate::session::state::Conversation;

/// Raw body chunks of a streaming response, in arrival order.
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, ApiError>>;

/// One row of the conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub message_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Response of `POST /api/conversations`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedConversation {
    pub id: String,
    #[serde(default)]
    pub created_at: String,
}

impl CreatedConversation {
    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            created_at: self.created_at.clone(),
            message_count: 0,
            title: None,
        }
    }
}

/// Everything the client needs from the council backend.
#[async_trait]
pub trait CouncilApi: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ApiError>;
    async fn create_conversation(&self) -> Result<CreatedConversation, ApiError>;
    async fn get_conversation(&self, id: &str) -> Result<Conversation, ApiError>;
    async fn rename_conversation(&self, id: &str, title: &str) -> Result<(), ApiError>;
    async fn delete_conversation(&self, id: &str) -> Result<(), ApiError>;
    /// Markdown rendering of the conversation, produced by the backend.
    async fn export_conversation(&self, id: &str) -> Result<String, ApiError>;
    /// Start a council run. Resolves once response headers arrive; the body
    /// is returned unread.
    async fn open_message_stream(&self, id: &str, content: &str) -> Result<ChunkStream, ApiError>;
}

/// `CouncilApi` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCouncilApi {
    http: reqwest::Client,
    base: String,
    timeout: Option<Duration>,
}

impl HttpCouncilApi {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base: config.api_base.trim_end_matches('/').to_string(),
            timeout: config.request_timeout_secs.map(Duration::from_secs),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    /// Non-streaming calls get the configured timeout; the stream never does,
    /// since a council run can take minutes.
    fn with_timeout(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        context: &'static str,
    ) -> Result<reqwest::Response, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        debug!(%status, context, "backend responded");
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                context,
            });
        }
        Ok(response)
    }

    async fn json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        context: &'static str,
    ) -> Result<T, ApiError> {
        let response = self.send(self.with_timeout(request), context).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl CouncilApi for HttpCouncilApi {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ApiError> {
        self.json(
            self.http.get(self.url("/api/conversations")),
            "list conversations",
        )
        .await
    }

    async fn create_conversation(&self) -> Result<CreatedConversation, ApiError> {
        self.json(
            self.http
                .post(self.url("/api/conversations"))
                .json(&serde_json::json!({})),
            "create conversation",
        )
        .await
    }

    async fn get_conversation(&self, id: &str) -> Result<Conversation, ApiError> {
        self.json(
            self.http.get(self.url(&format!("/api/conversations/{id}"))),
            "get conversation",
        )
        .await
    }

    async fn rename_conversation(&self, id: &str, title: &str) -> Result<(), ApiError> {
        let request = self
            .http
            .put(self.url(&format!("/api/conversations/{id}")))
            .json(&RenameRequest { title });
        self.send(self.with_timeout(request), "rename conversation")
            .await?;
        Ok(())
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), ApiError> {
        let request = self
            .http
            .delete(self.url(&format!("/api/conversations/{id}")));
        self.send(self.with_timeout(request), "delete conversation")
            .await?;
        Ok(())
    }

    async fn export_conversation(&self, id: &str) -> Result<String, ApiError> {
        let request = self
            .http
            .get(self.url(&format!("/api/conversations/{id}/export")));
        let response = self
            .send(self.with_timeout(request), "export conversation")
            .await?;
        Ok(response.text().await?)
    }

    async fn open_message_stream(&self, id: &str, content: &str) -> Result<ChunkStream, ApiError> {
        let request = self
            .http
            .post(self.url(&format!("/api/conversations/{id}/message/stream")))
            .json(&SendMessageRequest { content });
        let response = self.send(request, "send message").await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ApiError::from))
            .boxed())
    }
}
