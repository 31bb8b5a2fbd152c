use crate::{
    options::ResolvedOptions,
    pipeline::AuthPipeline,
    types::ErrorBody,
    AuthResponse, ChatSummary, ClientError, ClientOptions, ClientResult, ConversationId,
    ConversationLedger, Credential, CredentialStorage, CredentialStore, Message, Navigator,
    NotificationSink, SendMessageRequest, Severity, SignInRequest, StreamConsumer,
};
use futures::future::AbortHandle;
use parking_lot::Mutex;
use reqwest::Response;
use serde::de::DeserializeOwned;
use std::{collections::HashMap, sync::Arc};

/// Longest query the server accepts, in characters.
pub const MAX_QUERY_CHARS: usize = 1000;

/// Chat session for one signed-in user.
///
/// Owns the authenticated pipeline and the conversation ledger. Any number of
/// conversations may stream at the same time, but at most one stream per
/// conversation.
pub struct ChatClient {
    base_url: String,
    pipeline: AuthPipeline,
    ledger: ConversationLedger,
    consumer: StreamConsumer,
    notifier: Arc<dyn NotificationSink>,
    active_streams: Mutex<HashMap<ConversationId, AbortHandle>>,
}

impl ChatClient {
    /// Builds the client and restores the persisted credential.
    pub fn new(
        options: ClientOptions,
        storage: Arc<dyn CredentialStorage>,
        notifier: Arc<dyn NotificationSink>,
        navigator: Arc<dyn Navigator>,
    ) -> ClientResult<Self> {
        let ResolvedOptions {
            base_url,
            client,
            headers,
            max_stream_duration,
        } = ResolvedOptions::try_from(options)?;

        let credentials = CredentialStore::restore(storage);
        let pipeline = AuthPipeline::new(
            client,
            &base_url,
            headers,
            credentials,
            Arc::clone(&notifier),
            navigator,
        );
        let ledger = ConversationLedger::new();
        let consumer = StreamConsumer::new(ledger.clone()).with_max_duration(max_stream_duration);

        Ok(Self {
            base_url,
            pipeline,
            ledger,
            consumer,
            notifier,
            active_streams: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn ledger(&self) -> &ConversationLedger {
        &self.ledger
    }

    #[must_use]
    pub fn pipeline(&self) -> &AuthPipeline {
        &self.pipeline
    }

    #[must_use]
    pub fn credential(&self) -> Credential {
        self.pipeline.credentials().credential()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Signs in with email and password and persists the credential.
    pub async fn sign_in(&self, email: &str, password: &str) -> ClientResult<Credential> {
        let response = self
            .pipeline
            .client()
            .post(self.url("/auth/sign-in"))
            .headers(self.pipeline.headers().clone())
            .json(&SignInRequest {
                email: email.trim().to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        let auth: AuthResponse = read_json(response).await?;
        if auth.access_token.is_none() {
            return Err(ClientError::Parse(
                "Sign-in response did not include an access token".to_string(),
            ));
        }
        let credential = self.pipeline.credentials().apply_auth(auth)?;
        tracing::debug!(admin = credential.is_admin(), "signed in");
        Ok(credential)
    }

    /// Tells the server to end the session, then clears the local credential
    /// and its persisted copy whatever the server answered.
    pub async fn sign_out(&self) -> ClientResult<()> {
        let request = self.pipeline.client().post(self.url("/auth/sign-out"));
        let outcome = match self.pipeline.send(request).await {
            Ok(response) => ensure_success(response).await.map(drop),
            Err(error) => Err(error),
        };
        if let Err(error) = &outcome {
            tracing::warn!(%error, "server sign-out failed; clearing local session anyway");
        }
        self.pipeline.credentials().sign_out()?;
        Ok(())
    }

    pub async fn list_chats(&self) -> ClientResult<Vec<ChatSummary>> {
        let response = self
            .pipeline
            .send(self.pipeline.client().get(self.url("/chats")))
            .await?;
        read_json(response).await
    }

    pub async fn create_chat(&self) -> ClientResult<ConversationId> {
        let response = self
            .pipeline
            .send(self.pipeline.client().post(self.url("/chats")))
            .await?;
        read_json(response).await
    }

    pub async fn chat_history(&self, id: ConversationId) -> ClientResult<ChatSummary> {
        let response = self
            .pipeline
            .send(self.pipeline.client().get(self.url(&format!("/chats/{id}"))))
            .await?;
        read_json(response).await
    }

    /// Fetches the server history and hydrates the ledger with it, unless
    /// the conversation already has local messages or is streaming. Returns
    /// whether the history was applied.
    pub async fn load_history(&self, id: ConversationId) -> ClientResult<bool> {
        let history = self.chat_history(id).await?;
        Ok(self.ledger.hydrate(id, history.into_messages()))
    }

    /// Sends a query and streams the answer into the ledger.
    ///
    /// The user message and an empty bot message are appended before the
    /// request is sent. On failure the bot message keeps whatever text
    /// arrived, and the error is reported to the notification sink.
    pub async fn send_message(
        &self,
        id: ConversationId,
        query: &str,
        category: Option<&str>,
    ) -> ClientResult<()> {
        let query = validate_query(query)?;
        if !self.ledger.mark_streaming(id) {
            return Err(ClientError::AlreadyStreaming(id));
        }
        let slot = StreamSlot { client: self, id };

        let result = self.send_and_consume(id, query, category).await;
        drop(slot);
        if let Err(error) = &result {
            // A cancellation was asked for by the host.
            if !matches!(error, ClientError::Cancelled(_)) {
                self.report(error);
            }
        }
        result
    }

    /// Sends a failure to the notification sink. Expired sessions were
    /// already reported by the pipeline.
    fn report(&self, error: &ClientError) {
        if !matches!(error, ClientError::AuthExpired(_)) {
            self.notifier.notify(&error.to_string(), Severity::Error);
        }
    }

    async fn send_and_consume(
        &self,
        id: ConversationId,
        query: String,
        category: Option<&str>,
    ) -> ClientResult<()> {
        self.ledger.append_message(id, Message::user(query.clone()));
        self.ledger.append_message(id, Message::bot_placeholder());

        let (handle, registration) = AbortHandle::new_pair();
        self.active_streams.lock().insert(id, handle);

        let request = self
            .pipeline
            .client()
            .post(self.url(&format!("/chats/{id}/message")))
            .json(&SendMessageRequest {
                query,
                category: category
                    .map(str::trim)
                    .filter(|category| !category.is_empty())
                    .map(str::to_string),
            });

        let response = ensure_success(self.pipeline.send(request).await?).await?;
        self.consumer
            .consume_held(id, response.bytes_stream(), registration)
            .await
    }

    /// Creates a chat and sends its first message. Returns the new id even
    /// if the stream fails, alongside the stream result.
    pub async fn start_conversation(
        &self,
        query: &str,
        category: Option<&str>,
    ) -> ClientResult<(ConversationId, ClientResult<()>)> {
        validate_query(query)?;
        let id = self.create_chat().await.inspect_err(|error| self.report(error))?;
        self.ledger.clear_messages(id);
        let result = self.send_message(id, query, category).await;
        Ok((id, result))
    }

    /// Aborts the stream of a conversation. Returns `false` if it had none.
    pub fn cancel_stream(&self, id: ConversationId) -> bool {
        match self.active_streams.lock().remove(&id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

/// Holds a conversation's stream slot. Dropping it, including when the send
/// future is dropped mid-stream, forgets the abort handle and then releases
/// the streaming mark, so no other send can register in between.
struct StreamSlot<'a> {
    client: &'a ChatClient,
    id: ConversationId,
}

impl Drop for StreamSlot<'_> {
    fn drop(&mut self) {
        self.client.active_streams.lock().remove(&self.id);
        self.client.ledger.unmark_streaming(self.id);
    }
}

fn validate_query(query: &str) -> ClientResult<String> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(ClientError::InvalidInput("Query must not be empty".to_string()));
    }
    let length = query.chars().count();
    if length > MAX_QUERY_CHARS {
        return Err(ClientError::InvalidInput(format!(
            "Query length cannot exceed {MAX_QUERY_CHARS} characters (got {length})"
        )));
    }
    Ok(query.to_string())
}

/// Passes OK responses through and turns others into
/// [`ClientError::RequestFailed`] with the server's message.
async fn ensure_success(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.message)
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
    Err(ClientError::RequestFailed(status, message))
}

async fn read_json<R: DeserializeOwned>(response: Response) -> ClientResult<R> {
    Ok(ensure_success(response).await?.json::<R>().await?)
}
