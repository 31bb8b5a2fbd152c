use crate::{
    types::ErrorBody, AuthResponse, ClientError, ClientResult, CredentialStore, Navigator,
    NotificationSink, Severity,
};
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use parking_lot::Mutex;
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Client, RequestBuilder, Response, StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;

pub(crate) const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";
const REFRESH_PATH: &str = "/auth/refresh";

/// Why a token refresh failed. Either way the session is signed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    /// The refresh endpoint answered with a non-OK status.
    Rejected(StatusCode, String),
    /// The refresh call did not complete or its body was unusable.
    Network(String),
}

impl RefreshFailure {
    fn user_message(&self) -> String {
        match self {
            Self::Rejected(_, message) if !message.is_empty() => message.clone(),
            Self::Rejected(..) | Self::Network(_) => SESSION_EXPIRED_MESSAGE.to_string(),
        }
    }
}

type RefreshOutcome = Result<(), RefreshFailure>;
type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Refresh responses come either bare or wrapped in `{ "data": ... }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RefreshBody {
    Wrapped { data: AuthResponse },
    Flat(AuthResponse),
}

impl RefreshBody {
    fn into_inner(self) -> AuthResponse {
        match self {
            Self::Wrapped { data } | Self::Flat(data) => data,
        }
    }
}

/// Everything a refresh needs, shared between the pipeline and the
/// in-flight refresh future.
struct RefreshContext {
    client: Client,
    refresh_url: String,
    headers: HeaderMap,
    credentials: CredentialStore,
    notifier: Arc<dyn NotificationSink>,
    navigator: Arc<dyn Navigator>,
    pending: Mutex<Option<PendingRefresh>>,
}

/// Sends requests with the current bearer token and recovers from an expired
/// token by refreshing it once and retrying.
///
/// Concurrent requests that hit 401 at the same time share a single refresh
/// call. If that refresh fails the session is signed out exactly once and
/// every waiting request fails with [`ClientError::AuthExpired`].
#[derive(Clone)]
pub struct AuthPipeline {
    context: Arc<RefreshContext>,
}

impl AuthPipeline {
    pub fn new(
        client: Client,
        base_url: &str,
        headers: HeaderMap,
        credentials: CredentialStore,
        notifier: Arc<dyn NotificationSink>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            context: Arc::new(RefreshContext {
                client,
                refresh_url: format!("{base_url}{REFRESH_PATH}"),
                headers,
                credentials,
                notifier,
                navigator,
                pending: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.context.client
    }

    /// Extra headers configured for every request.
    pub(crate) fn headers(&self) -> &HeaderMap {
        &self.context.headers
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        &self.context.credentials
    }

    /// Sends the request with the current credential.
    ///
    /// A 401 on the first attempt triggers [`Self::refresh`] and one retry.
    /// Whatever the retry returns is handed back unchanged, including
    /// another 401.
    pub async fn send(&self, request: RequestBuilder) -> ClientResult<Response> {
        let mut request = request.headers(self.context.headers.clone()).build()?;
        let retry = request.try_clone();

        self.authorize(request.headers_mut())?;
        let response = self.context.client.execute(request).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        self.refresh().await?;

        let Some(mut retry) = retry else {
            tracing::warn!("request body cannot be replayed; returning the original 401");
            return Ok(response);
        };
        self.authorize(retry.headers_mut())?;
        Ok(self.context.client.execute(retry).await?)
    }

    /// Refreshes the access token, joining the refresh already in flight if
    /// there is one.
    pub async fn refresh(&self) -> ClientResult<()> {
        let pending = {
            let mut slot = self.context.pending.lock();
            slot.get_or_insert_with(|| {
                tracing::debug!("starting token refresh");
                Arc::clone(&self.context).run_refresh().boxed().shared()
            })
            .clone()
        };

        pending
            .await
            .map_err(|failure| ClientError::AuthExpired(failure.user_message()))
    }

    fn authorize(&self, headers: &mut HeaderMap) -> ClientResult<()> {
        match self.context.credentials.access_token() {
            Some(token) => {
                let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|error| {
                    ClientError::InvalidInput(format!("Invalid access token header value: {error}"))
                })?;
                headers.insert(header::AUTHORIZATION, value);
            }
            None => {
                headers.remove(header::AUTHORIZATION);
            }
        }
        Ok(())
    }
}

impl RefreshContext {
    /// The shared refresh operation. Signs out on failure, then frees the
    /// slot so the next 401 can start a fresh refresh.
    async fn run_refresh(self: Arc<Self>) -> RefreshOutcome {
        let outcome = self.request_refresh().await;

        match &outcome {
            Ok(()) => tracing::debug!("token refresh succeeded"),
            Err(failure) => {
                tracing::warn!(?failure, "token refresh failed; signing out");
                self.expire_session(&failure.user_message());
            }
        }

        self.pending.lock().take();
        outcome
    }

    async fn request_refresh(&self) -> RefreshOutcome {
        let response = self
            .client
            .post(&self.refresh_url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|error| RefreshFailure::Network(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.message)
                .unwrap_or_default();
            return Err(RefreshFailure::Rejected(status, message));
        }

        let body = response
            .json::<RefreshBody>()
            .await
            .map_err(|error| RefreshFailure::Network(error.to_string()))?
            .into_inner();
        if body.access_token.is_none() {
            return Err(RefreshFailure::Network(
                "refresh response did not include an access token".to_string(),
            ));
        }

        self.credentials
            .apply_auth(body)
            .map_err(|error| RefreshFailure::Network(error.to_string()))?;
        Ok(())
    }

    fn expire_session(&self, message: &str) {
        if let Err(error) = self.credentials.sign_out() {
            tracing::warn!(%error, "failed to erase stored credential");
        }
        self.notifier.notify(message, Severity::Error);
        self.navigator.redirect_to_sign_in();
    }
}
