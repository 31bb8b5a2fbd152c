#![allow(dead_code)]

use axum::{
    body::Body,
    http::header,
    response::{IntoResponse, Response},
    Router,
};
use rag_chat_client::{
    client_test::{RecordingNavigator, RecordingNotifier},
    ChatClient, ClientOptions, Credential, MemoryStorage,
};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

pub const STALE_TOKEN: &str = "stale-token";
pub const FRESH_TOKEN: &str = "fresh-token";

/// Serves the router on an ephemeral local port and returns its origin.
pub async fn serve(router: Router) -> String {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// An origin nothing listens on.
pub async fn closed_origin() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One NDJSON line.
pub fn record(kind: &str, data: Value) -> String {
    format!("{}\n", json!({ "type": kind, "data": data }))
}

/// A body chunk sent after waiting `delay_ms`.
pub fn chunk(delay_ms: u64, bytes: impl Into<Vec<u8>>) -> (u64, Vec<u8>) {
    (delay_ms, bytes.into())
}

/// A streaming NDJSON response that writes each chunk after its delay.
pub fn ndjson(chunks: Vec<(u64, Vec<u8>)>) -> Response {
    let body = async_stream::stream! {
        for (delay_ms, bytes) in chunks {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            yield Ok::<_, std::io::Error>(bytes);
        }
    };
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(body),
    )
        .into_response()
}

/// A chat client wired to recording collaborators.
pub struct Harness {
    pub client: ChatClient,
    pub storage: Arc<MemoryStorage>,
    pub notifier: Arc<RecordingNotifier>,
    pub navigator: Arc<RecordingNavigator>,
}

impl Harness {
    pub fn new(base_url: &str, credential: Option<Credential>) -> Self {
        Self::with_options(
            ClientOptions {
                base_url: Some(base_url.to_string()),
                ..Default::default()
            },
            credential,
        )
    }

    pub fn with_options(options: ClientOptions, credential: Option<Credential>) -> Self {
        let storage = Arc::new(match credential {
            Some(credential) => MemoryStorage::with_credential(credential),
            None => MemoryStorage::new(),
        });
        let notifier = Arc::new(RecordingNotifier::new());
        let navigator = Arc::new(RecordingNavigator::new());
        let client = ChatClient::new(
            options,
            storage.clone(),
            notifier.clone(),
            navigator.clone(),
        )
        .unwrap();

        Self {
            client,
            storage,
            notifier,
            navigator,
        }
    }

    pub fn signed_in(base_url: &str) -> Self {
        Self::new(
            base_url,
            Some(Credential::new(FRESH_TOKEN, Some("USER".to_string()))),
        )
    }

    pub fn bot_text(&self, id: i64) -> String {
        self.client
            .ledger()
            .messages(id)
            .last()
            .map(|message| message.text.clone())
            .unwrap_or_default()
    }
}
