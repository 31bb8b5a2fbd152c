use rag_chat_client::{ChatClient, ClientOptions, FileStorage, NoopNavigator, TracingSink};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

/// A client that keeps its credential in `RAG_CLIENT_CREDENTIAL_FILE`, or
/// `.rag-credential.json` in the working directory.
pub fn get_client() -> ChatClient {
    let path = std::env::var("RAG_CLIENT_CREDENTIAL_FILE")
        .unwrap_or_else(|_| ".rag-credential.json".to_string());

    ChatClient::new(
        ClientOptions::from_env().expect("invalid client configuration"),
        Arc::new(FileStorage::new(path)),
        Arc::new(TracingSink),
        Arc::new(NoopNavigator),
    )
    .expect("failed to build client")
}

pub async fn ensure_signed_in(client: &ChatClient) {
    if client.credential().is_signed_in() {
        return;
    }
    let email = std::env::var("RAG_CLIENT_EMAIL").expect("RAG_CLIENT_EMAIL must be set");
    let password =
        std::env::var("RAG_CLIENT_PASSWORD").expect("RAG_CLIENT_PASSWORD must be set");
    client.sign_in(&email, &password).await.unwrap();
}
