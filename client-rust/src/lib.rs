mod chat;
mod credential;
mod errors;
mod ledger;
mod notify;
mod opentelemetry;
mod options;
mod pipeline;
mod stream;
mod types;

pub use chat::{ChatClient, MAX_QUERY_CHARS};
pub use credential::{Credential, CredentialStorage, CredentialStore, FileStorage, MemoryStorage};
pub use errors::*;
pub use ledger::{ConversationLedger, LedgerEvent, LedgerEventKind};
pub use notify::{
    Navigator, NoopNavigator, NotificationSink, Severity, Toast, ToastQueue, TracingSink,
    TOAST_DISMISS_AFTER,
};
pub use options::{ClientOptions, DEFAULT_BASE_URL, DEFAULT_MAX_STREAM_DURATION};
pub use pipeline::{AuthPipeline, RefreshFailure};
pub use stream::{NdjsonDecoder, StreamConsumer, StreamEvent};
pub use types::*;
