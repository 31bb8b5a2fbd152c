use crate::{
    opentelemetry::StreamSpan, ClientError, ClientResult, ConversationId, ConversationLedger,
    SourceDocument,
};
use futures::{
    future::{AbortHandle, AbortRegistration, Abortable},
    Stream, StreamExt,
};
use serde::{Deserialize, Serialize};
use std::{pin::pin, time::Duration};
use tracing_futures::Instrument;

const UNKNOWN_STREAM_ERROR: &str = "An unknown error occurred";

/// One record of the response stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum StreamEvent {
    /// A text fragment to append to the response.
    Token(String),
    /// The documents the response is grounded on. Replaces earlier sources.
    Sources(Vec<SourceDocument>),
    /// The server failed to produce the response.
    Error(Option<String>),
    /// Sets the termination flag. `false` does not end the stream.
    Done(bool),
}

/// Incremental splitter of a byte stream into NDJSON [`StreamEvent`]s.
///
/// Chunks may end anywhere, including inside a multi-byte character. Lines
/// are split on the `\n` byte, which never occurs inside a UTF-8 sequence,
/// and only complete lines are decoded.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a received chunk to the buffer.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Extracts the next complete record, skipping blank lines. Returns
    /// `None` once no complete line is buffered.
    pub fn next_event(&mut self) -> Option<ClientResult<StreamEvent>> {
        while let Some(newline) = self.buffer.iter().position(|&byte| byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(event) = parse_line(&line[..newline]) {
                return Some(event);
            }
        }
        None
    }

    /// Parses whatever remains after end-of-stream as a final record.
    pub fn finish(&mut self) -> Option<ClientResult<StreamEvent>> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

fn parse_line(line: &[u8]) -> Option<ClientResult<StreamEvent>> {
    let line = match std::str::from_utf8(line) {
        Ok(line) => line.trim(),
        Err(error) => {
            return Some(Err(ClientError::Parse(format!(
                "Received invalid UTF-8 sequence for stream data: {error}"
            ))))
        }
    };
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_str(line).map_err(|error| {
        ClientError::Parse(format!("Failed to parse stream record {line:?}: {error}"))
    }))
}

/// Applies stream bodies to a [`ConversationLedger`].
///
/// The caller marks the conversation as streaming before issuing the
/// request. The consumer always unmarks it when the stream ends, and stamps
/// the response complete only on clean termination.
#[derive(Clone)]
pub struct StreamConsumer {
    ledger: ConversationLedger,
    max_duration: Option<Duration>,
}

impl StreamConsumer {
    #[must_use]
    pub fn new(ledger: ConversationLedger) -> Self {
        Self {
            ledger,
            max_duration: None,
        }
    }

    /// Fails a stream with [`ClientError::StreamTimeout`] once it has run
    /// this long.
    #[must_use]
    pub fn with_max_duration(mut self, max_duration: Option<Duration>) -> Self {
        self.max_duration = max_duration;
        self
    }

    pub async fn consume<S, B, E>(&self, id: ConversationId, body: S) -> ClientResult<()>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        ClientError: From<E>,
    {
        let (_handle, registration) = AbortHandle::new_pair();
        self.consume_abortable(id, body, registration).await
    }

    /// Like [`Self::consume`], but ends with [`ClientError::Cancelled`] when
    /// the paired [`AbortHandle`] is aborted.
    pub async fn consume_abortable<S, B, E>(
        &self,
        id: ConversationId,
        body: S,
        registration: AbortRegistration,
    ) -> ClientResult<()>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        ClientError: From<E>,
    {
        let result = self.consume_held(id, body, registration).await;
        self.ledger.unmark_streaming(id);
        result
    }

    /// Consumes the stream but leaves the streaming mark to whoever holds
    /// it.
    pub(crate) async fn consume_held<S, B, E>(
        &self,
        id: ConversationId,
        body: S,
        registration: AbortRegistration,
    ) -> ClientResult<()>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        ClientError: From<E>,
    {
        let mut span = StreamSpan::new(id);
        let tracing_span = span.span();

        let drain = Abortable::new(
            drain_into_ledger(&self.ledger, id, body, &mut span),
            registration,
        )
        .instrument(tracing_span);

        let result = match self.max_duration {
            Some(limit) => match tokio::time::timeout(limit, drain).await {
                Ok(Ok(result)) => result,
                Ok(Err(_aborted)) => Err(ClientError::Cancelled(id)),
                Err(_elapsed) => Err(ClientError::StreamTimeout(id, limit)),
            },
            None => drain
                .await
                .unwrap_or_else(|_aborted| Err(ClientError::Cancelled(id))),
        };

        match &result {
            Ok(()) => {
                self.ledger.stamp_last_bot_time(id);
                tracing::debug!(conversation_id = id, "stream completed");
            }
            Err(error) => {
                span.on_error(error);
                tracing::warn!(conversation_id = id, %error, "stream terminated");
            }
        }
        span.on_end();
        result
    }
}

/// Reads the body until a `done: true` record or end-of-stream, applying
/// records in arrival order.
async fn drain_into_ledger<S, B, E>(
    ledger: &ConversationLedger,
    id: ConversationId,
    body: S,
    span: &mut StreamSpan,
) -> ClientResult<()>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    ClientError: From<E>,
{
    let mut body = pin!(body);
    let mut decoder = NdjsonDecoder::new();
    let mut done = false;

    while !done {
        let Some(chunk) = body.next().await else {
            if let Some(event) = decoder.finish() {
                apply_event(ledger, id, event?, span)?;
            }
            break;
        };
        decoder.push(chunk?.as_ref());

        // Records already buffered are applied even after `done: true`.
        while let Some(event) = decoder.next_event() {
            if let Some(flag) = apply_event(ledger, id, event?, span)? {
                done = flag;
            }
        }
    }

    Ok(())
}

/// Applies one record. Returns the new termination flag for `done`
/// records.
fn apply_event(
    ledger: &ConversationLedger,
    id: ConversationId,
    event: StreamEvent,
    span: &mut StreamSpan,
) -> ClientResult<Option<bool>> {
    span.on_event(&event);
    match event {
        StreamEvent::Token(text) => {
            ledger.append_to_last_bot(id, &text);
            Ok(None)
        }
        StreamEvent::Sources(sources) => {
            ledger.set_sources_on_last_bot(id, sources);
            Ok(None)
        }
        StreamEvent::Error(message) => Err(ClientError::Stream(
            message
                .filter(|message| !message.is_empty())
                .unwrap_or_else(|| UNKNOWN_STREAM_ERROR.to_string()),
        )),
        StreamEvent::Done(flag) => Ok(Some(flag)),
    }
}
