use crate::{ConversationId, StreamEvent};
use opentelemetry::trace::Status;
use std::time::Instant;
use tracing::{info_span, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Span covering the consumption of one response stream.
pub struct StreamSpan {
    span: Span,
    start_time: Instant,
    time_to_first_token: Option<f64>,
    token_events: u64,
    token_bytes: u64,
    source_count: Option<usize>,
}

impl StreamSpan {
    pub fn new(conversation_id: ConversationId) -> Self {
        let span = info_span!("rag_client.stream", conversation_id);
        span.set_attribute("rag_client.conversation_id", conversation_id);
        span.set_attribute("rag_client.wire_format", "ndjson");

        Self {
            span,
            start_time: Instant::now(),
            time_to_first_token: None,
            token_events: 0,
            token_bytes: 0,
            source_count: None,
        }
    }

    pub fn span(&self) -> Span {
        self.span.clone()
    }

    pub fn on_event(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Token(text) => {
                if self.time_to_first_token.is_none() {
                    self.time_to_first_token = Some(self.elapsed_seconds());
                }
                self.token_events += 1;
                self.token_bytes += text.len() as u64;
            }
            StreamEvent::Sources(sources) => self.source_count = Some(sources.len()),
            StreamEvent::Error(_) | StreamEvent::Done(_) => {}
        }
    }

    pub fn on_error(&mut self, error: &(dyn std::error::Error + 'static)) {
        self.span
            .set_attribute("exception.message", error.to_string());
        self.span.set_status(Status::error(error.to_string()));
    }

    pub fn on_end(&mut self) {
        self.span
            .set_attribute("rag_client.token_events", saturating_i64(self.token_events));
        self.span
            .set_attribute("rag_client.token_bytes", saturating_i64(self.token_bytes));

        if let Some(source_count) = self.source_count {
            self.span
                .set_attribute("rag_client.source_count", saturating_i64(source_count as u64));
        }

        if let Some(time_to_first_token) = self.time_to_first_token {
            self.span
                .set_attribute("rag_client.time_to_first_token", time_to_first_token);
        }

        self.span
            .set_attribute("rag_client.duration", self.elapsed_seconds());
    }

    fn elapsed_seconds(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
