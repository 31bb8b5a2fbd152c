use crate::{ConversationId, Message, SourceDocument};
use chrono::Utc;
use parking_lot::Mutex;
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What changed in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEventKind {
    MessagesReplaced,
    MessageAppended,
    TextAppended,
    SourcesSet,
    ResponseCompleted,
    Cleared,
    StreamingStarted,
    StreamingStopped,
}

/// Change notification sent after every ledger mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEvent {
    pub conversation_id: ConversationId,
    pub kind: LedgerEventKind,
}

#[derive(Debug, Default)]
struct Conversation {
    messages: Vec<Message>,
    /// Index of the bot message the current stream writes into.
    open_response: Option<usize>,
}

impl Conversation {
    /// The bot message that stream events should update: the open response
    /// if there is one, else the last message when it is a bot message.
    fn response_mut(&mut self) -> Option<&mut Message> {
        let index = match self.open_response {
            Some(index) => index,
            None => self.messages.len().checked_sub(1)?,
        };
        self.messages.get_mut(index).filter(|message| message.is_bot())
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    conversations: HashMap<ConversationId, Conversation>,
    streaming: BTreeSet<ConversationId>,
}

/// Per-conversation message sequences plus the set of conversations with a
/// live stream.
///
/// Every operation names its conversation explicitly and runs as a single
/// critical section, so mutations for different conversations can be freely
/// interleaved.
#[derive(Clone)]
pub struct ConversationLedger {
    state: Arc<Mutex<LedgerState>>,
    events: broadcast::Sender<LedgerEvent>,
}

impl Default for ConversationLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationLedger {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(LedgerState::default())),
            events,
        }
    }

    /// Receives a [`LedgerEvent`] for every subsequent mutation.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    fn emit(&self, conversation_id: ConversationId, kind: LedgerEventKind) {
        // No subscribers is fine.
        let _ = self.events.send(LedgerEvent {
            conversation_id,
            kind,
        });
    }

    /// Runs `f` against the conversation's state and emits `kind` when it
    /// reports a change.
    fn mutate<F>(&self, id: ConversationId, kind: LedgerEventKind, f: F) -> bool
    where
        F: FnOnce(&mut Conversation) -> bool,
    {
        let changed = {
            let mut state = self.state.lock();
            f(state.conversations.entry(id).or_default())
        };
        if changed {
            self.emit(id, kind);
        }
        changed
    }

    #[must_use]
    pub fn messages(&self, id: ConversationId) -> Vec<Message> {
        self.state
            .lock()
            .conversations
            .get(&id)
            .map(|conversation| conversation.messages.clone())
            .unwrap_or_default()
    }

    /// Replaces the whole sequence.
    pub fn set_messages(&self, id: ConversationId, messages: Vec<Message>) {
        self.mutate(id, LedgerEventKind::MessagesReplaced, |conversation| {
            conversation.messages = messages;
            conversation.open_response = None;
            true
        });
    }

    /// Sets server history only if nothing is held locally and no stream is
    /// active, so in-flight state is never clobbered. Returns whether the
    /// history was applied.
    pub fn hydrate(&self, id: ConversationId, messages: Vec<Message>) -> bool {
        let applied = {
            let mut state = self.state.lock();
            if state.streaming.contains(&id) {
                false
            } else {
                let conversation = state.conversations.entry(id).or_default();
                if conversation.messages.is_empty() {
                    conversation.messages = messages;
                    conversation.open_response = None;
                    true
                } else {
                    false
                }
            }
        };
        if applied {
            self.emit(id, LedgerEventKind::MessagesReplaced);
        }
        applied
    }

    /// Pushes a message to the end. A bot message becomes the open response.
    pub fn append_message(&self, id: ConversationId, message: Message) {
        self.mutate(id, LedgerEventKind::MessageAppended, |conversation| {
            if message.is_bot() {
                conversation.open_response = Some(conversation.messages.len());
            }
            conversation.messages.push(message);
            true
        });
    }

    /// Appends a fragment to the response text. No-op without a bot target.
    pub fn append_to_last_bot(&self, id: ConversationId, fragment: &str) -> bool {
        self.mutate(id, LedgerEventKind::TextAppended, |conversation| {
            conversation.response_mut().is_some_and(|message| {
                message.text.push_str(fragment);
                true
            })
        })
    }

    /// Replaces the response's sources. No-op without a bot target.
    pub fn set_sources_on_last_bot(&self, id: ConversationId, sources: Vec<SourceDocument>) -> bool {
        self.mutate(id, LedgerEventKind::SourcesSet, |conversation| {
            conversation.response_mut().is_some_and(|message| {
                message.sources = Some(sources);
                true
            })
        })
    }

    /// Marks the response complete and closes it. No-op without a bot
    /// target.
    pub fn stamp_last_bot_time(&self, id: ConversationId) -> bool {
        self.mutate(id, LedgerEventKind::ResponseCompleted, |conversation| {
            let stamped = conversation.response_mut().is_some_and(|message| {
                message.created_at = Some(Utc::now());
                true
            });
            conversation.open_response = None;
            stamped
        })
    }

    pub fn clear_messages(&self, id: ConversationId) {
        self.mutate(id, LedgerEventKind::Cleared, |conversation| {
            conversation.messages.clear();
            conversation.open_response = None;
            true
        });
    }

    /// Adds the id to the streaming-set. Returns `false` if it was already
    /// streaming.
    pub fn mark_streaming(&self, id: ConversationId) -> bool {
        let inserted = self.state.lock().streaming.insert(id);
        if inserted {
            self.emit(id, LedgerEventKind::StreamingStarted);
        }
        inserted
    }

    /// Removes the id from the streaming-set; unmarking an absent id is a
    /// no-op.
    pub fn unmark_streaming(&self, id: ConversationId) {
        let removed = self.state.lock().streaming.remove(&id);
        if removed {
            self.emit(id, LedgerEventKind::StreamingStopped);
        }
    }

    #[must_use]
    pub fn is_streaming(&self, id: ConversationId) -> bool {
        self.state.lock().streaming.contains(&id)
    }

    #[must_use]
    pub fn streaming_ids(&self) -> Vec<ConversationId> {
        self.state.lock().streaming.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Sender;

    fn source(file_name: &str) -> SourceDocument {
        SourceDocument {
            file_name: file_name.to_string(),
            title: "t".into(),
            page_number: 1,
            snippet: "s".into(),
        }
    }

    #[test]
    fn unseen_conversation_is_empty() {
        let ledger = ConversationLedger::new();
        assert!(ledger.messages(42).is_empty());
        assert!(!ledger.append_to_last_bot(42, "x"));
    }

    #[test]
    fn bot_mutations_need_a_bot_target() {
        let ledger = ConversationLedger::new();
        ledger.append_message(1, Message::user("hi"));

        assert!(!ledger.append_to_last_bot(1, "x"));
        assert!(!ledger.set_sources_on_last_bot(1, vec![source("a.pdf")]));
        assert!(!ledger.stamp_last_bot_time(1));
        assert_eq!(ledger.messages(1).len(), 1);
        assert_eq!(ledger.messages(1)[0].text, "hi");
    }

    #[test]
    fn fragments_append_and_sources_replace() {
        let ledger = ConversationLedger::new();
        ledger.append_message(1, Message::user("hi"));
        ledger.append_message(1, Message::bot_placeholder());

        ledger.append_to_last_bot(1, "Hel");
        ledger.append_to_last_bot(1, "lo");
        ledger.set_sources_on_last_bot(1, vec![source("a.pdf"), source("b.pdf")]);
        ledger.set_sources_on_last_bot(1, vec![source("c.pdf")]);

        let messages = ledger.messages(1);
        let bot = &messages[1];
        assert_eq!(bot.sender, Sender::Bot);
        assert_eq!(bot.text, "Hello");
        assert_eq!(bot.sources, Some(vec![source("c.pdf")]));
        assert!(bot.created_at.is_none());

        assert!(ledger.stamp_last_bot_time(1));
        assert!(ledger.messages(1)[1].created_at.is_some());
    }

    #[test]
    fn open_response_survives_a_trailing_user_message() {
        let ledger = ConversationLedger::new();
        ledger.append_message(1, Message::bot_placeholder());
        ledger.append_message(1, Message::user("interjection"));

        assert!(ledger.append_to_last_bot(1, "still here"));
        let messages = ledger.messages(1);
        assert_eq!(messages[0].text, "still here");
        assert_eq!(messages[1].text, "interjection");
    }

    #[test]
    fn conversations_are_isolated() {
        let ledger = ConversationLedger::new();
        for id in [1, 2] {
            ledger.append_message(id, Message::user("q"));
            ledger.append_message(id, Message::bot_placeholder());
        }

        ledger.append_to_last_bot(1, "one");
        ledger.append_to_last_bot(2, "two");
        ledger.append_to_last_bot(1, "!");
        ledger.set_sources_on_last_bot(2, vec![source("two.pdf")]);

        assert_eq!(ledger.messages(1)[1].text, "one!");
        assert!(ledger.messages(1)[1].sources.is_none());
        assert_eq!(ledger.messages(2)[1].text, "two");
        assert_eq!(ledger.messages(2)[1].sources, Some(vec![source("two.pdf")]));
    }

    #[test]
    fn streaming_set_is_idempotent() {
        let ledger = ConversationLedger::new();
        ledger.unmark_streaming(3);
        assert!(ledger.mark_streaming(3));
        assert!(!ledger.mark_streaming(3));
        assert!(ledger.mark_streaming(1));
        assert_eq!(ledger.streaming_ids(), vec![1, 3]);
        ledger.unmark_streaming(3);
        ledger.unmark_streaming(3);
        assert!(!ledger.is_streaming(3));
        assert!(ledger.is_streaming(1));
    }

    #[test]
    fn hydrate_only_fills_idle_empty_conversations() {
        let ledger = ConversationLedger::new();
        let history = vec![Message::user("old question")];

        ledger.mark_streaming(1);
        assert!(!ledger.hydrate(1, history.clone()));
        ledger.unmark_streaming(1);

        ledger.append_message(2, Message::user("local"));
        assert!(!ledger.hydrate(2, history.clone()));
        assert_eq!(ledger.messages(2)[0].text, "local");

        assert!(ledger.hydrate(1, history.clone()));
        assert_eq!(ledger.messages(1), history);
        assert!(!ledger.hydrate(1, vec![]));
    }

    #[test]
    fn clear_empties_the_sequence() {
        let ledger = ConversationLedger::new();
        ledger.append_message(5, Message::user("q"));
        ledger.append_message(5, Message::bot_placeholder());
        ledger.clear_messages(5);
        assert!(ledger.messages(5).is_empty());
        assert!(!ledger.append_to_last_bot(5, "late"));
    }

    #[tokio::test]
    async fn subscribers_observe_mutations() {
        let ledger = ConversationLedger::new();
        let mut events = ledger.subscribe();

        ledger.mark_streaming(9);
        ledger.append_message(9, Message::bot_placeholder());
        ledger.append_to_last_bot(9, "x");
        ledger.append_to_last_bot(10, "ignored");

        let kinds: Vec<_> = (0..3).map(|_| events.try_recv().unwrap()).collect();
        assert_eq!(
            kinds,
            vec![
                LedgerEvent { conversation_id: 9, kind: LedgerEventKind::StreamingStarted },
                LedgerEvent { conversation_id: 9, kind: LedgerEventKind::MessageAppended },
                LedgerEvent { conversation_id: 9, kind: LedgerEventKind::TextAppended },
            ]
        );
        assert!(events.try_recv().is_err());
    }
}
