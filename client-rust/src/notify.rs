use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// How long a toast stays visible.
pub const TOAST_DISMISS_AFTER: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Error,
}

/// Surfaces a transient message to the user. Fire-and-forget.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, message: &str, severity: Severity);
}

/// Sends the user to the sign-in entry point.
pub trait Navigator: Send + Sync {
    fn redirect_to_sign_in(&self);
}

/// Navigator for hosts without a sign-in screen.
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn redirect_to_sign_in(&self) {}
}

/// Writes notifications to the `tracing` log.
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Error => tracing::error!(target: "rag_chat_client::notify", "{message}"),
            Severity::Info | Severity::Success => {
                tracing::info!(target: "rag_chat_client::notify", ?severity, "{message}");
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub id: u64,
    pub message: String,
    pub severity: Severity,
}

struct QueuedToast {
    toast: Toast,
    expires_at: Instant,
}

#[derive(Default)]
struct ToastQueueState {
    next_id: u64,
    toasts: Vec<QueuedToast>,
}

/// In-memory toast list with a fixed auto-dismiss interval.
///
/// Expired toasts are pruned lazily whenever the queue is read.
pub struct ToastQueue {
    dismiss_after: Duration,
    state: Mutex<ToastQueueState>,
}

impl Default for ToastQueue {
    fn default() -> Self {
        Self::with_dismiss_after(TOAST_DISMISS_AFTER)
    }
}

impl ToastQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_dismiss_after(dismiss_after: Duration) -> Self {
        Self {
            dismiss_after,
            state: Mutex::new(ToastQueueState::default()),
        }
    }

    /// Toasts that have not yet been dismissed, oldest first.
    pub fn active(&self) -> Vec<Toast> {
        self.active_at(Instant::now())
    }

    fn active_at(&self, now: Instant) -> Vec<Toast> {
        let mut state = self.state.lock();
        state.toasts.retain(|queued| queued.expires_at > now);
        state.toasts.iter().map(|queued| queued.toast.clone()).collect()
    }

    pub fn dismiss(&self, id: u64) {
        self.state.lock().toasts.retain(|queued| queued.toast.id != id);
    }

    fn push_at(&self, message: &str, severity: Severity, now: Instant) -> u64 {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.toasts.push(QueuedToast {
            toast: Toast {
                id,
                message: message.to_string(),
                severity,
            },
            expires_at: now + self.dismiss_after,
        });
        id
    }
}

impl NotificationSink for ToastQueue {
    fn notify(&self, message: &str, severity: Severity) {
        self.push_at(message, severity, Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toasts_expire_after_the_dismiss_interval() {
        let queue = ToastQueue::new();
        let start = Instant::now();
        queue.push_at("saved", Severity::Success, start);
        let second = queue.push_at("failed", Severity::Error, start + Duration::from_secs(2));

        let visible = queue.active_at(start + Duration::from_secs(1));
        assert_eq!(visible.len(), 2);
        assert_eq!(visible[0].message, "saved");

        let visible = queue.active_at(start + Duration::from_secs(4));
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, second);
        assert_eq!(visible[0].severity, Severity::Error);

        assert!(queue.active_at(start + Duration::from_secs(6)).is_empty());
    }

    #[test]
    fn dismiss_removes_a_toast_early() {
        let queue = ToastQueue::new();
        queue.notify("one", Severity::Info);
        let visible = queue.active();
        queue.dismiss(visible[0].id);
        assert!(queue.active().is_empty());
    }
}
