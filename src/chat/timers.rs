//! Owned handles for the session's background tasks.

use tokio::task::JoinHandle;

/// Holds at most one spawned task; replacing or dropping the slot aborts it.
#[derive(Debug, Default)]
pub struct TimerSlot {
    handle: Option<JoinHandle<()>>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle`, aborting whatever task was here before.
    pub fn replace(&mut self, handle: JoinHandle<()>) {
        if let Some(previous) = self.handle.replace(handle) {
            previous.abort();
        }
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Every task a chat session may have pending.
#[derive(Debug, Default)]
pub struct SessionTimers {
    /// Countdown ticker, alive only while a deadline is pending
    pub ticker: TimerSlot,
    /// Delayed message refresh after a successful send
    pub refresh_messages: TimerSlot,
    /// Delayed conversation-list refresh after starting a conversation
    pub refresh_conversations: TimerSlot,
}

impl SessionTimers {
    pub fn cancel_all(&mut self) {
        self.ticker.cancel();
        self.refresh_messages.cancel();
        self.refresh_conversations.cancel();
    }

    pub fn active_count(&self) -> usize {
        [&self.ticker, &self.refresh_messages, &self.refresh_conversations]
            .iter()
            .filter(|slot| slot.is_active())
            .count()
    }
}
