//! Chat session orchestration.
//!
//! A `ChatSession` owns one conversation's client-side state:
//! 1. Gates sends and conversation starts on the rate and token limits
//! 2. Feeds every backend failure through the limit tracker
//! 3. Runs the countdown ticker while a deadline is pending
//! 4. Tracks the "assistant is typing" indicator and the delayed refreshes
//!
//! Background tasks hold only a `Weak` reference to the session and are all
//! aborted on `shutdown()` or drop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;

use super::backend::{ChatBackend, Conversation, Message, OperationError, Role, StartedConversation};
use super::timers::SessionTimers;
use crate::error::{ChatgateError, Result};
use crate::limits::{LimitPolicy, LimitStatus, LimitTracker, SessionClock};

/// Configuration for a chat session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Limit engine tunables.
    pub limits: LimitPolicy,
    /// Wait after a successful send or start before refreshing from the backend.
    pub refresh_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            limits: LimitPolicy::default(),
            refresh_delay: Duration::from_secs(2),
        }
    }
}

impl SessionConfig {
    pub fn with_limits(mut self, limits: LimitPolicy) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }
}

/// Backend operations whose last failure the session keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    FetchConversations,
    FetchMessages,
    StartConversation,
    SendMessage,
}

impl Operation {
    /// Order in which held errors are reported.
    pub const ALL: [Operation; 4] = [
        Operation::FetchConversations,
        Operation::FetchMessages,
        Operation::StartConversation,
        Operation::SendMessage,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Sending,
}

#[derive(Debug)]
struct SessionState {
    limits: LimitTracker,
    current_conversation: Option<String>,
    assistant_typing: bool,
    last_user_send_at: Option<u64>,
    /// Bumped by every user-initiated send or start
    send_generation: u64,
    in_flight: usize,
    messages: Vec<Message>,
    conversations: Vec<Conversation>,
    errors: HashMap<Operation, Arc<OperationError>>,
    timers: SessionTimers,
    ticking: bool,
    disposed: bool,
}

impl SessionState {
    fn new(policy: LimitPolicy) -> Self {
        Self {
            limits: LimitTracker::new(policy),
            current_conversation: None,
            assistant_typing: false,
            last_user_send_at: None,
            send_generation: 0,
            in_flight: 0,
            messages: Vec::new(),
            conversations: Vec::new(),
            errors: HashMap::new(),
            timers: SessionTimers::default(),
            ticking: false,
            disposed: false,
        }
    }

    fn begin_send(&mut self, now: u64) {
        self.last_user_send_at = Some(now);
        self.send_generation += 1;
        self.assistant_typing = true;
        self.in_flight += 1;
    }

    fn end_send(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Store a fresh message list; a newer assistant reply ends the typing indicator.
    fn apply_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        if let (Some(last), Some(sent_at)) = (self.messages.last(), self.last_user_send_at) {
            if last.role == Role::Assistant && last.created_at_ms() >= sent_at {
                self.assistant_typing = false;
            }
        }
    }

    fn is_current(&self, conversation_id: &str) -> bool {
        self.current_conversation.as_deref() == Some(conversation_id)
    }

    /// End the typing indicator unless a send began after `generation`.
    fn settle_typing(&mut self, generation: u64) {
        if self.send_generation == generation {
            self.assistant_typing = false;
        }
    }

    fn held_errors(&self) -> Vec<Arc<OperationError>> {
        Operation::ALL
            .iter()
            .filter_map(|op| self.errors.get(op).cloned())
            .collect()
    }
}

struct Shared<B> {
    backend: Arc<B>,
    clock: SessionClock,
    config: SessionConfig,
    state: Mutex<SessionState>,
    status_tx: watch::Sender<LimitStatus>,
}

impl<B: ChatBackend + 'static> Shared<B> {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject with the active gate, rate before token.
    fn gate(&self, state: &mut SessionState) -> Result<()> {
        let status = state.limits.status(self.clock.now());
        if status.is_rate_limited {
            return Err(ChatgateError::RateLimited {
                seconds_left: status.rate_seconds_left,
            });
        }
        if status.is_token_limited {
            return Err(ChatgateError::TokenLimited {
                seconds_left: status.token_seconds_left,
                remaining: status.token_remaining,
            });
        }
        Ok(())
    }

    /// Push the current status to subscribers and make sure the ticker runs
    /// exactly while a deadline is pending.
    fn publish(self: &Arc<Self>, state: &mut SessionState) {
        let status = state.limits.status(self.clock.now());
        self.status_tx.send_replace(status);

        if state.disposed || state.ticking || !state.limits.has_pending() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                state.ticking = true;
                state.timers.ticker.replace(runtime.spawn(run_ticker(Arc::downgrade(self))));
                log::debug!("Countdown ticker started");
            }
            Err(_) => log::debug!("No async runtime; countdown ticker not started"),
        }
    }

    /// Record a backend failure: classify it into the limits and hold it.
    fn fail(self: &Arc<Self>, state: &mut SessionState, op: Operation, err: OperationError) -> ChatgateError {
        let err = Arc::new(err);
        log::warn!("{:?} failed: {}", op, err);
        if state.disposed {
            return ChatgateError::Backend(err);
        }

        let now = self.clock.now();
        if state.limits.ingest(&err, now) {
            log::info!("Limits updated from {:?} failure", op);
        }
        state.errors.insert(op, err.clone());
        self.publish(state);
        ChatgateError::Backend(err)
    }

    fn schedule_message_refresh(self: &Arc<Self>, state: &mut SessionState, conversation_id: String) {
        let weak = Arc::downgrade(self);
        let delay = self.config.refresh_delay;
        let generation = state.send_generation;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(shared) = weak.upgrade() else { return };
            let result = shared.backend.fetch_messages(&conversation_id).await;

            let mut state = shared.lock_state();
            if state.disposed || !state.is_current(&conversation_id) {
                return;
            }
            match result {
                Ok(messages) => {
                    state.errors.remove(&Operation::FetchMessages);
                    state.apply_messages(messages);
                }
                Err(err) => {
                    shared.fail(&mut state, Operation::FetchMessages, err);
                }
            }
            state.settle_typing(generation);
        });
        state.timers.refresh_messages.replace(handle);
    }

    fn schedule_conversation_refresh(self: &Arc<Self>, state: &mut SessionState) {
        let weak = Arc::downgrade(self);
        let delay = self.config.refresh_delay;
        let generation = state.send_generation;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(shared) = weak.upgrade() else { return };
            let result = shared.backend.fetch_conversations().await;

            let mut state = shared.lock_state();
            if state.disposed {
                return;
            }
            match result {
                Ok(conversations) => {
                    state.errors.remove(&Operation::FetchConversations);
                    state.conversations = conversations;
                }
                Err(err) => {
                    shared.fail(&mut state, Operation::FetchConversations, err);
                }
            }
            state.settle_typing(generation);
        });
        state.timers.refresh_conversations.replace(handle);
    }
}

/// Sweep expired limits once per tick until nothing is pending.
async fn run_ticker<B: ChatBackend + 'static>(weak: Weak<Shared<B>>) {
    let interval = match weak.upgrade() {
        Some(shared) => shared.config.limits.tick_interval,
        None => return,
    };

    loop {
        tokio::time::sleep(interval).await;
        let Some(shared) = weak.upgrade() else { break };
        let mut state = shared.lock_state();
        if state.disposed {
            break;
        }

        let status = state.limits.status(shared.clock.now());
        shared.status_tx.send_replace(status);
        if !state.limits.has_pending() {
            state.ticking = false;
            log::debug!("Countdown ticker stopped");
            break;
        }
    }
}

/// One chat session over a `ChatBackend`.
pub struct ChatSession<B: ChatBackend + 'static> {
    shared: Arc<Shared<B>>,
}

impl<B: ChatBackend + 'static> ChatSession<B> {
    pub fn new(backend: Arc<B>, config: SessionConfig) -> Self {
        Self::with_clock(backend, config, SessionClock::new())
    }

    pub fn with_clock(backend: Arc<B>, config: SessionConfig, clock: SessionClock) -> Self {
        let (status_tx, _) = watch::channel(LimitStatus::default());
        let state = SessionState::new(config.limits.clone());
        Self {
            shared: Arc::new(Shared {
                backend,
                clock,
                config,
                state: Mutex::new(state),
                status_tx,
            }),
        }
    }

    /// Select `conversation_id` as the active conversation.
    pub fn with_conversation(self, conversation_id: impl Into<String>) -> Self {
        self.switch_conversation(conversation_id);
        self
    }

    /// Send `text` to the current conversation.
    ///
    /// Fails fast without touching the network when no conversation is
    /// selected or a limit gate is closed. Backend failures are classified
    /// into the limits and returned unchanged as `ChatgateError::Backend`.
    pub async fn send_message(&self, text: &str) -> Result<Message> {
        let conversation_id = {
            let mut state = self.shared.lock_state();
            if state.disposed {
                return Err(ChatgateError::Closed);
            }
            let conversation_id = state.current_conversation.clone().ok_or(ChatgateError::NoConversation)?;
            self.shared.gate(&mut state)?;
            state.begin_send(self.shared.clock.now());
            conversation_id
        };

        log::debug!("Sending message to conversation {}", conversation_id);
        let result = self.shared.backend.send_message(&conversation_id, text).await;

        let mut state = self.shared.lock_state();
        state.end_send();
        match result {
            Ok(message) => {
                if !state.disposed {
                    state.errors.remove(&Operation::SendMessage);
                    if state.is_current(&conversation_id) {
                        self.shared.schedule_message_refresh(&mut state, conversation_id);
                    }
                }
                Ok(message)
            }
            Err(err) => {
                if !state.disposed {
                    state.assistant_typing = false;
                }
                Err(self.shared.fail(&mut state, Operation::SendMessage, err))
            }
        }
    }

    /// Start a new conversation with `text` as its first message and make it current.
    pub async fn start_new_conversation(&self, text: &str) -> Result<Conversation> {
        {
            let mut state = self.shared.lock_state();
            if state.disposed {
                return Err(ChatgateError::Closed);
            }
            self.shared.gate(&mut state)?;
            state.begin_send(self.shared.clock.now());
        }

        log::debug!("Starting new conversation");
        let result = self.shared.backend.start_conversation(text).await;

        let mut state = self.shared.lock_state();
        state.end_send();
        match result {
            Ok(StartedConversation { conversation, messages }) => {
                if !state.disposed {
                    log::info!("Started conversation {}", conversation.id);
                    state.errors.remove(&Operation::StartConversation);
                    state.timers.refresh_messages.cancel();
                    state.current_conversation = Some(conversation.id.clone());
                    state.apply_messages(messages);
                    if !state.conversations.iter().any(|c| c.id == conversation.id) {
                        state.conversations.insert(0, conversation.clone());
                    }
                    self.shared.schedule_conversation_refresh(&mut state);
                }
                Ok(conversation)
            }
            Err(err) => {
                if !state.disposed {
                    state.assistant_typing = false;
                }
                Err(self.shared.fail(&mut state, Operation::StartConversation, err))
            }
        }
    }

    /// Fetch the current conversation's messages now.
    pub async fn refresh_messages(&self) -> Result<Vec<Message>> {
        let conversation_id = {
            let state = self.shared.lock_state();
            if state.disposed {
                return Err(ChatgateError::Closed);
            }
            state.current_conversation.clone().ok_or(ChatgateError::NoConversation)?
        };

        let result = self.shared.backend.fetch_messages(&conversation_id).await;
        let mut state = self.shared.lock_state();
        match result {
            Ok(messages) => {
                if !state.disposed {
                    state.errors.remove(&Operation::FetchMessages);
                    if state.is_current(&conversation_id) {
                        state.apply_messages(messages.clone());
                    }
                }
                Ok(messages)
            }
            Err(err) => Err(self.shared.fail(&mut state, Operation::FetchMessages, err)),
        }
    }

    /// Fetch the conversation list now.
    pub async fn refresh_conversations(&self) -> Result<Vec<Conversation>> {
        if self.shared.lock_state().disposed {
            return Err(ChatgateError::Closed);
        }

        let result = self.shared.backend.fetch_conversations().await;
        let mut state = self.shared.lock_state();
        match result {
            Ok(conversations) => {
                if !state.disposed {
                    state.errors.remove(&Operation::FetchConversations);
                    state.conversations = conversations.clone();
                }
                Ok(conversations)
            }
            Err(err) => Err(self.shared.fail(&mut state, Operation::FetchConversations, err)),
        }
    }

    /// Feed messages observed outside `refresh_messages` (e.g. a push channel).
    pub fn observe_messages(&self, messages: Vec<Message>) {
        let mut state = self.shared.lock_state();
        if !state.disposed {
            state.apply_messages(messages);
        }
    }

    /// Re-scan every held operation error; already processed ones are skipped.
    pub fn observe_errors(&self) -> bool {
        let mut state = self.shared.lock_state();
        if state.disposed {
            return false;
        }
        let held = state.held_errors();
        let changed = state.limits.observe(&held, self.shared.clock.now());
        self.shared.publish(&mut state);
        changed
    }

    /// Manual rate cooldown for hints the classifier cannot see.
    pub fn apply_rate_limit(&self, seconds: u64) {
        let mut state = self.shared.lock_state();
        if state.disposed {
            return;
        }
        if state.limits.apply_rate_limit(seconds, self.shared.clock.now()) {
            log::info!("Manual rate limit applied for {}s", seconds);
        }
        self.shared.publish(&mut state);
    }

    pub fn switch_conversation(&self, conversation_id: impl Into<String>) {
        let mut state = self.shared.lock_state();
        if state.disposed {
            return;
        }
        let conversation_id = conversation_id.into();
        if state.is_current(&conversation_id) {
            return;
        }
        state.timers.refresh_messages.cancel();
        state.current_conversation = Some(conversation_id);
        state.messages.clear();
        state.assistant_typing = false;
    }

    pub fn current_conversation(&self) -> Option<String> {
        self.shared.lock_state().current_conversation.clone()
    }

    pub fn limits(&self) -> LimitStatus {
        let mut state = self.shared.lock_state();
        state.limits.status(self.shared.clock.now())
    }

    /// Receiver updated on every tick and every limit change.
    pub fn subscribe_limits(&self) -> watch::Receiver<LimitStatus> {
        self.shared.status_tx.subscribe()
    }

    pub fn is_assistant_typing(&self) -> bool {
        self.shared.lock_state().assistant_typing
    }

    pub fn phase(&self) -> SessionPhase {
        if self.shared.lock_state().in_flight > 0 {
            SessionPhase::Sending
        } else {
            SessionPhase::Idle
        }
    }

    pub fn is_ticking(&self) -> bool {
        self.shared.lock_state().ticking
    }

    pub fn messages(&self) -> Vec<Message> {
        self.shared.lock_state().messages.clone()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.shared.lock_state().conversations.clone()
    }

    /// The held failure of `op`, if its last attempt failed.
    pub fn error_for(&self, op: Operation) -> Option<Arc<OperationError>> {
        self.shared.lock_state().errors.get(&op).cloned()
    }

    /// First held failure in `Operation::ALL` order.
    pub fn last_error(&self) -> Option<Arc<OperationError>> {
        self.shared.lock_state().held_errors().into_iter().next()
    }

    /// Cancel the ticker and every pending refresh. Idempotent.
    pub fn shutdown(&self) {
        let mut state = self.shared.lock_state();
        if state.disposed {
            return;
        }
        state.disposed = true;
        state.ticking = false;
        state.timers.cancel_all();
        log::debug!("Chat session shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock_state().disposed
    }
}

impl<B: ChatBackend + 'static> Drop for ChatSession<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
