//! Chat session controller
//!
//! Owns the message log, the draft input, and at most one in-flight request to
//! the model service. A session moves `Idle -> AwaitingResponse -> Idle`; a
//! submit while awaiting is dropped, not queued.

use std::sync::Arc;

use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::sync::{watch, Notify};

use crate::service::{ModelService, ServiceError};
use crate::state::{ChatMessage, ChatRole};

/// Assistant reply appended when the service call fails for any reason.
pub const FALLBACK_REPLY: &str = "Sorry, I couldn't process your request.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    AwaitingResponse,
}

/// Snapshot published to subscribers on every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub messages: usize,
}

type Reply = Result<String, ServiceError>;

/// Sending half of an in-flight request. Dropping it, whether after a reply
/// or because the task panicked, wakes whoever waits on the completion handle.
struct Settlement {
    reply: Option<oneshot::Sender<Reply>>,
    completion: Arc<Notify>,
}

impl Settlement {
    fn send(mut self, reply: Reply) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(reply);
        }
    }
}

impl Drop for Settlement {
    fn drop(&mut self) {
        // Close the channel first so a woken poll() never sees it still empty
        drop(self.reply.take());
        self.completion.notify_one();
    }
}

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub struct ChatSession {
    service: Arc<dyn ModelService>,
    messages: Vec<ChatMessage>,
    draft: String,
    cursor: usize, // cursor position in draft, in chars
    pending: Option<oneshot::Receiver<Reply>>,
    completion: Arc<Notify>,
    status: watch::Sender<SessionStatus>,
}

impl ChatSession {
    pub fn new(service: Arc<dyn ModelService>) -> Self {
        let (status, _) = watch::channel(SessionStatus::default());
        Self {
            service,
            messages: Vec::new(),
            draft: String::new(),
            cursor: 0,
            pending: None,
            completion: Arc::new(Notify::new()),
            status,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            phase: if self.is_busy() {
                SessionPhase::AwaitingResponse
            } else {
                SessionPhase::Idle
            },
            messages: self.messages.len(),
        }
    }

    /// Receive a [`SessionStatus`] every time the log or phase changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Notified whenever an in-flight request finishes. By then `poll()` will
    /// apply the reply, so an event loop can settle without waiting for a tick.
    /// A notification may be stale; `poll()` simply returns false then.
    pub fn completion(&self) -> Arc<Notify> {
        Arc::clone(&self.completion)
    }

    /// Send `text` to the model service.
    ///
    /// Returns `false` without touching any state when `text` is empty or a
    /// request is already in flight. Must be called within a tokio runtime.
    pub fn submit(&mut self, text: &str) -> bool {
        if text.is_empty() || self.is_busy() {
            return false;
        }

        // The prompt is logged before the call exists so it always displays first
        let message = ChatMessage::new(ChatRole::User, text);
        let id = message.id();
        self.messages.push(message);
        self.draft.clear();
        self.cursor = 0;

        let (tx, rx) = oneshot::channel();
        let settlement = Settlement {
            reply: Some(tx),
            completion: Arc::clone(&self.completion),
        };
        let service = Arc::clone(&self.service);
        let prompt = text.to_string();
        tokio::spawn(async move {
            let reply = service.respond(&prompt).await;
            settlement.send(reply);
        });
        self.pending = Some(rx);

        tracing::debug!(%id, chars = text.chars().count(), "Submitted prompt");
        self.publish();
        true
    }

    /// Submit the current draft ("submit on enter").
    pub fn submit_draft(&mut self) -> bool {
        let text = self.draft.clone();
        self.submit(&text)
    }

    /// Apply the reply if the in-flight request has finished. Never blocks.
    ///
    /// Returns true when a reply was appended.
    pub fn poll(&mut self) -> bool {
        let Some(rx) = self.pending.as_mut() else {
            return false;
        };

        let received = match rx.try_recv() {
            Ok(reply) => Some(reply),
            Err(TryRecvError::Empty) => return false,
            // The task ended without replying
            Err(TryRecvError::Closed) => None,
        };
        self.pending = None;
        self.complete(received);
        true
    }

    /// Wait for the in-flight request, if any, and apply its reply.
    ///
    /// Cancel-safe: dropping the future leaves the request pending.
    pub async fn settle(&mut self) {
        if let Some(rx) = self.pending.as_mut() {
            let received = rx.await.ok();
            self.pending = None;
            self.complete(received);
        }
    }

    fn complete(&mut self, received: Option<Reply>) {
        let (content, outcome) = match received {
            Some(Ok(content)) => (content, "reply"),
            Some(Err(_)) | None => (FALLBACK_REPLY.to_string(), "fallback"),
        };

        let message = ChatMessage::new(ChatRole::Assistant, content);
        tracing::debug!(id = %message.id(), outcome, "Request settled");
        self.messages.push(message);
        self.publish();
    }

    fn publish(&self) {
        self.status.send_replace(self.status());
    }

    // Draft editing. Input is disabled while a request is in flight.

    pub fn insert_char(&mut self, c: char) {
        if self.is_busy() {
            return;
        }
        let byte_pos = char_to_byte_index(&self.draft, self.cursor);
        self.draft.insert(byte_pos, c);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.is_busy() || self.cursor == 0 {
            return;
        }
        self.cursor -= 1;
        let byte_pos = char_to_byte_index(&self.draft, self.cursor);
        self.draft.remove(byte_pos);
    }

    pub fn delete(&mut self) {
        if self.is_busy() {
            return;
        }
        let char_count = self.draft.chars().count();
        if self.cursor < char_count {
            let byte_pos = char_to_byte_index(&self.draft, self.cursor);
            self.draft.remove(byte_pos);
        }
    }

    pub fn cursor_left(&mut self) {
        if !self.is_busy() {
            self.cursor = self.cursor.saturating_sub(1);
        }
    }

    pub fn cursor_right(&mut self) {
        if !self.is_busy() {
            let char_count = self.draft.chars().count();
            self.cursor = (self.cursor + 1).min(char_count);
        }
    }

    pub fn cursor_home(&mut self) {
        if !self.is_busy() {
            self.cursor = 0;
        }
    }

    pub fn cursor_end(&mut self) {
        if !self.is_busy() {
            self.cursor = self.draft.chars().count();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::Availability;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replies immediately with a fixed result and records the prompts it saw.
    struct StubService {
        reply: Option<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl StubService {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: None,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ModelService for StubService {
        fn availability(&self) -> Availability {
            Availability::Available
        }

        async fn respond(&self, prompt: &str) -> Result<String, ServiceError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone().ok_or(ServiceError::EmptyReply)
        }
    }

    /// Holds every reply until released.
    struct GatedService {
        release: Notify,
    }

    #[async_trait]
    impl ModelService for GatedService {
        fn availability(&self) -> Availability {
            Availability::Available
        }

        async fn respond(&self, prompt: &str) -> Result<String, ServiceError> {
            self.release.notified().await;
            Ok(format!("echo: {}", prompt))
        }
    }

    struct PanickingService;

    #[async_trait]
    impl ModelService for PanickingService {
        fn availability(&self) -> Availability {
            Availability::Available
        }

        async fn respond(&self, _prompt: &str) -> Result<String, ServiceError> {
            panic!("model runtime crashed");
        }
    }

    fn log(session: &ChatSession) -> Vec<(ChatRole, &str)> {
        session
            .messages()
            .iter()
            .map(|m| (m.role(), m.content()))
            .collect()
    }

    #[tokio::test]
    async fn test_successful_round_trip() {
        let service = StubService::replying("AppleCare covers hardware repairs.");
        let mut session = ChatSession::new(service.clone());

        assert!(session.submit("What is AppleCare?"));
        session.settle().await;

        assert_eq!(
            log(&session),
            vec![
                (ChatRole::User, "What is AppleCare?"),
                (ChatRole::Assistant, "AppleCare covers hardware repairs."),
            ]
        );
        assert!(!session.is_busy());
        assert_eq!(*service.prompts.lock().unwrap(), vec!["What is AppleCare?".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_appends_fallback() {
        let mut session = ChatSession::new(StubService::failing());

        assert!(session.submit("test"));
        session.settle().await;

        assert_eq!(
            log(&session),
            vec![(ChatRole::User, "test"), (ChatRole::Assistant, FALLBACK_REPLY)]
        );
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_panicking_service_appends_fallback() {
        let mut session = ChatSession::new(Arc::new(PanickingService));

        assert!(session.submit("boom"));
        session.settle().await;

        assert_eq!(
            log(&session),
            vec![(ChatRole::User, "boom"), (ChatRole::Assistant, FALLBACK_REPLY)]
        );
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_each_submit_adds_exactly_two_messages() {
        let mut session = ChatSession::new(StubService::replying("ok"));

        for (i, text) in ["a", "two words", "ünïcödé ✓", " "].iter().enumerate() {
            assert!(session.submit(text));
            session.settle().await;
            assert_eq!(session.messages().len(), (i + 1) * 2);

            let tail = &session.messages()[i * 2..];
            assert_eq!(tail[0].role(), ChatRole::User);
            assert_eq!(tail[0].content(), *text);
            assert_eq!(tail[1].role(), ChatRole::Assistant);
        }
    }

    #[tokio::test]
    async fn test_empty_submit_is_noop() {
        let mut session = ChatSession::new(StubService::replying("ok"));
        let mut status = session.subscribe();

        assert!(!session.submit(""));
        assert!(session.messages().is_empty());
        assert!(!session.is_busy());
        assert!(!status.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_busy_state_and_dropped_resubmit() {
        let service = Arc::new(GatedService { release: Notify::new() });
        let mut session = ChatSession::new(service.clone());
        assert!(!session.is_busy());

        assert!(session.submit("first"));
        assert!(session.is_busy());
        assert_eq!(log(&session), vec![(ChatRole::User, "first")]);

        // Dropped, not queued
        assert!(!session.submit("second"));
        assert_eq!(session.messages().len(), 1);
        assert!(session.is_busy());

        // Input is disabled while awaiting
        session.insert_char('x');
        assert_eq!(session.draft(), "");

        service.release.notify_one();
        session.settle().await;

        assert!(!session.is_busy());
        assert_eq!(
            log(&session),
            vec![(ChatRole::User, "first"), (ChatRole::Assistant, "echo: first")]
        );

        // Settling an idle session does nothing
        session.settle().await;
        assert_eq!(session.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_poll_applies_reply_once_finished() {
        let service = Arc::new(GatedService { release: Notify::new() });
        let mut session = ChatSession::new(service.clone());

        assert!(!session.poll());
        assert!(session.submit("hello"));
        assert!(!session.poll());

        service.release.notify_one();
        let mut settled = false;
        for _ in 0..100 {
            tokio::task::yield_now().await;
            if session.poll() {
                settled = true;
                break;
            }
        }

        assert!(settled);
        assert!(!session.is_busy());
        assert_eq!(session.messages()[1].content(), "echo: hello");
        assert!(!session.poll());
    }

    #[tokio::test]
    async fn test_completion_fires_once_reply_is_ready() {
        let service = Arc::new(GatedService { release: Notify::new() });
        let mut session = ChatSession::new(service.clone());
        let completion = session.completion();

        assert!(session.submit("hello"));
        service.release.notify_one();
        completion.notified().await;

        // No tick or yield in between
        assert!(session.poll());
        assert!(!session.is_busy());
        assert_eq!(
            log(&session),
            vec![(ChatRole::User, "hello"), (ChatRole::Assistant, "echo: hello")]
        );
    }

    #[tokio::test]
    async fn test_completion_fires_when_task_panics() {
        let mut session = ChatSession::new(Arc::new(PanickingService));
        let completion = session.completion();

        assert!(session.submit("boom"));
        completion.notified().await;

        assert!(session.poll());
        assert_eq!(session.messages()[1].content(), FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn test_subscribers_see_phase_transitions() {
        let service = Arc::new(GatedService { release: Notify::new() });
        let mut session = ChatSession::new(service.clone());
        let mut status = session.subscribe();
        assert_eq!(*status.borrow_and_update(), SessionStatus::default());

        session.submit("hi");
        assert!(status.has_changed().unwrap());
        assert_eq!(
            *status.borrow_and_update(),
            SessionStatus {
                phase: SessionPhase::AwaitingResponse,
                messages: 1,
            }
        );

        service.release.notify_one();
        session.settle().await;
        assert_eq!(
            *status.borrow_and_update(),
            SessionStatus {
                phase: SessionPhase::Idle,
                messages: 2,
            }
        );
        assert_eq!(session.status(), *status.borrow());
    }

    #[tokio::test]
    async fn test_submit_draft_clears_input() {
        let mut session = ChatSession::new(StubService::replying("ok"));
        for c in "hey".chars() {
            session.insert_char(c);
        }

        assert!(session.submit_draft());
        assert_eq!(session.draft(), "");
        assert_eq!(session.cursor(), 0);
        session.settle().await;
        assert_eq!(session.messages()[0].content(), "hey");

        // Empty draft does nothing
        assert!(!session.submit_draft());
        assert_eq!(session.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_submit_keeps_draft() {
        let service = Arc::new(GatedService { release: Notify::new() });
        let mut session = ChatSession::new(service.clone());
        session.submit("first");

        // Draft can't be typed while busy, so it stays empty and submit is refused
        assert!(!session.submit_draft());
        assert_eq!(session.messages().len(), 1);

        service.release.notify_one();
        session.settle().await;
    }

    #[test]
    fn test_draft_editing_with_multibyte_chars() {
        let mut session = ChatSession::new(StubService::replying("ok"));
        for c in "héllo".chars() {
            session.insert_char(c);
        }
        assert_eq!(session.cursor(), 5);

        session.cursor_home();
        session.cursor_right();
        session.delete();
        assert_eq!(session.draft(), "hllo");

        session.insert_char('ë');
        assert_eq!(session.draft(), "hëllo");
        assert_eq!(session.cursor(), 2);

        session.cursor_end();
        session.backspace();
        assert_eq!(session.draft(), "hëll");

        session.cursor_right();
        assert_eq!(session.cursor(), 4);
        session.cursor_left();
        session.cursor_left();
        session.backspace();
        assert_eq!(session.draft(), "hll");
        assert_eq!(session.cursor(), 1);
    }
}
