use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use parley_core::{gate, ChatSession, GateView, ModelService, SessionPhase, SessionStatus};

/// While the chat isn't mounted, re-probe the service every this many ticks (~3s)
const REFRESH_EVERY_TICKS: u32 = 10;

pub struct App {
    pub should_quit: bool,
    pub title: String,
    pub model: String,

    // Gate state
    pub view: GateView,
    pub service: Arc<dyn ModelService>,
    refresh_task: Option<JoinHandle<()>>,
    ticks: u32,

    // Created the first time the gate mounts the chat
    pub session: Option<ChatSession>,
    session_status: Option<watch::Receiver<SessionStatus>>,

    // Chat log scrolling
    pub chat_scroll: u16,
    pub follow_tail: bool,
    pub chat_height: u16,       // inner height of the log area, set during render
    pub max_chat_scroll: u16,   // set during render

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation
}

impl App {
    pub fn new(service: Arc<dyn ModelService>, title: impl Into<String>, model: impl Into<String>) -> Self {
        let mut app = Self {
            should_quit: false,
            title: title.into(),
            model: model.into(),

            view: GateView::Preparing,
            service,
            refresh_task: None,
            ticks: 0,

            session: None,
            session_status: None,

            chat_scroll: 0,
            follow_tail: true,
            chat_height: 0,
            max_chat_scroll: 0,

            animation_frame: 0,
        };
        app.sync_view();
        app
    }

    /// Re-run the gate against the service's current signal, mounting the chat
    /// session the first time it says so.
    pub fn sync_view(&mut self) {
        let view = gate(&self.service.availability());
        if view != self.view {
            tracing::debug!(?view, "Gate view changed");
        }

        if view == GateView::Chat && self.session.is_none() {
            let session = ChatSession::new(Arc::clone(&self.service));
            self.session_status = Some(session.subscribe());
            self.session = Some(session);
            tracing::info!(model = %self.model, "Chat session started");
        }

        self.view = view;
    }

    pub fn is_busy(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_busy())
    }

    /// Called on every Tick event
    pub fn on_tick(&mut self) {
        self.ticks = self.ticks.wrapping_add(1);
        self.animation_frame = (self.animation_frame + 1) % 3;

        if let Some(session) = self.session.as_mut() {
            session.poll();
        }
        self.observe_session();

        self.sync_view();
        if self.view != GateView::Chat && self.ticks % REFRESH_EVERY_TICKS == 0 {
            self.refresh_availability();
        }
    }

    /// Fires when an in-flight request finishes, once a chat is mounted.
    pub fn completion(&self) -> Option<Arc<Notify>> {
        self.session.as_ref().map(ChatSession::completion)
    }

    /// Apply a finished reply right away instead of on the next tick.
    pub fn on_completion(&mut self) {
        let applied = self.session.as_mut().is_some_and(ChatSession::poll);
        if applied {
            self.observe_session();
        }
    }

    /// Probe the service in the background unless a probe is already running.
    pub fn refresh_availability(&mut self) {
        if self.refresh_task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let service = Arc::clone(&self.service);
        self.refresh_task = Some(tokio::spawn(async move {
            service.refresh().await;
        }));
    }

    /// Follow the log tail when a message lands or a request starts.
    pub fn observe_session(&mut self) {
        let Some(rx) = self.session_status.as_mut() else {
            return;
        };
        if !rx.has_changed().unwrap_or(false) {
            return;
        }

        let status = *rx.borrow_and_update();
        tracing::trace!(phase = ?status.phase, messages = status.messages, "Session changed");
        if status.messages > 0 || status.phase == SessionPhase::AwaitingResponse {
            self.follow_tail = true;
        }
    }

    pub fn submit(&mut self) {
        let submitted = self.session.as_mut().is_some_and(|s| s.submit_draft());
        if submitted {
            self.observe_session();
        }
    }

    pub fn scroll_up(&mut self, lines: u16) {
        // Leaving the tail: start from where the view actually is
        if self.follow_tail {
            self.chat_scroll = self.max_chat_scroll;
            self.follow_tail = false;
        }
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: u16) {
        if self.follow_tail {
            return;
        }
        self.chat_scroll = self.chat_scroll.saturating_add(lines);
        if self.chat_scroll >= self.max_chat_scroll {
            self.chat_scroll = self.max_chat_scroll;
            self.follow_tail = true;
        }
    }

    pub fn page(&self) -> u16 {
        self.chat_height.saturating_sub(1).max(1)
    }
}
