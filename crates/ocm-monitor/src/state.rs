use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ocm_core::model::SessionRecord;
use ocm_core::transcript::TranscriptView;
use ocm_core::tree::{NodeId, Snapshot, TreeView};
use ocm_gateway::{ConnectionState, PollEvent};
use std::sync::Arc;
use tracing::debug;

/// A transcript read the main loop should run off the render path.
#[derive(Debug, Clone)]
pub struct TranscriptRequest {
    pub session_key: String,
    pub record: SessionRecord,
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct TranscriptResult {
    pub session_key: String,
    pub view: TranscriptView,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptPanel {
    Placeholder,
    Loading { session_key: String, title: String },
    Loaded {
        session_key: String,
        title: String,
        view: TranscriptView,
    },
}

impl TranscriptPanel {
    fn session_key(&self) -> Option<&str> {
        match self {
            TranscriptPanel::Placeholder => None,
            TranscriptPanel::Loading { session_key, .. }
            | TranscriptPanel::Loaded { session_key, .. } => Some(session_key),
        }
    }
}

pub struct App {
    pub base_url: String,
    pub tree: TreeView,
    pub snapshot: Arc<Snapshot>,
    pub connection: ConnectionState,
    pub transcript: TranscriptPanel,
    pub transcript_limit: usize,
    pub show_transcript: bool,
    pub show_help: bool,
    refresh_requested: bool,
    pending_transcript: Option<TranscriptRequest>,
}

impl App {
    pub fn new(base_url: impl Into<String>, transcript_limit: usize) -> Self {
        Self {
            base_url: base_url.into(),
            tree: TreeView::new(),
            snapshot: Arc::new(Snapshot::default()),
            connection: ConnectionState::Connecting,
            transcript: TranscriptPanel::Placeholder,
            transcript_limit,
            show_transcript: true,
            show_help: false,
            refresh_requested: false,
            pending_transcript: None,
        }
    }

    pub fn apply_poll_event(&mut self, event: PollEvent) {
        match event {
            PollEvent::Snapshot(snapshot) => {
                self.tree.apply(snapshot.groups.clone());
                self.snapshot = snapshot;
                self.connection = ConnectionState::Connected;
            }
            PollEvent::StateChanged(state) => {
                self.connection = state;
            }
        }
    }

    /// Accept a finished transcript read unless the user has moved on.
    pub fn apply_transcript(&mut self, result: TranscriptResult) -> bool {
        let selected = self.tree.selected_session().map(|session| session.key.as_str());
        let awaited = self.transcript.session_key();
        if selected != Some(result.session_key.as_str()) || awaited != selected {
            debug!("transcript_discarded: {}", result.session_key);
            return false;
        }
        let title = match &self.transcript {
            TranscriptPanel::Loading { title, .. } | TranscriptPanel::Loaded { title, .. } => {
                title.clone()
            }
            TranscriptPanel::Placeholder => result.session_key.clone(),
        };
        self.transcript = TranscriptPanel::Loaded {
            session_key: result.session_key,
            title,
            view: result.view,
        };
        true
    }

    pub fn take_refresh_request(&mut self) -> bool {
        std::mem::take(&mut self.refresh_requested)
    }

    pub fn take_transcript_request(&mut self) -> Option<TranscriptRequest> {
        self.pending_transcript.take()
    }

    /// Returns true when the app should exit.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return true;
        }
        if key.code == KeyCode::Char('?') {
            self.show_help = !self.show_help;
            return false;
        }
        if key.code == KeyCode::Esc && self.show_help {
            self.show_help = false;
            return false;
        }

        match key.code {
            KeyCode::Char('q') => return true,
            KeyCode::Char('r') => {
                self.refresh_requested = true;
                self.reload_open_transcript();
            }
            KeyCode::Down | KeyCode::Char('j') => self.tree.move_selection(1),
            KeyCode::Up | KeyCode::Char('k') => self.tree.move_selection(-1),
            KeyCode::Char('g') | KeyCode::Home => self.tree.select_first(),
            KeyCode::Char(' ') => {
                self.tree.toggle_selected();
            }
            KeyCode::Enter => {
                if !self.tree.toggle_selected() {
                    self.open_selected_transcript();
                }
            }
            KeyCode::Char('e') => self.tree.expand_all(),
            KeyCode::Char('c') => self.tree.collapse_all(),
            KeyCode::Char('v') => {
                self.show_transcript = !self.show_transcript;
                if self.show_transcript {
                    self.reload_open_transcript();
                }
            }
            _ => {}
        }
        false
    }

    fn open_selected_transcript(&mut self) {
        let Some(record) = self.tree.selected_session().cloned() else {
            return;
        };
        self.show_transcript = true;
        self.transcript = TranscriptPanel::Loading {
            session_key: record.key.clone(),
            title: transcript_title(&record),
        };
        self.pending_transcript = Some(TranscriptRequest {
            session_key: record.key.clone(),
            record,
            limit: self.transcript_limit,
        });
    }

    fn reload_open_transcript(&mut self) {
        let Some(key) = self.transcript.session_key().map(str::to_string) else {
            return;
        };
        if self.tree.selected_id() == Some(NodeId::Session(key)) {
            self.open_selected_transcript();
        }
    }
}

fn transcript_title(record: &SessionRecord) -> String {
    format!(
        "{} · {} · {}",
        record.name(),
        record.agent_id(),
        record.short_model()
    )
}
