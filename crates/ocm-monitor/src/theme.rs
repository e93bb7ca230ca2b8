use ocm_core::model::SessionStatus;
use ocm_core::transcript::TranscriptRole;
use ratatui::style::{Color, Modifier, Style};

pub const BACKGROUND: Color = Color::Rgb(26, 26, 46);
pub const SURFACE: Color = Color::Rgb(22, 33, 62);
pub const BORDER: Color = Color::Rgb(42, 46, 61);
pub const TEXT: Color = Color::Rgb(255, 248, 231);
pub const MUTED: Color = Color::Rgb(168, 181, 162);
pub const ACCENT: Color = Color::Rgb(245, 166, 35);
pub const ALERT: Color = Color::Rgb(198, 123, 92);
pub const CRITICAL: Color = Color::Rgb(239, 68, 68);

pub const HEADER_STYLE: Style = Style::new().fg(ACCENT).add_modifier(Modifier::BOLD);
pub const SELECTED_STYLE: Style = Style::new()
    .bg(Color::Rgb(131, 165, 152))
    .fg(Color::Black)
    .add_modifier(Modifier::BOLD);
pub const GROUP_STYLE: Style = Style::new().fg(TEXT).add_modifier(Modifier::BOLD);

pub mod icons {
    pub const EXPANDED: &str = "▾";
    pub const COLLAPSED: &str = "▸";
    pub const CONNECTING: &str = "⚡";
    pub const UNREACHABLE: &str = "❌";
    pub const LOCKED: &str = "🔒";
    pub const RUNNING: &str = "▶";
    pub const NOTHING_RUNNING: &str = "◌";
    pub const DONE: &str = "✓";
}

pub fn status_style(status: SessionStatus) -> Style {
    match status {
        SessionStatus::Active => Style::new().fg(ACCENT).add_modifier(Modifier::BOLD),
        SessionStatus::Idle => Style::new().fg(MUTED),
        SessionStatus::Aborted => Style::new().fg(ALERT).add_modifier(Modifier::BOLD),
    }
}

pub fn role_style(role: &TranscriptRole) -> Style {
    match role {
        TranscriptRole::User => Style::new().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        TranscriptRole::Assistant => Style::new().fg(Color::Green).add_modifier(Modifier::BOLD),
        TranscriptRole::Tool | TranscriptRole::Other(_) => {
            Style::new().fg(MUTED).add_modifier(Modifier::DIM)
        }
    }
}
