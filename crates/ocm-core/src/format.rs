use crate::model::{AgentGroup, SessionStatus, SubagentNode, ACTIVE_THRESHOLD_MS};

const CHANNEL_ICONS: [(&str, &str); 4] = [
    ("discord", "⌨"),
    ("cron", "⏱"),
    ("hearth", "🔥"),
    ("webchat", "🌐"),
];

/// `0`, `950`, `27K`, `1.2M`.
pub fn format_tokens(count: u64) -> String {
    if count >= 1_000_000 {
        format!("{:.1}M", count as f64 / 1_000_000.0)
    } else if count >= 1_000 {
        format!("{}K", count / 1_000)
    } else {
        count.to_string()
    }
}

/// `active` while [`derive_status`](crate::model::derive_status) would say so,
/// then `Ns ago`, `Nm ago`, `Nh ago`, `Nd ago`.
pub fn relative_time(updated_at_ms: i64, now_ms: i64) -> String {
    let delta_ms = now_ms.saturating_sub(updated_at_ms);
    if delta_ms < ACTIVE_THRESHOLD_MS {
        return "active".to_string();
    }
    let seconds = delta_ms / 1_000;
    match seconds {
        s if s < 60 => format!("{s}s ago"),
        s if s < 3_600 => format!("{}m ago", s / 60),
        s if s < 86_400 => format!("{}h ago", s / 3_600),
        s => format!("{}d ago", s / 86_400),
    }
}

/// `0s`, `1s`, `1m1s`, `1h1m`. Partial seconds round up; seconds are
/// dropped once the runtime reaches an hour.
pub fn format_runtime(runtime_ms: u64) -> String {
    if runtime_ms == 0 {
        return "0s".to_string();
    }
    let total_seconds = runtime_ms.div_ceil(1_000);
    let hours = total_seconds / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if seconds > 0 && hours == 0 {
        out.push_str(&format!("{seconds}s"));
    }
    out
}

/// Exact channel match first, then substring (`cron:nightly` → cron).
pub fn channel_icon(channel: &str) -> &'static str {
    if let Some((_, icon)) = CHANNEL_ICONS.iter().find(|(name, _)| *name == channel) {
        return *icon;
    }
    CHANNEL_ICONS
        .iter()
        .find(|(name, _)| channel.contains(*name))
        .map(|(_, icon)| *icon)
        .unwrap_or("·")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub active: usize,
    pub idle: usize,
    pub aborted: usize,
}

impl StatusCounts {
    pub fn tally(groups: &[AgentGroup], now_ms: i64) -> Self {
        let mut counts = Self::default();
        for session in groups.iter().flat_map(|group| group.sessions.iter()) {
            match session.status(now_ms) {
                SessionStatus::Active => counts.active += 1,
                SessionStatus::Idle => counts.idle += 1,
                SessionStatus::Aborted => counts.aborted += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.active + self.idle + self.aborted
    }
}

/// Counts over the whole sub-agent tree, every nesting level included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubagentStats {
    pub active: usize,
    pub completed: usize,
    pub total: usize,
    pub longest_active_ms: u64,
}

impl SubagentStats {
    /// `None` for an empty tree, so callers fall back to session counts.
    pub fn tally(nodes: &[SubagentNode]) -> Option<Self> {
        if nodes.is_empty() {
            return None;
        }
        let mut stats = Self::default();
        for node in nodes.iter().flat_map(SubagentNode::walk) {
            stats.total += 1;
            if node.is_active() {
                stats.active += 1;
                stats.longest_active_ms = stats.longest_active_ms.max(node.runtime_ms);
            } else if node.is_completed() {
                stats.completed += 1;
            }
        }
        Some(stats)
    }
}
