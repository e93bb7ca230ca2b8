use crate::state::{App, TranscriptPanel};
use crate::theme::{self, icons};
use chrono::{DateTime, Local};
use ocm_core::format::{
    channel_icon, format_runtime, format_tokens, relative_time, StatusCounts, SubagentStats,
};
use ocm_core::transcript::TranscriptView;
use ocm_core::tree::{Snapshot, TreeRow};
use ocm_gateway::ConnectionState;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};

pub fn render(f: &mut Frame, app: &App, now_ms: i64) {
    let area = f.size();
    f.render_widget(
        Block::default().style(Style::default().bg(theme::BACKGROUND).fg(theme::TEXT)),
        area,
    );

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(3),
            Constraint::Length(1),
        ])
        .split(area);

    render_header(f, app, layout[0]);
    if app.show_help || app.show_transcript {
        let main = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
            .split(layout[1]);
        render_tree(f, app, now_ms, main[0]);
        if app.show_help {
            render_help(f, main[1]);
        } else {
            render_transcript(f, app, main[1]);
        }
    } else {
        render_tree(f, app, now_ms, layout[1]);
    }
    render_summary(f, app, now_ms, layout[2]);
    render_footer(f, layout[3]);
}

fn panel(title: &str) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(theme::BORDER))
        .title(Span::styled(format!(" {title} "), theme::HEADER_STYLE))
        .style(Style::default().bg(theme::SURFACE))
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let line = Line::from(vec![
        Span::styled("🌘 OpenClaw", theme::HEADER_STYLE),
        Span::styled(format!("  {}", app.base_url), Style::default().fg(theme::MUTED)),
    ]);
    f.render_widget(Paragraph::new(line), area);
}

fn render_tree(f: &mut Frame, app: &App, now_ms: i64, area: Rect) {
    let block = panel("Agents");
    if app.tree.is_empty() {
        let message = match &app.connection {
            ConnectionState::Connecting => "Waiting for the gateway...",
            ConnectionState::Connected => "No sessions in the last 24h",
            ConnectionState::Disconnected { .. } => "Gateway unreachable. Press r to retry.",
            ConnectionState::AuthFailed { .. } => "Gateway rejected the token. Check gateway.auth.token.",
        };
        let p = Paragraph::new(Line::from(Span::styled(
            message,
            Style::default().fg(theme::MUTED),
        )))
        .block(block)
        .wrap(Wrap { trim: true });
        f.render_widget(p, area);
        return;
    }

    let items: Vec<ListItem> = app
        .tree
        .rows()
        .iter()
        .map(|row| ListItem::new(tree_line(app, *row, now_ms)))
        .collect();
    let list = List::new(items)
        .block(block)
        .highlight_style(theme::SELECTED_STYLE);
    let mut state = ListState::default();
    state.select(app.tree.selected_index());
    f.render_stateful_widget(list, area, &mut state);
}

fn tree_line(app: &App, row: TreeRow, now_ms: i64) -> Line<'static> {
    if row.is_group() {
        let Some(group) = app.tree.row_group(row) else {
            return Line::from("");
        };
        let expander = if app.tree.is_expanded(&group.agent_id) {
            icons::EXPANDED
        } else {
            icons::COLLAPSED
        };
        return Line::from(vec![
            Span::styled(format!("{expander} {}", group.agent_id), theme::GROUP_STYLE),
            Span::styled(
                format!(" ({})", group.sessions.len()),
                Style::default().fg(theme::MUTED),
            ),
        ]);
    }

    let Some(session) = app.tree.row_session(row) else {
        return Line::from("");
    };
    let status = session.status(now_ms);
    let tokens = match session.context_tokens {
        Some(context) => format!(
            "{}/{}",
            format_tokens(session.total_tokens),
            format_tokens(context)
        ),
        None => format_tokens(session.total_tokens),
    };
    let muted = Style::default().fg(theme::MUTED);
    Line::from(vec![
        Span::raw("  "),
        Span::styled(status.icon(), theme::status_style(status)),
        Span::raw(" "),
        Span::styled(session.name().to_string(), Style::default().fg(theme::TEXT)),
        Span::styled(format!("  {}", session.short_model()), muted),
        Span::raw(format!("  {}", channel_icon(&session.channel))),
        Span::styled(format!(" {tokens}"), muted),
        Span::styled(
            format!("  {}", relative_time(session.updated_at, now_ms)),
            theme::status_style(status),
        ),
    ])
}

fn render_transcript(f: &mut Frame, app: &App, area: Rect) {
    let muted = Style::default().fg(theme::MUTED);
    let (title, lines) = match &app.transcript {
        TranscriptPanel::Placeholder => (
            "Transcript".to_string(),
            vec![Line::from(Span::styled(
                "Select a session and press Enter to view its transcript",
                muted,
            ))],
        ),
        TranscriptPanel::Loading { title, .. } => (
            title.clone(),
            vec![Line::from(Span::styled("Loading...", muted))],
        ),
        TranscriptPanel::Loaded { title, view, .. } => (title.clone(), transcript_lines(view)),
    };

    let block = panel(&title);
    let inner_height = block.inner(area).height as usize;
    let scroll = lines.len().saturating_sub(inner_height) as u16;
    let p = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((scroll, 0));
    f.render_widget(p, area);
}

fn transcript_lines(view: &TranscriptView) -> Vec<Line<'static>> {
    match view {
        TranscriptView::Empty => vec![Line::from(Span::styled(
            "No messages found",
            Style::default().fg(theme::MUTED),
        ))],
        TranscriptView::Messages(messages) => messages
            .iter()
            .map(|message| {
                let style = theme::role_style(&message.role);
                Line::from(vec![
                    Span::styled(
                        format!("[{}] {}:", message.clock_label(), message.role.as_str()),
                        style,
                    ),
                    Span::raw(format!(" {}", message.content)),
                ])
            })
            .collect(),
    }
}

fn render_summary(f: &mut Frame, app: &App, now_ms: i64, area: Rect) {
    let style = match app.connection {
        ConnectionState::Disconnected { .. } => Style::default().fg(theme::CRITICAL),
        ConnectionState::AuthFailed { .. } => Style::default().fg(theme::ALERT),
        _ => Style::default().fg(theme::TEXT),
    };
    let block = Block::default()
        .borders(Borders::TOP)
        .border_style(Style::default().fg(theme::BORDER))
        .style(Style::default().bg(theme::SURFACE));
    let p = Paragraph::new(Line::from(Span::styled(
        summary_text(&app.connection, &app.snapshot, now_ms),
        style,
    )))
    .block(block);
    f.render_widget(p, area);
}

/// Footer text: connection problems first, then counts and freshness.
/// Counts come from the sub-agent tree when the gateway supplied one, and
/// from the session list otherwise.
pub fn summary_text(connection: &ConnectionState, snapshot: &Snapshot, now_ms: i64) -> String {
    let totals = match &snapshot.subagents {
        Some(stats) => subagent_totals(stats),
        None => session_totals(&StatusCounts::tally(&snapshot.groups, now_ms)),
    };
    let freshness = snapshot
        .updated_at_ms
        .map(|updated| format!("last update {}", clock_time(updated)));

    match connection {
        ConnectionState::Connecting if snapshot.updated_at_ms.is_none() => {
            format!("{} Connecting...", icons::CONNECTING)
        }
        ConnectionState::Disconnected { message } => match freshness {
            Some(freshness) => format!(
                "{} Gateway unreachable: {message} │ {totals} ({freshness})",
                icons::UNREACHABLE
            ),
            None => format!("{} Gateway unreachable: {message}", icons::UNREACHABLE),
        },
        ConnectionState::AuthFailed { message } => {
            format!("{} Auth failed: {message}", icons::LOCKED)
        }
        _ => match freshness {
            Some(freshness) => format!("{totals} · {freshness}"),
            None => totals,
        },
    }
}

fn session_totals(counts: &StatusCounts) -> String {
    format!(
        "● {} active  ○ {} idle  ⚠ {} aborted │ {} total",
        counts.active,
        counts.idle,
        counts.aborted,
        counts.total()
    )
}

fn subagent_totals(stats: &SubagentStats) -> String {
    let running = if stats.active > 0 {
        format!(
            "{} {} running (longest {})",
            icons::RUNNING,
            stats.active,
            format_runtime(stats.longest_active_ms)
        )
    } else {
        format!("{} 0 running", icons::NOTHING_RUNNING)
    };
    format!(
        "{running}  {} {} done │ {} total",
        icons::DONE,
        stats.completed,
        stats.total
    )
}

fn clock_time(epoch_ms: i64) -> String {
    DateTime::from_timestamp_millis(epoch_ms)
        .map(|time| time.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string())
}

fn render_footer(f: &mut Frame, area: Rect) {
    let key = Style::default().fg(theme::ACCENT).add_modifier(Modifier::BOLD);
    let label = Style::default().fg(theme::MUTED);
    let mut spans = Vec::new();
    for (binding, action) in [
        ("q", "quit"),
        ("r", "refresh"),
        ("enter", "open"),
        ("space", "fold"),
        ("e/c", "expand/collapse"),
        ("v", "transcript"),
        ("?", "help"),
    ] {
        spans.push(Span::styled(format!(" {binding} "), key));
        spans.push(Span::styled(format!("{action} "), label));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_help(f: &mut Frame, area: Rect) {
    let block = panel("Help");
    let key = Style::default().fg(theme::ACCENT);
    let bindings = [
        ("j / Down", "Next row"),
        ("k / Up", "Previous row"),
        ("g / Home", "First row"),
        ("Space", "Expand/collapse agent"),
        ("Enter", "Open transcript (or fold agent)"),
        ("e", "Expand all agents"),
        ("c", "Collapse all agents"),
        ("v", "Toggle transcript panel"),
        ("r", "Refresh now"),
        ("?", "Toggle help"),
        ("q / Ctrl-C", "Quit"),
    ];
    let mut text = vec![
        Line::from(Span::styled(
            "Keyboard Shortcuts",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];
    text.extend(bindings.iter().map(|(binding, action)| {
        Line::from(vec![
            Span::styled(format!("{binding:<12}"), key),
            Span::raw(*action),
        ])
    }));

    let p = Paragraph::new(text).block(block).wrap(Wrap { trim: true });
    f.render_widget(p, area);
}
