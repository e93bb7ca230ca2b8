mod cli;
mod reader;
mod state;
mod theme;
mod ui;

use anyhow::Result;
use clap::Parser;
use crossterm::{
    event::{Event, EventStream, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ocm_core::clock::{Clock, SystemClock};
use ocm_core::config::load_config;
use ocm_core::transcript::TranscriptStore;
use ocm_gateway::{GatewayClient, PollEvent, Poller, RefreshHandle};
use ratatui::{backend::CrosstermBackend, Terminal};
use reader::TranscriptReader;
use state::App;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const POLL_EVENT_CAPACITY: usize = 32;
/// Redraw cadence for relative timestamps between polls.
const RENDER_TICK: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    init_logging(args.log_file.as_deref());

    let mut config = load_config(args.config.as_deref());
    args.apply(&mut config);
    info!(
        "monitor_start: gateway={} interval={:?} home={}",
        config.base_url(),
        config.poll_interval,
        config.openclaw_home.display()
    );

    let (events_tx, events_rx) = mpsc::channel(POLL_EVENT_CAPACITY);
    let (refresh, refresh_rx) = RefreshHandle::channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = Poller::new(
        GatewayClient::from_config(&config),
        SystemClock,
        config.poll_interval,
    );
    let poller_task = tokio::spawn(poller.run(events_tx, refresh_rx, shutdown_rx));

    let mut reader = TranscriptReader::new(TranscriptStore::new(config.openclaw_home.clone()));
    let mut app = App::new(config.base_url(), config.transcript_limit);

    let result = match setup_terminal() {
        Ok(mut terminal) => {
            let result = run_app(&mut terminal, &mut app, events_rx, &refresh, &mut reader).await;
            result.and(restore_terminal(&mut terminal))
        }
        Err(err) => Err(err),
    };

    let result = stop_poller(result, shutdown_tx, poller_task).await;
    info!("monitor_stop");
    result
}

/// Stop the poller and wait for it to close its source, whatever the UI
/// outcome was. The outcome is handed back unchanged.
async fn stop_poller(
    outcome: Result<()>,
    shutdown: watch::Sender<bool>,
    poller: JoinHandle<()>,
) -> Result<()> {
    let _ = shutdown.send(true);
    if let Err(err) = poller.await {
        warn!("poller_join_failed: {err}");
    }
    outcome
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    mut poll_rx: mpsc::Receiver<PollEvent>,
    refresh: &RefreshHandle,
    reader: &mut TranscriptReader,
) -> Result<()> {
    let clock = SystemClock;
    let mut input = EventStream::new();
    let mut render_ticker = tokio::time::interval(RENDER_TICK);
    render_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        if app.take_refresh_request() && !refresh.request() {
            warn!("refresh_dropped: poller has stopped");
        }
        if let Some(request) = app.take_transcript_request() {
            reader.request(request);
        }

        terminal.draw(|frame| ui::render(frame, app, clock.now_ms()))?;

        tokio::select! {
            _ = render_ticker.tick() => {}
            Some(event) = poll_rx.recv() => {
                app.apply_poll_event(event);
            }
            result = reader.finished() => {
                app.apply_transcript(result);
            }
            maybe_event = input.next() => match maybe_event {
                Some(Ok(Event::Key(key))) => {
                    if matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat)
                        && app.handle_key(key)
                    {
                        break;
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => warn!("input_error: {err}"),
                None => break,
            },
            _ = &mut shutdown => {
                info!("shutdown_signal_received");
                break;
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(err) => {
                warn!("sigterm_handler_failed: {err}");
                ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("ctrl_c_handler_failed: {err}");
        std::future::pending::<()>().await;
    }
}

fn init_logging(log_file: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Some(path) = log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .try_init();
                return;
            }
            Err(err) => eprintln!("ocm-monitor: cannot open log file {}: {err}", path.display()),
        }
    }

    if stderr_logging_enabled(std::env::var("OCM_LOG_STDERR").ok().as_deref()) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .try_init();
    }
}

fn stderr_logging_enabled(flag: Option<&str>) -> bool {
    matches!(
        flag,
        Some("1") | Some("true") | Some("TRUE") | Some("yes") | Some("YES")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ocm_core::clock::ManualClock;
    use ocm_core::model::SessionRecord;
    use ocm_gateway::{GatewayError, SessionSource};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct ClosingSource {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl SessionSource for ClosingSource {
        async fn fetch_sessions(&mut self) -> Result<Vec<SessionRecord>, GatewayError> {
            Ok(Vec::new())
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn poller_is_closed_even_when_the_ui_failed() {
        let closed = Arc::new(AtomicBool::new(false));
        let source = ClosingSource {
            closed: Arc::clone(&closed),
        };
        let (events_tx, mut events_rx) = mpsc::channel(POLL_EVENT_CAPACITY);
        let (_refresh, refresh_rx) = RefreshHandle::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poller = Poller::new(source, ManualClock::new(0), Duration::from_secs(60));
        let task = tokio::spawn(poller.run(events_tx, refresh_rx, shutdown_rx));
        assert!(events_rx.recv().await.is_some());

        let outcome = stop_poller(
            Err(anyhow::anyhow!("terminal restore failed")),
            shutdown_tx,
            task,
        )
        .await;
        assert_eq!(
            outcome.map_err(|err| err.to_string()),
            Err("terminal restore failed".to_string())
        );
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn stderr_logging_needs_a_truthy_flag() {
        assert!(stderr_logging_enabled(Some("1")));
        assert!(stderr_logging_enabled(Some("yes")));
        assert!(!stderr_logging_enabled(Some("0")));
        assert!(!stderr_logging_enabled(None));
    }
}
