mod help;
mod state;

use crate::cli::{build_controller, build_request, Cli};
use crate::model::{ClientConfig, ClientEvent, DocumentKind, JobRequest};
use crate::orchestrator::{self, ControllerOptions, UiCommand};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph, Tabs, Wrap},
    Terminal,
};
use state::{kv_line, UiState};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub async fn run(args: Cli, cfg: ClientConfig) -> Result<()> {
    // Unbounded channels avoid backpressure between the stream task and the UI.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<ClientEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let controller = build_controller(&args, &cfg, event_tx)?;
    let request = build_request(&args);
    let opts = ControllerOptions {
        resume: !args.no_resume,
        initial_request: request.clone(),
        exit_when_settled: false,
    };

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let base_url = cfg.base_url.clone();
    let ui_handle =
        std::thread::spawn(move || run_threaded(base_url, request, event_rx, cmd_tx));

    let res = orchestrator::run_controller(controller, opts, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res.map(|_| ())
}

pub fn run_threaded(
    base_url: String,
    request: Option<JobRequest>,
    mut event_rx: UnboundedReceiver<ClientEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState {
        can_start: request.is_some(),
        base_url,
        ..Default::default()
    };

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep UI responsive.
        while let Ok(ev) = event_rx.try_recv() {
            state.apply_event(ev);
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match (k.modifiers, k.code) {
                    (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                    (_, KeyCode::Char('s')) => match &request {
                        Some(req) if !state.is_busy() => {
                            state.info = "Start requested…".into();
                            let _ = cmd_tx.send(UiCommand::Start(Box::new(req.clone())));
                        }
                        Some(_) => state.info = "A job is already running".into(),
                        None => state.info = "Pass --main to start a job".into(),
                    },
                    (_, KeyCode::Char('c')) => {
                        if state.is_busy() {
                            let _ = cmd_tx.send(UiCommand::Cancel);
                        }
                    }
                    (_, KeyCode::Char('r')) => {
                        let _ = cmd_tx.send(UiCommand::Reset);
                    }
                    (_, KeyCode::Tab) => {
                        state.tab = (state.tab + 1) % 2;
                    }
                    (_, KeyCode::Char('?')) => {
                        state.tab = 1;
                    }
                    _ => {}
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![Line::from("Job"), Line::from("Help")])
        .select(state.tab)
        .block(Block::default().borders(Borders::ALL).title("jobstream"))
        .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        0 => draw_job(chunks[1], f, state),
        _ => help::draw_help(chunks[1], f),
    }
}

fn draw_job(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Length(5),
                Constraint::Min(0),
            ]
            .as_ref(),
        )
        .split(area);

    let (label, color) = state.phase_label();
    let gauge = Gauge::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(Line::from(vec![
                    Span::raw("Progress ("),
                    Span::styled(label, Style::default().fg(color)),
                    Span::raw(")"),
                ])),
        )
        .gauge_style(Style::default().fg(color))
        .ratio(state.ratio());
    f.render_widget(gauge, rows[0]);

    let status = Paragraph::new(vec![
        kv_line("Now", &state.session.current_message),
        kv_line("Info", &state.info),
        kv_line(
            "Steps",
            &format!(
                "{} of ~{}",
                state.session.events_applied,
                crate::engine::EXPECTED_STEPS
            ),
        ),
    ])
    .wrap(Wrap { trim: true })
    .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(status, rows[1]);

    let bottom = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
        .split(rows[2]);

    // Newest messages last; keep the tail visible.
    let visible = bottom[0].height.saturating_sub(2) as usize;
    let skip = state.session.messages.len().saturating_sub(visible);
    let items: Vec<ListItem> = state
        .session
        .messages
        .iter()
        .skip(skip)
        .map(|m| ListItem::new(m.as_str()))
        .collect();
    f.render_widget(
        List::new(items).block(Block::default().borders(Borders::ALL).title("Log")),
        bottom[0],
    );

    f.render_widget(
        Paragraph::new(result_lines(state))
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("Result")),
        bottom[1],
    );
}

fn result_lines(state: &UiState) -> Vec<Line<'static>> {
    if let Some(err) = state.session.error() {
        return vec![Line::from(Span::styled(
            format!("Error: {err}"),
            Style::default().fg(Color::Red),
        ))];
    }
    let Some(bundle) = state.session.result() else {
        let hint = if state.can_start && !state.is_busy() {
            "No result yet. Press s to start."
        } else {
            "No result yet."
        };
        return vec![Line::from(hint)];
    };

    let mut lines = vec![Line::from(Span::styled(
        bundle.title.clone(),
        Style::default().add_modifier(Modifier::BOLD),
    ))];
    for (label, kind, name) in [
        ("PDF", DocumentKind::Pdf, &bundle.pdf_name),
        ("Word", DocumentKind::Word, &bundle.word_name),
    ] {
        if name.is_empty() {
            continue;
        }
        lines.push(kv_line(label, name));
        if let Some(url) = bundle.download_url(&state.base_url, kind) {
            lines.push(Line::from(Span::styled(
                format!("  {url}"),
                Style::default().fg(Color::Cyan),
            )));
        }
    }
    lines
}
