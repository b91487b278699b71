use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn key_line(key: &'static str, pad: &'static str, action: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(pad),
        Span::raw(action),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit (a running job resumes on next launch)"),
        ]),
        key_line("s", "           ", "Start a job from the command-line fields"),
        key_line("c", "           ", "Stop watching the running job"),
        key_line("r", "           ", "Reset: forget the session and clear saved state"),
        key_line("tab", "         ", "Switch tabs"),
        key_line("?", "           ", "Show this help"),
        Line::from(""),
        Line::from("Progress is restored after a restart: an unfinished job is"),
        Line::from("requested again with the same fields, and a finished job's"),
        Line::from("documents are shown once."),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
