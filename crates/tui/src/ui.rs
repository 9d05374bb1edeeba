use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout},
    style::{Color, Style, Modifier},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};

use screenspy_core::types::AgentStatus;
use crate::App;

pub fn draw(f: &mut Frame, app: &App) {
    let chunks = if app.log_visible {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(f.area())
    } else {
        Layout::default()
            .constraints([Constraint::Percentage(100)])
            .split(f.area())
    };

    // -- Left panel: regions --

    let (banner_label, banner_bg) = match app.status() {
        AgentStatus::Running => ("RUNNING (Press S to stop)", Color::Green),
        AgentStatus::Stopping => ("STOPPING...", Color::Yellow),
        AgentStatus::Stopped => ("STOPPED (Press S to start)", Color::Red),
    };

    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));
    let mut lines: Vec<Line> = vec![
        Line::from(vec![
            Span::raw(" "),
            key("j"),
            Span::raw("/"),
            key("k"),
            Span::raw(" select, "),
            key("r"),
            Span::raw(" reset history, "),
            key("+"),
            Span::raw("/"),
            key("-"),
            Span::raw(" interval, "),
            key("l"),
            Span::raw(" logs"),
        ]),
        Line::from(""),
    ];

    {
        let state = app.state();
        let shift = state.vertical_shift();
        let last = state
            .last_cycle_at()
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "-".into());
        let dim = Style::default().fg(Color::DarkGray);

        lines.push(Line::from(vec![
            Span::styled(" interval ", dim),
            Span::raw(format!("{}s", app.settings.interval)),
            Span::styled("  cycles ", dim),
            Span::raw(state.cycles().to_string()),
            Span::styled("  last ", dim),
            Span::raw(last),
            Span::styled("  shift ", dim),
            Span::styled(
                shift.to_string(),
                Style::default().fg(if shift != 0 { Color::Magenta } else { Color::White }),
            ),
        ]));
        lines.push(Line::from(""));

        let results = state.detection_results();
        for (i, region) in app.settings.regions.iter().enumerate() {
            let is_selected = i == app.selected;
            let prefix = if is_selected { "> " } else { "  " };
            let detected = results.get(i).copied().unwrap_or(false);
            let (mark, mark_color) = if detected { ("[yes]", Color::Green) } else { ("[ no]", Color::DarkGray) };

            let rect = if i > 0 { region.rect.shifted(shift) } else { region.rect };
            let role = if i == 0 {
                "shift".to_string()
            } else {
                format!("{} click(s)", region.clicks.len())
            };

            lines.push(Line::from(vec![
                Span::raw(prefix),
                Span::styled(mark, Style::default().fg(mark_color)),
                Span::raw(" "),
                Span::styled(
                    format!("#{} '{}'", i, region.phrase),
                    Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
                ),
                Span::styled(format!("  {}", role), dim),
            ]));
            if is_selected {
                lines.push(Line::from(vec![
                    Span::styled(format!("      {}", rect), Style::default().fg(Color::Yellow)),
                    Span::styled(format!("  {}", state.current_screenshots().get(i).map(String::as_str).unwrap_or("")), dim),
                ]));
            }
        }

        let actions = state.action_history();
        let ok = actions.iter().filter(|&&a| a).count();
        lines.push(Line::from(""));
        lines.push(Line::from(vec![
            Span::styled(" history ", dim),
            Span::raw(format!("{}/{}", state.detection_history().len(), state.history_limit())),
            Span::styled("  clicks ", dim),
            Span::raw(format!("{} ok / {}", ok, actions.len())),
        ]));
    } // state lock dropped here

    // Split left panel into banner (1 line) + region list (fills space)
    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(0)])
        .split(chunks[0]);

    // Full-width centered banner
    let banner_width = left_chunks[0].width as usize;
    let pad_total = banner_width.saturating_sub(banner_label.len());
    let pad_left = pad_total / 2;
    let pad_right = pad_total - pad_left;
    let centered_banner = format!("{}{}{}", " ".repeat(pad_left), banner_label, " ".repeat(pad_right));
    let banner = Paragraph::new(Line::from(Span::styled(
        centered_banner,
        Style::default().fg(Color::Black).bg(banner_bg).add_modifier(Modifier::BOLD),
    )));
    f.render_widget(banner, left_chunks[0]);

    let region_list = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::LEFT | Borders::RIGHT | Borders::BOTTOM)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(region_list, left_chunks[1]);

    // -- Right panel: logs --
    if app.log_visible && chunks.len() > 1 {
        let visible_height = chunks[1].height.saturating_sub(2) as usize;
        let total = app.log_messages.len();
        let max_scroll = total.saturating_sub(visible_height);
        let scroll = app.log_scroll.min(max_scroll);
        let start = total.saturating_sub(visible_height + scroll);
        let end = total.saturating_sub(scroll);
        let log_lines: Vec<Line> = app.log_messages[start..end]
            .iter()
            .map(|m| parse_log_line(m))
            .collect();

        let log_panel = Paragraph::new(log_lines)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Logs ")
                    .border_style(Style::default().fg(Color::Yellow)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(log_panel, chunks[1]);
    }

    if let Some(dialog) = &app.confirm {
        dialog.render(f);
    }
}

/// Parse a structured log line (level\x1fprefix\x1fcolor\x1ftimestamp\x1fmessage)
/// into a colored Line for TUI rendering.
fn parse_log_line(raw: &str) -> Line<'_> {
    let parts: Vec<&str> = raw.splitn(5, '\x1f').collect();
    if parts.len() < 5 {
        return Line::from(raw);
    }

    let level = parts[0];
    let prefix = parts[1];
    let color_idx: u8 = parts[2].parse().unwrap_or(0);
    let timestamp = parts[3];
    let message = parts[4];

    let prefix_color = match color_idx {
        1 => Color::DarkGray,  // COLOR_GRAY
        2 => Color::LightBlue, // COLOR_BLUE
        3 => Color::Green,     // COLOR_GREEN
        4 => Color::Magenta,   // COLOR_MAGENTA
        _ => Color::White,
    };

    let mut spans = vec![
        Span::styled(timestamp, Style::default().fg(Color::DarkGray)),
        Span::raw(" "),
    ];

    // Level tag: only show for warn/error
    match level {
        "ERROR" => spans.push(Span::styled("error ", Style::default().fg(Color::Red))),
        "WARN" => spans.push(Span::styled("warn ", Style::default().fg(Color::Yellow))),
        _ => {}
    }

    if !prefix.is_empty() {
        spans.push(Span::styled(prefix, Style::default().fg(prefix_color).add_modifier(Modifier::BOLD)));
        spans.push(Span::raw(" "));
    }
    spans.push(Span::styled(message, Style::default().fg(prefix_color)));

    Line::from(spans)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_line_is_split_into_spans() {
        let line = parse_log_line("WARN\x1fcycle\x1f3\x1f12:00:01\x1fcycle failed");
        let text: Vec<&str> = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(text, vec!["12:00:01", " ", "warn ", "cycle", " ", "cycle failed"]);
        assert_eq!(line.spans[3].style.fg, Some(Color::Green));
    }

    #[test]
    fn plain_line_falls_back() {
        let line = parse_log_line("just text");
        assert_eq!(line.spans.len(), 1);
    }
}
