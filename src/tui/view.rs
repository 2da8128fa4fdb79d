//! Frame rendering for the comparison TUI.

use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Paragraph};
use ratatui::Frame;

use super::{Pane, PaneStatus};
use crate::sampler::SchedSnapshot;

/// Accent color distinguishing the first pane from the second.
const PANE_COLORS: [Color; 2] = [Color::Magenta, Color::Yellow];

/// Draw the full frame: a one-line header and both panes side by side.
pub fn draw(frame: &mut Frame, panes: &[Pane; 2]) {
    let [header, body] =
        Layout::vertical([Constraint::Length(1), Constraint::Min(0)]).areas(frame.area());

    frame.render_widget(
        Paragraph::new(Line::from(vec![
            Span::styled("nicetop", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(" — CFS fairness comparison (q to quit)"),
        ])),
        header,
    );

    let [left, right] =
        Layout::horizontal([Constraint::Percentage(50), Constraint::Percentage(50)]).areas(body);

    draw_pane(frame, left, &panes[0], PANE_COLORS[0]);
    draw_pane(frame, right, &panes[1], PANE_COLORS[1]);
}

fn draw_pane(frame: &mut Frame, area: Rect, pane: &Pane, accent: Color) {
    let block = Block::bordered().title(Span::styled(
        pane.label.clone(),
        Style::default().fg(accent),
    ));
    let inner = block.inner(area);

    frame.render_widget(block, area);
    frame.render_widget(Paragraph::new(pane_lines(pane, inner.width)), inner);
}

fn pane_lines(pane: &Pane, width: u16) -> Vec<Line<'static>> {
    let mut lines = vec![status_line(pane.status), Line::raw("")];

    let Some(snap) = &pane.current else {
        lines.push(Line::raw("waiting for first sample..."));
        return lines;
    };

    let width = usize::from(width);
    lines.push(field_line(width, "nice", nice_span(snap)));
    lines.push(field_line(
        width,
        "policy",
        Span::raw(snap.policy.as_str().to_string()),
    ));
    lines.push(field_line(
        width,
        "weight",
        Span::styled(snap.weight.to_string(), Style::default().fg(Color::Green)),
    ));
    lines.push(field_line(width, "vruntime", vruntime_span(snap.vruntime_ns)));
    lines.push(field_line(
        width,
        "nr_switches",
        Span::styled(
            snap.nr_switches.to_string(),
            Style::default().fg(Color::Green),
        ),
    ));

    lines.push(Line::raw(""));
    match pane.derived() {
        Some(derived) => {
            lines.push(field_line(
                width,
                "switches/s",
                Span::styled(
                    format!("{:.1}", derived.switch_rate),
                    Style::default().fg(Color::Cyan),
                ),
            ));
            lines.push(field_line(
                width,
                "vruntime delta",
                vruntime_span(derived.vruntime_delta_ns),
            ));
        }
        None => lines.push(Line::raw("deltas after next sample...")),
    }

    lines
}

fn status_line(status: PaneStatus) -> Line<'static> {
    let (text, color) = match status {
        PaneStatus::Live => ("live", Color::Green),
        PaneStatus::Stale => ("stale", Color::Yellow),
        PaneStatus::Stopped => ("stopped (target exited)", Color::Red),
    };

    Line::from(Span::styled(text, Style::default().fg(color)))
}

/// One right-aligned `name ... value` row, in the style of the kernel's own
/// sched accounting listing.
fn field_line(width: usize, name: &'static str, value: Span<'static>) -> Line<'static> {
    let used = name.len() + value.content.len();
    let padding = width.saturating_sub(used).max(1);

    Line::from(vec![
        Span::styled(name, Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(" ".repeat(padding)),
        value,
    ])
}

fn nice_span(snap: &SchedSnapshot) -> Span<'static> {
    let nice = snap.nice.get();
    // Lower niceness is higher priority; color it like a warning.
    let style = if nice < 0 {
        Style::default().fg(Color::Red)
    } else if nice > 0 {
        Style::default().fg(Color::Green)
    } else {
        Style::default()
    };

    Span::styled(nice.to_string(), style)
}

fn vruntime_span(vruntime_ns: Option<u64>) -> Span<'static> {
    match vruntime_ns {
        Some(ns) => Span::styled(format_ms(ns), Style::default().fg(Color::Red)),
        None => Span::styled("unavailable", Style::default().fg(Color::DarkGray)),
    }
}

/// Nanoseconds rendered as milliseconds, matching the kernel's own unit for
/// vruntime.
fn format_ms(ns: u64) -> String {
    format!("{:.3}ms", ns as f64 / 1_000_000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(0), "0.000ms");
        assert_eq!(format_ms(1_500_000), "1.500ms");
        assert_eq!(format_ms(6_051_258_752), "6051.259ms");
    }

    #[test]
    fn test_field_line_pads_between_name_and_value() {
        let line = field_line(20, "weight", Span::raw("1024"));
        let rendered: String = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(rendered.len(), 20);
        assert!(rendered.starts_with("weight"));
        assert!(rendered.ends_with("1024"));
    }

    #[test]
    fn test_field_line_never_collapses_on_narrow_pane() {
        let line = field_line(3, "weight", Span::raw("1024"));
        let rendered: String = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(rendered, "weight 1024");
    }

    #[test]
    fn test_vruntime_span_marks_unavailable() {
        assert_eq!(vruntime_span(None).content, "unavailable");
        assert_eq!(vruntime_span(Some(2_000_000)).content, "2.000ms");
    }
}
