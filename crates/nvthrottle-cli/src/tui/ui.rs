//! Dashboard rendering.
//!
//! Full layout: header, one block per GPU with telemetry and a 40-cell
//! throttle history strip, footer with key hints. When the terminal is too
//! short for the full blocks, each GPU collapses to a single compact line.

use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};

use nvthrottle_core::{HistoryBuffer, RawReading, ThrottleCause};

use super::app::{App, DeviceView};

/// Rows needed per device for the full (non-compact) layout.
const DEVICE_BLOCK_HEIGHT: u16 = 5;

pub fn draw(f: &mut Frame, app: &App) {
    let area = f.area();
    let n_devices = app.devices().len() as u16;
    let compact = area.height < 2 + n_devices * DEVICE_BLOCK_HEIGHT + 1;

    let device_height = if compact { 1 } else { DEVICE_BLOCK_HEIGHT };
    let mut constraints = vec![Constraint::Length(1)];
    constraints.extend(std::iter::repeat_n(
        Constraint::Length(device_height),
        app.devices().len(),
    ));
    constraints.push(Constraint::Min(0));
    constraints.push(Constraint::Length(1));

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(area);

    draw_header(f, chunks[0], app);
    for (i, view) in app.devices().values().enumerate() {
        let chunk = chunks[1 + i];
        if compact {
            draw_device_compact(f, chunk, view);
        } else {
            draw_device(f, chunk, view);
        }
    }
    draw_footer(f, chunks[chunks.len() - 1], app);
}

// ---------------------------------------------------------------------------
// Header / footer
// ---------------------------------------------------------------------------

fn draw_header(f: &mut Frame, area: Rect, app: &App) {
    let uptime = app.uptime().as_secs();
    let line = Line::from(vec![
        Span::styled(
            " nvthrottle ",
            Style::default().fg(Color::Black).bg(Color::Green),
        ),
        Span::raw(format!(
            " {} | {:.1}s interval | up {}m{:02}s | cycle {}",
            app.backend(),
            app.interval_secs(),
            uptime / 60,
            uptime % 60,
            app.cycles(),
        )),
    ]);
    f.render_widget(Paragraph::new(line), area);
}

fn draw_footer(f: &mut Frame, area: Rect, app: &App) {
    let mut text = String::from(" q quit | s snapshot");
    if let Some(path) = app.last_export() {
        text.push_str(&format!(" | saved {}", path.display()));
    }
    let line = Line::from(Span::styled(text, Style::default().fg(Color::DarkGray)));
    f.render_widget(Paragraph::new(line), area);
}

// ---------------------------------------------------------------------------
// Device blocks
// ---------------------------------------------------------------------------

fn draw_device(f: &mut Frame, area: Rect, view: &DeviceView) {
    let color = status_color(view);
    let title = format!(" {} ", view.name);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color))
        .title(title);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(inner);

    // Row 1: telemetry numbers, dimmed when showing retained values.
    let reading = display_reading(view);
    let style = if view.stale {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default()
    };
    let mut spans = vec![Span::styled(telemetry_line(reading), style)];
    if view.stale {
        spans.push(Span::styled(
            "  (stale)",
            Style::default().fg(Color::DarkGray),
        ));
    }
    if let Some(badge) = temp_badge(reading) {
        spans.push(Span::raw("  "));
        spans.push(badge);
    }
    f.render_widget(Paragraph::new(Line::from(spans)), rows[0]);

    // Row 2: throttle verdict.
    let summary = view
        .latest
        .as_ref()
        .map(|s| s.classification.summary.clone())
        .unwrap_or_else(|| "waiting for data...".to_string());
    f.render_widget(
        Paragraph::new(Span::styled(summary, Style::default().fg(color))),
        rows[1],
    );

    // Row 3: history strip.
    let strip = history_spans(&view.history, view.history.capacity());
    f.render_widget(Paragraph::new(Line::from(strip)), rows[2]);
}

fn draw_device_compact(f: &mut Frame, area: Rect, view: &DeviceView) {
    let color = status_color(view);
    let reading = display_reading(view);
    let badge = view
        .latest
        .as_ref()
        .and_then(|s| s.classification.causes.first())
        .map(|c| format!(" [{}]", c.badge()))
        .unwrap_or_default();

    let mut spans = vec![
        Span::styled(
            format!("{:<12.12}", view.name),
            Style::default().fg(color),
        ),
        Span::raw(format!(" {}{badge} ", telemetry_line(reading))),
    ];
    spans.extend(history_spans(&view.history, 20));
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

// ---------------------------------------------------------------------------
// Pieces
// ---------------------------------------------------------------------------

/// The reading to show: this cycle's if it has data, otherwise the retained
/// last good one.
fn display_reading(view: &DeviceView) -> &RawReading {
    match &view.latest {
        Some(sample) if sample.reading.has_any() => &sample.reading,
        _ => &view.last_good,
    }
}

fn telemetry_line(r: &RawReading) -> String {
    format!(
        "{} {} {} {}",
        r.power_watts
            .map(|v| format!("{v:>5.0}W"))
            .unwrap_or_else(|| "   --W".to_string()),
        r.sm_clock_mhz
            .map(|v| format!("{v:>4}MHz"))
            .unwrap_or_else(|| "  --MHz".to_string()),
        r.utilization_pct
            .map(|v| format!("{v:>3}%"))
            .unwrap_or_else(|| " --%".to_string()),
        r.temperature_c
            .map(|v| format!("{v:>3}C"))
            .unwrap_or_else(|| " --C".to_string()),
    )
}

/// Temperature badge for hot boards, independent of throttle state.
fn temp_badge(r: &RawReading) -> Option<Span<'static>> {
    let t = r.temperature_c?;
    if t > 80 {
        Some(Span::styled(
            "[OVERHEATING]",
            Style::default()
                .fg(Color::Red)
                .add_modifier(Modifier::BOLD),
        ))
    } else if t > 70 {
        Some(Span::styled("[HOT]", Style::default().fg(Color::Yellow)))
    } else {
        None
    }
}

/// Block color by worst active cause.
fn status_color(view: &DeviceView) -> Color {
    let worst = view
        .latest
        .as_ref()
        .and_then(|s| s.classification.causes.first().copied());
    severity_color(worst)
}

pub(super) fn severity_color(worst: Option<ThrottleCause>) -> Color {
    match worst {
        None => Color::Green,
        Some(ThrottleCause::PowerBrake | ThrottleCause::HwThermal) => Color::Red,
        Some(_) => Color::Yellow,
    }
}

/// Render the throttle history as a fixed-width strip, newest at the right.
/// Cycles not yet observed pad the left as dim dots, so the strip never
/// jumps around while it fills.
pub(super) fn history_spans(history: &HistoryBuffer, width: usize) -> Vec<Span<'static>> {
    let snapshot = history.snapshot();
    let visible = if snapshot.len() > width {
        &snapshot[snapshot.len() - width..]
    } else {
        &snapshot[..]
    };

    let mut spans = Vec::with_capacity(width);
    for _ in 0..width.saturating_sub(visible.len()) {
        spans.push(Span::styled("·", Style::default().fg(Color::DarkGray)));
    }
    for &throttled in visible {
        if throttled {
            spans.push(Span::styled("█", Style::default().fg(Color::Red)));
        } else {
            spans.push(Span::styled("·", Style::default().fg(Color::DarkGray)));
        }
    }
    spans
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_strip_pads_left_while_filling() {
        let mut h = HistoryBuffer::new(40);
        h.push(true);
        h.push(false);
        let spans = history_spans(&h, 10);
        assert_eq!(spans.len(), 10);
        assert_eq!(spans[8].content, "█");
        assert_eq!(spans[9].content, "·");
        // Everything before the observed cycles is padding.
        for span in &spans[..8] {
            assert_eq!(span.content, "·");
        }
    }

    #[test]
    fn history_strip_truncates_to_width() {
        let mut h = HistoryBuffer::new(40);
        for i in 0..40 {
            h.push(i == 39);
        }
        let spans = history_spans(&h, 20);
        assert_eq!(spans.len(), 20);
        assert_eq!(spans[19].content, "█");
    }

    #[test]
    fn severity_colors() {
        assert_eq!(severity_color(None), Color::Green);
        assert_eq!(severity_color(Some(ThrottleCause::PowerBrake)), Color::Red);
        assert_eq!(severity_color(Some(ThrottleCause::HwThermal)), Color::Red);
        assert_eq!(
            severity_color(Some(ThrottleCause::SwThermal)),
            Color::Yellow
        );
        assert_eq!(
            severity_color(Some(ThrottleCause::SwPowerCap)),
            Color::Yellow
        );
    }

    #[test]
    fn temp_badges() {
        let mut r = RawReading::default();
        assert!(temp_badge(&r).is_none());
        r.temperature_c = Some(65);
        assert!(temp_badge(&r).is_none());
        r.temperature_c = Some(75);
        assert_eq!(temp_badge(&r).unwrap().content, "[HOT]");
        r.temperature_c = Some(85);
        assert_eq!(temp_badge(&r).unwrap().content, "[OVERHEATING]");
    }

    #[test]
    fn telemetry_line_shows_gaps_as_dashes() {
        let r = RawReading {
            power_watts: Some(250.0),
            ..Default::default()
        };
        let line = telemetry_line(&r);
        assert!(line.contains("250W"));
        assert!(line.contains("--MHz"));
        assert!(line.contains("--%"));
        assert!(line.contains("--C"));
    }
}
