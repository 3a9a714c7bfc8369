use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Block, BorderType, Borders, Cell, Clear, Gauge, Padding, Paragraph, Row, Table, TableState,
    Wrap,
};

use super::super::playlist::Video;
use super::super::schedule::{
    EpochMs, INTERVAL_LADDER_DAYS, format_due_display, format_position, format_timestamp,
    interval_days,
};
use super::super::selector::{any_needs_review, due_count, is_due};
use super::super::truncate;
use super::{PendingDelete, PlayerView};

const ACCENT: Color = Color::Rgb(255, 120, 110);
const MUTED: Color = Color::Rgb(185, 195, 210);

pub(super) struct Screen<'a> {
    pub(super) list: &'a [Video],
    pub(super) rows: &'a [Video],
    pub(super) player: &'a PlayerView,
    pub(super) status: &'a str,
    pub(super) pending_delete: Option<&'a PendingDelete>,
    /// Saved resume position of the selected video, zero when none.
    pub(super) resume_seconds: u32,
    pub(super) now: EpochMs,
}

pub(super) fn draw_tui(frame: &mut Frame, screen: &Screen<'_>, table_state: &mut TableState) {
    let bg = Block::default().style(Style::default().bg(Color::Black));
    frame.render_widget(bg, frame.area());

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(frame.area());

    frame.render_widget(header(screen), chunks[0]);

    let body_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(64), Constraint::Percentage(36)])
        .split(chunks[1]);
    let details_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(8), Constraint::Length(3)])
        .split(body_chunks[1]);

    let rows: Vec<Row> = screen
        .rows
        .iter()
        .map(|video| {
            let (state, style) = row_state(video, screen.player, screen.now);
            Row::new(vec![
                Cell::from(video.title.clone()),
                Cell::from(video.review_count.to_string()),
                Cell::from(format_due_display(video.next_review, screen.now)),
                Cell::from(state).style(style),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Percentage(46),
            Constraint::Length(8),
            Constraint::Length(33),
            Constraint::Length(9),
        ],
    )
    .header(
        Row::new(vec!["Title", "Reviews", "Next Review", "State"]).style(
            Style::default()
                .fg(ACCENT)
                .add_modifier(Modifier::BOLD),
        ),
    )
    .block(panel_block("Playlist"))
    .row_highlight_style(
        Style::default()
            .bg(ACCENT)
            .fg(Color::Black)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("▸ ");
    frame.render_stateful_widget(table, body_chunks[0], table_state);

    let selected = table_state
        .selected()
        .and_then(|idx| screen.rows.get(idx));
    let selection_text = match selected {
        Some(video) => {
            let mut text = format!(
                "Title\n{}\n\nVideo ID\n{}\n\nUrl\n{}\n\nNext Review\n{}\n\nAdded\n{}",
                truncate(&video.title, 40),
                truncate(&video.external_media_id, 28),
                truncate(&video.url, 40),
                format_due_display(video.next_review, screen.now),
                format_timestamp(video.created_at).unwrap_or_else(|| "-".to_string()),
            );
            if screen.resume_seconds > 0 {
                text.push_str(&format!(
                    "\n\nResume At\n{}",
                    format_position(screen.resume_seconds)
                ));
            }
            text
        }
        None => "No videos yet.\n\nRun `looptube add <URL>` to add one.".to_string(),
    };
    let selection = Paragraph::new(selection_text)
        .style(Style::default().fg(Color::Rgb(230, 230, 230)))
        .block(panel_block("Selected"))
        .alignment(Alignment::Left);
    frame.render_widget(selection, details_chunks[0]);

    if let Some(video) = selected {
        let (ratio, label) = interval_gauge(video.review_count);
        let progress = Gauge::default()
            .block(panel_block("Interval"))
            .gauge_style(
                Style::default()
                    .fg(Color::Rgb(255, 160, 150))
                    .bg(Color::Black)
                    .add_modifier(Modifier::BOLD),
            )
            .label(label)
            .ratio(ratio);
        frame.render_widget(progress, details_chunks[1]);
    }

    let controls = Paragraph::new(controls_line())
        .alignment(Alignment::Center)
        .block(panel_block("Controls"));
    frame.render_widget(controls, chunks[2]);

    let status_widget = Paragraph::new(screen.status.to_string())
        .style(status_style(screen.status))
        .block(panel_block("Status"));
    frame.render_widget(status_widget, chunks[3]);

    if let Some(confirm) = screen.pending_delete {
        let popup_text = format!(
            "Remove from playlist?\n\n{}\n\nYou can bring it back with u (undo).\n\n[y / Enter] Remove   [n / Esc] Cancel",
            truncate(&confirm.title, 56)
        );
        let popup_area = popup_rect_for_text(frame.area(), &popup_text);
        render_popup_shadow(frame, popup_area);
        frame.render_widget(Clear, popup_area);
        let popup = Paragraph::new(popup_text)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(modal_block("Confirm Remove"));
        frame.render_widget(popup, popup_area);
    }
}

fn header(screen: &Screen<'_>) -> Paragraph<'static> {
    let due = due_count(screen.list, screen.now);
    let review_text = if any_needs_review(screen.list, screen.now) {
        Span::styled(format!("{due} due"), Style::default().fg(Color::Yellow))
    } else {
        Span::styled("all caught up", Style::default().fg(Color::Green))
    };
    let mut player_text = format!("player: {}", screen.player.phase.label());
    if let Some(title) = screen.player.playing_title.as_deref() {
        let verb = if screen.player.paused {
            "paused"
        } else {
            "playing"
        };
        player_text.push_str(&format!("  {verb} {}", truncate(title, 32)));
    }

    Paragraph::new(Line::from(vec![
        Span::styled(
            "LOOPTUBE",
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        ),
        Span::styled("   ", Style::default()),
        Span::styled(
            format!("{} videos", screen.list.len()),
            Style::default().fg(MUTED),
        ),
        Span::styled("   ", Style::default()),
        review_text,
        Span::styled("   ", Style::default()),
        Span::styled(player_text, Style::default().fg(MUTED)),
    ]))
    .alignment(Alignment::Center)
    .block(panel_block("Dashboard"))
}

fn row_state(video: &Video, player: &PlayerView, now: EpochMs) -> (&'static str, Style) {
    if player.playing_id.as_deref() == Some(video.id.as_str()) {
        let label = if player.paused { "paused" } else { "playing" };
        return (label, Style::default().fg(ACCENT).add_modifier(Modifier::BOLD));
    }
    if is_due(video, now) {
        return ("due", Style::default().fg(Color::Yellow));
    }
    ("waiting", Style::default().fg(MUTED))
}

/// Position on the interval ladder for a record reviewed `review_count` times.
pub(crate) fn interval_gauge(review_count: u32) -> (f64, String) {
    let rungs = INTERVAL_LADDER_DAYS.len();
    let reached = usize::try_from(review_count).map_or(rungs, |count| count.min(rungs));
    let ratio = reached as f64 / rungs as f64;
    let days = interval_days(review_count);
    let unit = if days == 1 { "day" } else { "days" };
    (ratio, format!("{reached}/{rungs} · next gap {days} {unit}"))
}

fn panel_block(title: &'static str) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::Rgb(125, 135, 150)))
        .title(title)
}

fn modal_block(title: &'static str) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(
            Style::default()
                .fg(Color::Rgb(235, 170, 160))
                .add_modifier(Modifier::BOLD),
        )
        .title(title)
        .padding(Padding::new(2, 2, 1, 1))
}

fn key_hint(key: &'static str, label: &'static str) -> [Span<'static>; 2] {
    [
        Span::styled(
            format!(" {key} "),
            Style::default()
                .bg(Color::Rgb(72, 82, 96))
                .fg(Color::Rgb(230, 235, 242))
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(format!(" {label}  "), Style::default().fg(MUTED)),
    ]
}

fn controls_line() -> Line<'static> {
    let hints = [
        ("Enter", "play"),
        ("n", "next due"),
        ("space", "pause"),
        ("s", "stop"),
        ("r", "reviewed"),
        ("x", "reset"),
        ("d", "remove"),
        ("u/U", "undo/redo"),
        ("q", "quit"),
    ];
    Line::from(
        hints
            .into_iter()
            .flat_map(|(key, label)| key_hint(key, label))
            .collect::<Vec<_>>(),
    )
}

fn status_style(status: &str) -> Style {
    if status.starts_with("ERROR:") {
        Style::default()
            .fg(Color::Rgb(255, 145, 120))
            .add_modifier(Modifier::BOLD)
    } else if status.starts_with("INFO:") {
        Style::default().fg(Color::Rgb(205, 165, 255))
    } else {
        Style::default().fg(Color::Rgb(230, 235, 242))
    }
}

fn centered_fixed_rect(width: u16, height: u16, area: Rect) -> Rect {
    let clamped_width = width.min(area.width.max(1));
    let clamped_height = height.min(area.height.max(1));
    let x = area.x + area.width.saturating_sub(clamped_width) / 2;
    let y = area.y + area.height.saturating_sub(clamped_height) / 2;
    Rect::new(x, y, clamped_width, clamped_height)
}

fn render_popup_shadow(frame: &mut Frame, popup_area: Rect) {
    let area = frame.area();
    let shadow = Rect::new(
        (popup_area.x + 1).min(area.x + area.width.saturating_sub(1)),
        (popup_area.y + 1).min(area.y + area.height.saturating_sub(1)),
        popup_area.width.saturating_sub(1),
        popup_area.height.saturating_sub(1),
    );
    if shadow.width == 0 || shadow.height == 0 {
        return;
    }
    let shadow_block = Block::default().style(Style::default().bg(Color::Rgb(14, 16, 24)));
    frame.render_widget(shadow_block, shadow);
}

fn popup_rect_for_text(area: Rect, text: &str) -> Rect {
    let widest = text
        .lines()
        .map(|line| line.chars().count() as u16)
        .max()
        .unwrap_or(0);
    let line_count = text.lines().count() as u16;

    let available_width = area.width.saturating_sub(2).max(1);
    let width = widest
        .saturating_add(12)
        .clamp(48.min(available_width), 72.min(available_width));

    let available_height = area.height.saturating_sub(2).max(1);
    let height = line_count
        .saturating_add(6)
        .clamp(10.min(available_height), 18.min(available_height));

    centered_fixed_rect(width, height, area)
}
