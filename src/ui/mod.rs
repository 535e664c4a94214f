use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Frame;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

use crate::app::state::{AppState, FocusPane, OverlayState, Register};
use crate::config::themes::Palette;
use crate::config::ThemeName;
use crate::highlight::build_match_regex;

pub fn draw_app(
    frame: &mut Frame,
    theme: &ThemeName,
    state: &AppState,
    list_state: &mut ListState,
) {
    let palette = theme.palette();

    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(4)])
        .split(frame.size());

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(vertical[0]);

    draw_register_list(frame, columns[0], state, list_state, &palette);
    draw_reader(frame, columns[1], state, &palette);
    draw_footer(frame, vertical[1], state, &palette);

    match state.overlay() {
        Some(OverlayState::ConfirmDelete(_)) => draw_confirm_delete(frame, state, &palette),
        Some(OverlayState::AssignPerson(_)) => draw_assign_overlay(frame, state, &palette),
        None => {}
    }
}

fn draw_register_list(
    frame: &mut Frame,
    area: Rect,
    state: &AppState,
    list_state: &mut ListState,
    palette: &Palette,
) {
    let block_style = if matches!(state.focus, FocusPane::List) {
        Style::default().fg(palette.focus_border)
    } else {
        Style::default()
    };

    let highlight_regex = build_match_regex(&state.search.query);
    let highlight_style = Style::default()
        .fg(palette.highlight)
        .add_modifier(Modifier::BOLD);

    let mut items = Vec::with_capacity(state.len());
    for row in state.rows() {
        let mut title_spans = vec![status_glyph(&row.status)];
        title_spans.extend(highlight_line(
            &row.title,
            highlight_regex.as_ref(),
            highlight_style,
            Style::default().add_modifier(Modifier::BOLD),
        ));

        let mut lines = vec![
            Line::from(title_spans),
            Line::from(Span::styled(
                row.meta.clone(),
                Style::default().fg(palette.muted),
            )),
        ];
        if state.preview_lines > 0 && !row.preview.is_empty() {
            let preview = truncate_to_width(&row.preview, area.width.saturating_sub(4) as usize);
            lines.push(Line::from(highlight_line(
                &preview,
                highlight_regex.as_ref(),
                highlight_style,
                Style::default(),
            )));
        }
        items.push(ListItem::new(lines));
    }
    if items.is_empty() {
        let hint = if state.total_rows() == 0 {
            match state.register {
                Register::Policies => "No policies yet. Create one with `complytui policy add`.",
                Register::Tasks => "No tasks yet. Create one with `complytui task add`.",
                Register::Vendors => "No vendors yet. Create one with `complytui vendor add`.",
                Register::People => "No people yet. Add one with `complytui people add`.",
            }
        } else {
            "Nothing matches the current search and filters."
        };
        items.push(ListItem::new(hint));
    }

    let title = format!(
        "{} — {}/{}",
        state.register.title(),
        state.len(),
        state.total_rows()
    );
    let list = List::new(items)
        .block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(block_style),
        )
        .highlight_style(
            Style::default()
                .bg(palette.selection_bg)
                .fg(palette.selection_fg)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▸ ");
    frame.render_stateful_widget(list, area, list_state);
}

fn draw_reader(frame: &mut Frame, area: Rect, state: &AppState, palette: &Palette) {
    let block_style = if matches!(state.focus, FocusPane::Reader) {
        Style::default().fg(palette.focus_border)
    } else {
        Style::default()
    };

    let text: Text = state
        .selected()
        .map(|row| {
            let mut lines = vec![
                Line::from(vec![
                    status_glyph(&row.status),
                    Span::styled(
                        row.title.clone(),
                        Style::default().add_modifier(Modifier::BOLD),
                    ),
                ]),
                Line::from(Span::styled(
                    row.meta.clone(),
                    Style::default().fg(palette.muted),
                )),
                Line::from(""),
            ];
            if row.detail.is_empty() {
                lines.push(Line::from(Span::styled(
                    "No further detail.",
                    Style::default().fg(palette.muted),
                )));
            } else {
                for line in row.detail.lines() {
                    lines.push(Line::from(line.to_string()));
                }
            }
            Text::from(lines)
        })
        .unwrap_or_else(|| Text::from("Nothing selected."));

    let paragraph = Paragraph::new(text)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .title("Detail")
                .borders(Borders::ALL)
                .border_style(block_style),
        );
    frame.render_widget(paragraph, area);
}

fn draw_footer(frame: &mut Frame, area: Rect, state: &AppState, palette: &Palette) {
    let search_line = if state.search.active {
        Line::from(vec![
            Span::styled("/", Style::default().fg(palette.highlight)),
            Span::raw(state.search.query.clone()),
            Span::styled("▏", Style::default().fg(palette.highlight)),
        ])
    } else if !state.search.query.is_empty() {
        Line::from(vec![
            Span::styled("filter: ", Style::default().fg(palette.muted)),
            Span::raw(state.search.query.clone()),
            Span::styled("  (/ to edit, Esc clears)", Style::default().fg(palette.muted)),
        ])
    } else if let Some(message) = &state.status_message {
        Line::from(Span::raw(message.clone()))
    } else {
        Line::from(Span::styled(
            "1-4 registers • / search • f filter • s sort • x toggle task • a assign • q quit",
            Style::default().fg(palette.muted),
        ))
    };

    let context_line = Line::from(Span::styled(
        format!(
            "status: {} • sort: {}",
            state.status_filter,
            state.sort.label()
        ),
        Style::default().fg(palette.muted),
    ));

    let paragraph = Paragraph::new(Text::from(vec![search_line, context_line]))
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(paragraph, area);
}

fn draw_confirm_delete(frame: &mut Frame, state: &AppState, palette: &Palette) {
    let Some(overlay) = state.confirm_delete_overlay() else {
        return;
    };
    let area = centered_rect(frame.size(), 50, 20);
    frame.render_widget(Clear, area);

    let lines = vec![
        Line::from(Span::styled(
            format!("Delete policy '{}'?", overlay.name),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(Span::styled(
            "Enter confirms, Esc cancels.",
            Style::default().fg(palette.muted),
        )),
    ];
    let paragraph = Paragraph::new(Text::from(lines))
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .title("Confirm delete")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Red)),
        );
    frame.render_widget(paragraph, area);
}

fn draw_assign_overlay(frame: &mut Frame, state: &AppState, palette: &Palette) {
    let Some(overlay) = state.assign_overlay() else {
        return;
    };
    let area = centered_rect(frame.size(), 60, 60);
    frame.render_widget(Clear, area);

    let mut lines = vec![
        Line::from(vec![
            Span::styled("Search: ", Style::default().fg(palette.muted)),
            Span::raw(overlay.search.clone()),
            Span::styled("▏", Style::default().fg(palette.highlight)),
        ]),
        Line::from(""),
    ];

    let visible = overlay.visible_people();
    if visible.is_empty() {
        lines.push(Line::from(Span::styled(
            "No people found.",
            Style::default().fg(palette.muted),
        )));
    }
    for (idx, person) in visible.iter().enumerate() {
        let style = if idx == overlay.selected {
            Style::default()
                .bg(palette.selection_bg)
                .fg(palette.selection_fg)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        lines.push(Line::from(Span::styled(
            format!("{}  <{}>", person.full_name, person.primary_email),
            style,
        )));
    }

    let paragraph = Paragraph::new(Text::from(lines)).block(
        Block::default()
            .title(format!("Assign '{}'", overlay.task_name))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(palette.focus_border)),
    );
    frame.render_widget(paragraph, area);
}

fn status_glyph(status: &str) -> Span<'static> {
    let (glyph, color) = match status {
        "" => return Span::raw(""),
        "DONE" | "IMPLEMENTED" | "ACTIVE" | "VALID" => ("● ", Color::Green),
        "IN_PROGRESS" => ("◐ ", Color::Blue),
        "NOT_APPLICABLE" => ("○ ", Color::Magenta),
        "INVALID" | "EXPIRED" => ("● ", Color::Red),
        "DRAFT" | "TODO" => ("○ ", Color::Yellow),
        _ => ("○ ", Color::Gray),
    };
    Span::styled(glyph, Style::default().fg(color))
}

fn highlight_line(
    text: &str,
    regex: Option<&Regex>,
    highlight_style: Style,
    base_style: Style,
) -> Vec<Span<'static>> {
    let Some(regex) = regex else {
        return vec![Span::styled(text.to_string(), base_style)];
    };

    let mut spans = Vec::new();
    let mut cursor = 0usize;
    for hit in regex.find_iter(text) {
        if hit.start() > cursor {
            spans.push(Span::styled(text[cursor..hit.start()].to_string(), base_style));
        }
        spans.push(Span::styled(hit.as_str().to_string(), highlight_style));
        cursor = hit.end();
    }
    if cursor < text.len() {
        spans.push(Span::styled(text[cursor..].to_string(), base_style));
    }
    if spans.is_empty() {
        spans.push(Span::styled(text.to_string(), base_style));
    }
    spans
}

/// Cuts `text` to at most `max` terminal columns on a grapheme boundary,
/// appending an ellipsis when something was dropped.
fn truncate_to_width(text: &str, max: usize) -> String {
    if max == 0 || text.width() <= max {
        return text.to_string();
    }
    let budget = max.saturating_sub(1);
    let mut width = 0usize;
    let mut out = String::new();
    for grapheme in text.graphemes(true) {
        let grapheme_width = grapheme.width();
        if width + grapheme_width > budget {
            break;
        }
        width += grapheme_width;
        out.push_str(grapheme);
    }
    out.push('…');
    out
}

fn centered_rect(area: Rect, percent_x: u16, percent_y: u16) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1]);
    horizontal[1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_column_budget() {
        assert_eq!(truncate_to_width("short", 10), "short");
        let cut = truncate_to_width("a rather long register title", 10);
        assert!(cut.ends_with('…'));
        assert!(cut.width() <= 10);
    }

    #[test]
    fn highlight_splits_around_matches() {
        let regex = build_match_regex("policy").expect("regex");
        let spans = highlight_line(
            "Access Policy Review",
            Some(&regex),
            Style::default(),
            Style::default(),
        );
        let pieces: Vec<_> = spans.iter().map(|span| span.content.as_ref()).collect();
        assert_eq!(pieces, vec!["Access ", "Policy", " Review"]);
    }

    #[test]
    fn glyphs_cover_every_register_status() {
        for status in ["DONE", "TODO", "ACTIVE", "DRAFT", "IN_PROGRESS", "EXPIRED"] {
            assert!(!status_glyph(status).content.is_empty(), "status {status}");
        }
        assert!(status_glyph("").content.is_empty());
    }
}
