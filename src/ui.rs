use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};
use ollama_chat::{KeyValueStore, RequestState, Role, Theme};
use crate::app::{App, InputMode, TextInput};

/// Colors for one theme
struct Palette {
    bg: Color,
    fg: Color,
    muted: Color,
    user: Color,
    assistant: Color,
    accent: Color,
    bar_bg: Color,
    bar_fg: Color,
}

impl Palette {
    fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Light => Self {
                bg: Color::White,
                fg: Color::Black,
                muted: Color::Gray,
                user: Color::Blue,
                assistant: Color::Magenta,
                accent: Color::Blue,
                bar_bg: Color::Gray,
                bar_fg: Color::Black,
            },
            Theme::Dark => Self {
                bg: Color::Black,
                fg: Color::White,
                muted: Color::DarkGray,
                user: Color::Cyan,
                assistant: Color::Yellow,
                accent: Color::Cyan,
                bar_bg: Color::DarkGray,
                bar_fg: Color::White,
            },
        }
    }
}

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("**") {
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("**") else {
            break;
        };
        if close == 0 {
            // "****" is not bold text
            spans.push(Span::raw(rest[..open + 4].to_string()));
            rest = &after_open[2..];
            continue;
        }
        if open > 0 {
            spans.push(Span::raw(rest[..open].to_string()));
        }
        spans.push(Span::styled(
            after_open[..close].to_string(),
            Style::default().add_modifier(Modifier::BOLD),
        ));
        rest = &after_open[close + 2..];
    }

    if !rest.is_empty() {
        spans.push(Span::raw(rest.to_string()));
    }

    Line::from(spans)
}

pub fn render<S: KeyValueStore>(app: &mut App<S>, frame: &mut Frame) {
    let palette = Palette::for_theme(app.theme);
    let area = frame.area();

    frame.render_widget(
        Block::default().style(Style::default().bg(palette.bg).fg(palette.fg)),
        area,
    );

    // Main layout: header, chat, notice, input, footer
    let notice_height = if app.notice.is_some() { 1 } else { 0 };
    let [header_area, chat_area, notice_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(notice_height),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, &palette, frame, header_area);
    render_chat(app, &palette, frame, chat_area);
    if let Some(notice) = &app.notice {
        frame.render_widget(
            Paragraph::new(format!(" {}", notice)).style(Style::default().fg(Color::Red)),
            notice_area,
        );
    }
    render_input(app, &palette, frame, input_area);
    render_footer(app, &palette, frame, footer_area);

    // Popups
    if app.show_model_picker {
        render_model_picker(app, &palette, frame, area);
    } else if app.input_mode == InputMode::SystemPrompt {
        render_system_prompt(app, &palette, frame, area);
    }
}

fn render_header<S: KeyValueStore>(app: &App<S>, palette: &Palette, frame: &mut Frame, area: Rect) {
    let model = app.session.model().unwrap_or("no model");
    let prompt_indicator = if app.session.system_prompt().trim().is_empty() {
        String::new()
    } else {
        " [system prompt]".to_string()
    };

    let title = Line::from(vec![
        Span::styled(" Ollama Chat ", Style::default().fg(palette.accent).bold()),
        Span::styled(format!(" {} ", model), Style::default().fg(palette.bar_fg)),
        Span::styled(prompt_indicator, Style::default().fg(palette.bar_fg)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(palette.bar_fg),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(palette.bar_bg));
    frame.render_widget(header, area);
}

fn role_line(label: &'static str, color: Color) -> Line<'static> {
    Line::from(Span::styled(
        label,
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    ))
}

fn render_chat<S: KeyValueStore>(app: &mut App<S>, palette: &Palette, frame: &mut Frame, area: Rect) {
    // Store chat area dimensions for scroll calculations (inner size minus borders)
    app.chat_area = Some(area);
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);
    if app.follow_output {
        app.scroll_chat_to_bottom();
    }

    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(palette.muted));

    let session = &app.session;
    let chat_text = if session.conversation().is_empty() && !session.is_generating() {
        Text::from(Span::styled(
            "Ask the model anything...",
            Style::default().fg(palette.muted),
        ))
    } else {
        let mut lines: Vec<Line> = Vec::new();

        for msg in session.conversation() {
            match msg.role {
                Role::User => {
                    lines.push(role_line("You:", palette.user));
                    lines.extend(msg.text.lines().map(|l| Line::from(l.to_string())));
                }
                Role::Assistant | Role::System => {
                    lines.push(role_line("AI:", palette.assistant));
                    lines.extend(msg.text.lines().map(parse_markdown_line));
                }
            }
            lines.push(Line::default());
        }

        if session.is_generating() {
            lines.push(role_line("AI:", palette.assistant));
            match session.streaming_text() {
                Some(text) if !text.is_empty() => {
                    lines.extend(text.lines().map(parse_markdown_line));
                }
                _ => {
                    // Animated ellipsis: cycles through ".", "..", "..."
                    let dots = ".".repeat((app.animation_frame as usize) + 1);
                    lines.push(Line::from(Span::styled(
                        format!("Thinking{}", dots),
                        Style::default().fg(palette.muted).add_modifier(Modifier::ITALIC),
                    )));
                }
            }
        }

        Text::from(lines)
    };

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

/// The part of `input` that fits in `width` columns with the cursor visible,
/// and the cursor column within it.
fn visible_input(input: &TextInput, width: usize) -> (String, u16) {
    let scroll_offset = if width == 0 || input.cursor < width {
        0
    } else {
        input.cursor - width + 1
    };

    let visible: String = input.text.chars().skip(scroll_offset).take(width).collect();
    (visible, (input.cursor - scroll_offset) as u16)
}

fn render_input<S: KeyValueStore>(app: &App<S>, palette: &Palette, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing;
    let border_color = if editing { palette.accent } else { palette.muted };

    let title = if app.session.is_generating() {
        " Message (Enter sends and stops the current reply) "
    } else {
        " Message "
    };
    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Inner width = total width - 2 (for borders)
    let (visible_text, cursor_x) = visible_input(&app.input, area.width.saturating_sub(2) as usize);

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(palette.user))
        .block(input_block);

    frame.render_widget(input, area);

    if editing && !app.show_model_picker {
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_footer<S: KeyValueStore>(app: &App<S>, palette: &Palette, frame: &mut Frame, area: Rect) {
    let (mode_text, mode_style) = match app.input_mode {
        InputMode::Normal => (" NORMAL ", Style::default().bg(Color::Blue).fg(Color::White)),
        InputMode::Editing => (" INSERT ", Style::default().bg(Color::Yellow).fg(Color::Black)),
        InputMode::SystemPrompt => (" SYSTEM ", Style::default().bg(Color::Magenta).fg(Color::White)),
    };

    // Key style: dark background with bright text for visibility on both themes
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(palette.bar_bg).fg(palette.bar_fg);

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::raw(" ")];

    let state = match app.session.state() {
        RequestState::Requesting => Some(" waiting "),
        RequestState::Streaming => Some(" streaming "),
        RequestState::Cancelled => Some(" stopped "),
        RequestState::Failed => Some(" failed "),
        RequestState::Idle | RequestState::Completed => None,
    };
    if let Some(state) = state {
        spans.push(Span::styled(state, Style::default().fg(palette.accent).italic()));
        spans.push(Span::raw(" "));
    }

    let hints: &[(&str, &str)] = match app.input_mode {
        InputMode::Editing if app.session.is_generating() => {
            &[(" Enter ", " send "), (" Esc ", " normal mode ")]
        }
        InputMode::Editing => &[(" Enter ", " send "), (" Esc ", " normal mode "), (" Ctrl-C ", " quit ")],
        InputMode::SystemPrompt => &[(" Enter ", " save "), (" Esc ", " cancel ")],
        InputMode::Normal if app.session.is_generating() => &[
            (" s ", " stop "),
            (" j/k ", " scroll "),
            (" i ", " type "),
            (" q ", " quit "),
        ],
        InputMode::Normal => &[
            (" i ", " type "),
            (" j/k ", " scroll "),
            (" m ", " model "),
            (" p ", " system prompt "),
            (" t ", " theme "),
            (" C ", " clear "),
            (" q ", " quit "),
        ],
    };
    for (key, label) in hints {
        spans.push(Span::styled(*key, key_style));
        spans.push(Span::styled(*label, label_style));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)).style(label_style), area);
}

fn centered_popup(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height.saturating_sub(4));
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}

fn render_model_picker<S: KeyValueStore>(app: &mut App<S>, palette: &Palette, frame: &mut Frame, area: Rect) {
    let popup_area = centered_popup(area, 50, app.available_models.len() as u16 + 2);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(palette.accent))
        .style(Style::default().bg(palette.bg).fg(palette.fg))
        .title(" Select Model (Enter to select, Esc to cancel) ");

    let selected = app.session.model();
    let items: Vec<ListItem> = app
        .available_models
        .iter()
        .map(|model| {
            let style = if Some(model.as_str()) == selected {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!(" {} ", model)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, popup_area, &mut app.model_picker_state);
}

fn render_system_prompt<S: KeyValueStore>(app: &App<S>, palette: &Palette, frame: &mut Frame, area: Rect) {
    let popup_area = centered_popup(area, 70, 7);

    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta))
        .style(Style::default().bg(palette.bg).fg(palette.fg))
        .title(" System Prompt ");

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let instructions = Paragraph::new("Sent before the conversation with every request. Enter to save, Esc to cancel.")
        .style(Style::default().fg(palette.muted))
        .wrap(Wrap { trim: true });
    frame.render_widget(instructions, Rect::new(inner.x, inner.y, inner.width, 2.min(inner.height)));

    if inner.height < 4 {
        return;
    }
    let input_area = Rect::new(inner.x, inner.y + 3, inner.width, 1);
    let (visible_text, cursor_x) = visible_input(&app.system_prompt_input, input_area.width as usize);
    frame.render_widget(
        Paragraph::new(visible_text).style(Style::default().fg(palette.accent)),
        input_area,
    );
    frame.set_cursor_position((input_area.x + cursor_x, input_area.y));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(line: &Line) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn test_markdown_bold() {
        let line = parse_markdown_line("a **b** c");
        assert_eq!(line.spans.len(), 3);
        assert_eq!(line.spans[1].content, "b");
        assert!(line.spans[1].style.add_modifier.contains(Modifier::BOLD));
        assert_eq!(plain(&line), "a b c");
    }

    #[test]
    fn test_markdown_unclosed_bold_is_literal() {
        let line = parse_markdown_line("2 ** 3 is 8");
        assert_eq!(plain(&line), "2 ** 3 is 8");
    }

    #[test]
    fn test_visible_input_scrolls_with_cursor() {
        let input = TextInput::with_text("abcdefgh");
        let (text, cursor) = visible_input(&input, 5);
        assert_eq!(text, "efgh");
        assert_eq!(cursor, 4);

        let mut input = input;
        input.home();
        let (text, cursor) = visible_input(&input, 5);
        assert_eq!(text, "abcde");
        assert_eq!(cursor, 0);
    }
}
