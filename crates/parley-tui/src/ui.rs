use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
};
use parley_core::{ChatMessage, ChatRole, GateView, Notice};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};
use crate::app::App;

/// Bubbles take at most this share of the log width
const BUBBLE_WIDTH_PERCENT: usize = 75;

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line(text: &str, base: Style) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        if c == '*' && chars.peek() == Some(&'*') {
            chars.next();

            if !current_text.is_empty() {
                spans.push(Span::styled(std::mem::take(&mut current_text), base));
            }

            // Find closing **
            let mut bold_text = String::new();
            let mut found_close = false;
            while let Some(c) = chars.next() {
                if c == '*' && chars.peek() == Some(&'*') {
                    chars.next();
                    found_close = true;
                    break;
                }
                bold_text.push(c);
            }

            if found_close && !bold_text.is_empty() {
                spans.push(Span::styled(bold_text, base.add_modifier(Modifier::BOLD)));
            } else {
                // No closing **, treat as literal
                current_text.push_str("**");
                current_text.push_str(&bold_text);
            }
        } else {
            current_text.push(c);
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::styled(current_text, base));
    }

    Line::from(spans)
}

/// Wrap text to fit within `width` display columns on word boundaries.
/// Blank lines are kept; words wider than the width are split.
fn wrap_text_to_width(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let mut current_line = String::new();
        let mut current_width = 0;

        for word in paragraph.split_whitespace() {
            let mut word = word.to_string();
            let mut word_width = word.width();

            // Hard-split words that can never fit
            while word_width > width {
                if current_width > 0 {
                    lines.push(std::mem::take(&mut current_line));
                    current_width = 0;
                }
                let (head, rest) = split_at_width(&word, width);
                if rest.is_empty() {
                    // A single char wider than the whole line
                    break;
                }
                lines.push(head.to_string());
                word = rest.to_string();
                word_width = word.width();
            }

            if word.is_empty() {
                continue;
            }
            if current_width == 0 {
                current_line = word;
                current_width = word_width;
            } else if current_width + 1 + word_width <= width {
                current_line.push(' ');
                current_line.push_str(&word);
                current_width += 1 + word_width;
            } else {
                lines.push(std::mem::replace(&mut current_line, word));
                current_width = word_width;
            }
        }

        // Blank paragraphs still take a line
        lines.push(current_line);
    }

    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

/// Split `text` after the longest prefix that fits in `width` columns.
/// At least one char goes to the head so a lone wide char still makes progress.
fn split_at_width(text: &str, width: usize) -> (&str, &str) {
    let mut used = 0;
    for (i, c) in text.char_indices() {
        let w = c.width().unwrap_or(0);
        if used + w > width && i > 0 {
            return text.split_at(i);
        }
        used += w;
    }
    (text, "")
}

/// Lay out the conversation as pre-wrapped lines so scrolling can be exact.
fn chat_lines(messages: &[ChatMessage], busy: bool, animation_frame: u8, width: usize) -> Vec<Line<'static>> {
    let bubble_width = (width * BUBBLE_WIDTH_PERCENT / 100).max(10).min(width.max(1));
    let mut lines: Vec<Line<'static>> = Vec::new();

    for msg in messages {
        match msg.role() {
            ChatRole::User => {
                lines.push(
                    Line::from(Span::styled(
                        "You",
                        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                    ))
                    .alignment(Alignment::Right),
                );
                for line in wrap_text_to_width(msg.content(), bubble_width) {
                    lines.push(
                        Line::from(Span::styled(line, Style::default().fg(Color::Cyan)))
                            .alignment(Alignment::Right),
                    );
                }
            }
            ChatRole::Assistant => {
                lines.push(Line::from(Span::styled(
                    "Assistant",
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                )));
                for line in wrap_text_to_width(msg.content(), bubble_width) {
                    lines.push(parse_markdown_line(&line, Style::default()));
                }
            }
        }
        lines.push(Line::default());
    }

    if busy {
        lines.push(Line::from(Span::styled(
            "Assistant",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )));
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat((animation_frame as usize) + 1);
        lines.push(Line::from(Span::styled(
            format!("Thinking{}", dots),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )));
    }

    lines
}

/// A rect of `width` x `height` centered in `area`, shrunk to fit.
fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height);
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    match app.view.clone() {
        GateView::Chat => render_chat(app, frame, body_area),
        GateView::Notice(notice) => render_notice(&notice, frame, body_area),
        GateView::Preparing => render_preparing(app, frame, body_area),
    }

    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(format!(" ◆ {} ", app.title), Style::default().fg(Color::Cyan).bold()),
        Span::styled(app.model.clone(), Style::default().fg(Color::Gray)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let (mode_text, mode_style) = match app.view {
        GateView::Chat if app.is_busy() => (" BUSY ", Style::default().bg(Color::Yellow).fg(Color::Black)),
        GateView::Chat => (" CHAT ", Style::default().bg(Color::Blue).fg(Color::White)),
        GateView::Preparing => (" WAIT ", Style::default().bg(Color::Magenta).fg(Color::White)),
        GateView::Notice(_) => (" OFF ", Style::default().bg(Color::Red).fg(Color::White)),
    };

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::raw(" ")];
    let hints: &[(&str, &str)] = match app.view {
        GateView::Chat => &[(" Enter ", " send "), (" PgUp/PgDn ", " scroll "), (" Esc ", " quit ")],
        _ => &[(" r ", " retry "), (" q ", " quit ")],
    };
    for (key, label) in hints {
        spans.push(Span::styled(*key, key_style));
        spans.push(Span::styled(*label, label_style));
        spans.push(Span::raw(" "));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    let [log_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .areas(area);

    let busy = app.is_busy();
    let inner_width = log_area.width.saturating_sub(2) as usize;
    let inner_height = log_area.height.saturating_sub(2);

    let lines = match app.session.as_ref() {
        Some(session) if !session.messages().is_empty() || busy => {
            chat_lines(session.messages(), busy, app.animation_frame, inner_width)
        }
        _ => vec![Line::from(Span::styled(
            "Ask a question to get started...",
            Style::default().fg(Color::DarkGray),
        ))],
    };

    // Store dimensions for scroll calculations
    let total_lines = u16::try_from(lines.len()).unwrap_or(u16::MAX);
    app.chat_height = inner_height;
    app.max_chat_scroll = total_lines.saturating_sub(inner_height);
    app.chat_scroll = if app.follow_tail {
        app.max_chat_scroll
    } else {
        app.chat_scroll.min(app.max_chat_scroll)
    };

    let mut log_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    if !app.follow_tail {
        log_block = log_block.title_bottom(Line::from(" ↓ PgDn for newer ").alignment(Alignment::Right));
    }

    let log = Paragraph::new(Text::from(lines))
        .block(log_block)
        .scroll((app.chat_scroll, 0));
    frame.render_widget(log, log_area);

    render_input(app, frame, input_area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let busy = app.is_busy();
    let (draft, cursor_pos) = app
        .session
        .as_ref()
        .map(|s| (s.draft(), s.cursor()))
        .unwrap_or(("", 0));

    let (border_color, title) = if busy {
        (Color::DarkGray, " Thinking... ")
    } else {
        (Color::Yellow, " Message (Enter to send) ")
    };
    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Calculate visible portion of input with horizontal scrolling, in columns
    let inner_width = area.width.saturating_sub(2) as usize;
    let (scroll_offset, cursor_x) = input_window(draft, cursor_pos, inner_width);

    let input = if draft.is_empty() && !busy {
        Paragraph::new(Span::styled(
            "Ask me anything...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let mut used = 0;
        let visible_text: String = draft
            .chars()
            .skip(scroll_offset)
            .take_while(|c| {
                used += c.width().unwrap_or(0);
                used <= inner_width
            })
            .collect();
        let fg = if busy { Color::DarkGray } else { Color::Cyan };
        Paragraph::new(visible_text).style(Style::default().fg(fg))
    };
    frame.render_widget(input.block(input_block), area);

    // Input is disabled while a request is in flight
    if !busy {
        frame.set_cursor_position((area.x + cursor_x as u16 + 1, area.y + 1));
    }
}

/// First visible char and the cursor column for a single-line input `width` columns wide.
/// Scrolls just enough that the cursor (and the cell it sits on) stays in view.
fn input_window(draft: &str, cursor: usize, width: usize) -> (usize, usize) {
    let widths: Vec<usize> = draft.chars().map(|c| c.width().unwrap_or(0)).collect();
    let cursor = cursor.min(widths.len());
    let cursor_cell = widths.get(cursor).copied().unwrap_or(1).max(1);

    let mut offset = 0;
    let mut before: usize = widths[..cursor].iter().sum();
    while offset < cursor && before + cursor_cell > width {
        before -= widths[offset];
        offset += 1;
    }
    (offset, before)
}

fn render_notice(notice: &Notice, frame: &mut Frame, area: Rect) {
    let panel = centered_rect(60, 9, area);

    let text = vec![
        Line::from(Span::styled(notice.icon, Style::default().fg(Color::Gray).bold())),
        Line::default(),
        Line::from(Span::styled(notice.title, Style::default().add_modifier(Modifier::BOLD))),
        Line::default(),
        Line::from(Span::styled(notice.message.clone(), Style::default().fg(Color::Gray))),
    ];

    let paragraph = Paragraph::new(text)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray)),
        );
    frame.render_widget(paragraph, panel);
}

fn render_preparing(app: &App, frame: &mut Frame, area: Rect) {
    let panel = centered_rect(60, 10, area);
    let dots = ".".repeat((app.animation_frame as usize) + 1);

    let text = vec![
        Line::from(Span::styled(
            format!("Preparing Model{:<3}", dots),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::default(),
        Line::from(Span::styled(
            "The model is downloading or being prepared. Please wait.",
            Style::default().fg(Color::Gray),
        )),
        Line::default(),
        Line::from(vec![
            Span::styled("If it never finishes, run ", Style::default().fg(Color::DarkGray)),
            Span::styled(format!("ollama pull {}", app.model), Style::default().fg(Color::Cyan)),
        ]),
    ];

    let paragraph = Paragraph::new(text)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Magenta)),
        );
    frame.render_widget(paragraph, panel);
}
