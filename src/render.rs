//! Frame planning and painting.
//!
//! [`plan`] turns engine state into an ordered list of [`Draw`]
//! instructions; [`paint`] writes them into a ratatui buffer. Styles come
//! from a fixed table keyed by `(Role, selected)`.

use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Span;
use ratatui::widgets::{Block, Borders, Widget};
use tracing::trace;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::flatten::LineKind;
use crate::layout::{self, Layout};
use crate::model::{self, Post};
use crate::state::{Engine, Fetch, Pane, View, POST_ENTRY_ROWS};

const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_STATUS_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_LINK: Color = Color::Rgb(137, 220, 235);
const COLOR_TEXT_POST: Color = Color::Rgb(166, 227, 161);
const COLOR_STICKY: Color = Color::Rgb(249, 226, 175);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);
const COMMENT_DEPTH_COLORS: [Color; 6] = [
    Color::Rgb(250, 179, 135),
    Color::Rgb(166, 227, 161),
    Color::Rgb(203, 166, 247),
    Color::Rgb(245, 194, 231),
    Color::Rgb(137, 220, 235),
    Color::Rgb(249, 226, 175),
];

const RULE_CHAR: char = '─';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Normal,
    /// The selected entry of a pane without focus.
    Current,
    Title,
    Meta,
    Body,
    Depth(usize),
    MoreLabel,
    LinkTag,
    TextTag,
    StickyTag,
    Indicator,
    Placeholder,
    Error,
    Rule,
    Status,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Draw {
    Border {
        rect: Rect,
        title: String,
        active: bool,
    },
    Text {
        row: u16,
        col: u16,
        text: String,
        role: Role,
        selected: bool,
    },
    Fill {
        rect: Rect,
        role: Role,
    },
}

impl Draw {
    fn text(row: u16, col: u16, text: impl Into<String>, role: Role) -> Self {
        Draw::Text {
            row,
            col,
            text: text.into(),
            role,
            selected: false,
        }
    }

    fn selected(self, selected: bool) -> Self {
        match self {
            Draw::Text {
                row,
                col,
                text,
                role,
                ..
            } => Draw::Text {
                row,
                col,
                text,
                role,
                selected,
            },
            other => other,
        }
    }
}

pub fn style_for(role: Role, selected: bool) -> Style {
    let base = Style::default().bg(COLOR_PANEL_BG);
    let style = match role {
        Role::Normal | Role::Body => base.fg(COLOR_TEXT_PRIMARY),
        Role::Current => base.fg(COLOR_ACCENT).add_modifier(Modifier::BOLD),
        Role::Title => base.fg(COLOR_TEXT_PRIMARY).add_modifier(Modifier::BOLD),
        Role::Meta => base.fg(COLOR_TEXT_SECONDARY),
        Role::Depth(depth) => base.fg(COMMENT_DEPTH_COLORS[depth % COMMENT_DEPTH_COLORS.len()]),
        Role::MoreLabel => base.fg(COLOR_ACCENT).add_modifier(Modifier::ITALIC),
        Role::LinkTag => base.fg(COLOR_LINK),
        Role::TextTag => base.fg(COLOR_TEXT_POST),
        Role::StickyTag => base.fg(COLOR_STICKY).add_modifier(Modifier::BOLD),
        Role::Indicator => base.fg(COLOR_TEXT_SECONDARY),
        Role::Placeholder => base.fg(COLOR_TEXT_SECONDARY).add_modifier(Modifier::ITALIC),
        Role::Error => base.fg(COLOR_ERROR),
        Role::Rule => base.fg(COLOR_BORDER_IDLE),
        Role::Status => Style::default().fg(COLOR_TEXT_PRIMARY).bg(COLOR_STATUS_BG),
    };
    if selected {
        style.bg(COLOR_PANEL_SELECTED_BG).add_modifier(Modifier::BOLD)
    } else {
        style
    }
}

/// Longest prefix of `text` that fits in `width` terminal columns.
fn clip(text: &str, width: usize) -> String {
    let mut used = 0;
    text.chars()
        .take_while(|ch| {
            used += ch.width().unwrap_or(0);
            used <= width
        })
        .collect()
}

fn centered(out: &mut Vec<Draw>, area: Rect, message: &str, role: Role) {
    let width = message.width() as u16;
    let col = area.x + area.width.saturating_sub(width) / 2;
    let row = area.y + area.height / 2;
    out.push(Draw::text(row, col, clip(message, area.width as usize), role));
}

/// `[NN%]` on the bottom border: share of content seen through the end of the window.
pub fn scroll_percent(top: usize, visible: usize, total: usize) -> Option<u8> {
    if total == 0 || total <= visible {
        return None;
    }
    let seen = top + visible.min(total.saturating_sub(top));
    Some(((seen * 100) / total).min(100) as u8)
}

fn indicator(out: &mut Vec<Draw>, pane: Rect, percent: Option<u8>) {
    let Some(percent) = percent else {
        return;
    };
    let text = format!("[{percent}%]");
    let col = pane.right().saturating_sub(text.len() as u16 + 2);
    out.push(Draw::text(
        pane.bottom().saturating_sub(1),
        col,
        text,
        Role::Indicator,
    ));
}

/// Builds the draw plan for the current frame.
pub fn plan(engine: &mut Engine) -> Vec<Draw> {
    let status = engine.status_text();
    let layout = match engine.layout() {
        Ok(layout) => layout,
        Err(err) => return vec![Draw::text(0, 0, err.to_string(), Role::Error)],
    };
    engine.comment_cache();
    let engine: &Engine = engine;

    let mut out = Vec::new();
    plan_subreddits(engine, layout.list, &mut out);
    match engine.view() {
        View::List(pane) => plan_posts(engine, layout.content, pane == Pane::Posts, &mut out),
        View::PostDetail => plan_detail(engine, layout.content, &mut out),
        View::Comments => plan_comments(engine, layout.content, &mut out),
    }
    plan_status(engine, &layout, &status, &mut out);
    out
}

fn plan_subreddits(engine: &Engine, rect: Rect, out: &mut Vec<Draw>) {
    let active = engine.view() == View::List(Pane::Subs);
    out.push(Draw::Border {
        rect,
        title: "Subreddits".into(),
        active,
    });
    let area = layout::inner(rect);
    let scroll = engine.subs_scroll();
    let rows = engine
        .subreddits()
        .iter()
        .enumerate()
        .skip(scroll.top)
        .take(area.height as usize);
    for (row, (idx, name)) in (area.y..).zip(rows) {
        let current = idx == scroll.selected;
        let prefix = if current { "> " } else { "  " };
        let role = if current { Role::Current } else { Role::Normal };
        let text = clip(&format!("{prefix}r/{name}"), area.width as usize);
        out.push(Draw::text(row, area.x, text, role).selected(current && active));
    }
}

fn plan_posts(engine: &Engine, rect: Rect, active: bool, out: &mut Vec<Draw>) {
    let title = engine
        .selected_subreddit()
        .map(|sub| format!("r/{sub}"))
        .unwrap_or_else(|| "Posts".into());
    out.push(Draw::Border {
        rect,
        title,
        active,
    });
    let area = layout::inner(rect);

    if let Some(fetch) = engine
        .pending()
        .filter(|fetch| matches!(fetch, Fetch::Posts { .. }))
    {
        centered(out, area, &fetch.loading_message(), Role::Placeholder);
        return;
    }
    let posts = engine.current_posts();
    if posts.is_empty() {
        let (message, role) = if engine.posts_fetched() {
            ("(No posts found or error)", Role::Error)
        } else {
            ("(Press Enter in left pane to load)", Role::Placeholder)
        };
        out.push(Draw::text(area.y, area.x + 1, clip(message, area.width as usize), role));
        return;
    }

    let scroll = engine.posts_scroll();
    let width = area.width as usize;
    let now = engine.now();
    let entries = posts
        .iter()
        .enumerate()
        .skip(scroll.top)
        .take(engine.posts_visible());
    for (slot, (idx, post)) in entries.enumerate() {
        let row = area.y + (slot * POST_ENTRY_ROWS) as u16;
        let current = idx == scroll.selected;
        let prefix = if current { "> " } else { "  " };
        let role = if current { Role::Current } else { Role::Normal };
        out.push(
            Draw::text(row, area.x, clip(&format!("{prefix}{}", post.title), width), role)
                .selected(current && active),
        );
        let meta = post_list_meta(post, now);
        out.push(Draw::text(row + 1, area.x, clip(&meta, width), Role::Meta));
        post_tags(post, area, row + 1, out);
    }
}

fn post_list_meta(post: &Post, now: chrono::DateTime<chrono::Utc>) -> String {
    format!(
        "  {:>4}pts {:>3}c {:<15} {}",
        post.score,
        post.num_comments,
        post.author_label(),
        model::relative_age(post.created_at, now)
    )
}

fn post_tags(post: &Post, area: Rect, row: u16, out: &mut Vec<Draw>) {
    let (kind, kind_role) = if post.is_self() {
        ("[T]", Role::TextTag)
    } else {
        ("[L]", Role::LinkTag)
    };
    let sticky = if post.stickied { "[S]" } else { "" };
    let width = (sticky.len() + kind.len()) as u16;
    if width >= area.width {
        return;
    }
    let col = area.right().saturating_sub(width + 1);
    if post.stickied {
        out.push(Draw::text(row, col, sticky, Role::StickyTag));
    }
    out.push(Draw::text(row, col + sticky.len() as u16, kind, kind_role));
}

fn plan_detail(engine: &Engine, rect: Rect, out: &mut Vec<Draw>) {
    out.push(Draw::Border {
        rect,
        title: "Post View".into(),
        active: true,
    });
    let area = layout::inner(rect);
    let width = area.width as usize;
    let Some(post) = engine.detail_post() else {
        out.push(Draw::text(
            area.y,
            area.x + 1,
            clip("Error: Post not available.", width),
            Role::Error,
        ));
        return;
    };

    let meta = format!(
        "{}pts | {}c | {} | {} | r/{}",
        post.score,
        post.num_comments,
        post.author_label(),
        model::relative_age(post.created_at, engine.now()),
        post.subreddit
    );
    out.push(Draw::text(area.y, area.x, clip(&post.title, width), Role::Title));
    out.push(Draw::text(area.y + 1, area.x, clip(&meta, width), Role::Meta));
    out.push(Draw::text(
        area.y + 2,
        area.x,
        RULE_CHAR.to_string().repeat(width),
        Role::Rule,
    ));

    let lines = engine.detail_lines();
    let visible = engine.detail_visible();
    let top = engine.detail_scroll().top;
    let body_top = area.y + 3;
    for (row, line) in (body_top..).zip(lines.iter().skip(top).take(visible)) {
        out.push(Draw::text(row, area.x, clip(line, width), Role::Body));
    }
    indicator(out, rect, scroll_percent(top, visible, lines.len()));
}

fn plan_comments(engine: &Engine, rect: Rect, out: &mut Vec<Draw>) {
    let area = layout::inner(rect);
    let title = engine
        .comments_post()
        .map(|post| {
            let room = (rect.width as usize).saturating_sub(20);
            format!("Comments: {}", clip(&post.title, room))
        })
        .unwrap_or_else(|| "Comments".into());
    out.push(Draw::Border {
        rect,
        title,
        active: true,
    });

    if let Some(fetch) = engine
        .pending()
        .filter(|fetch| matches!(fetch, Fetch::Comments { .. }))
    {
        centered(out, area, &fetch.loading_message(), Role::Placeholder);
        return;
    }
    let Some(lines) = engine.cached_comment_lines() else {
        out.push(Draw::text(
            area.y,
            area.x + 1,
            clip("(Comments not loaded)", area.width as usize),
            Role::Placeholder,
        ));
        return;
    };
    if lines.is_empty() {
        out.push(Draw::text(
            area.y,
            area.x + 1,
            clip("(No comments found or error)", area.width as usize),
            Role::Error,
        ));
        return;
    }

    let scroll = engine.comments_scroll();
    let visible = engine.comments_visible();
    let text_col = area.x + 1;
    let text_width = engine.comment_width();
    for (row, line) in (area.y..).zip(lines.lines().iter().skip(scroll.top).take(visible)) {
        let selected = line.owner == scroll.selected;
        let role = match line.kind {
            LineKind::Meta => {
                out.push(Draw::text(row, area.x, "|", Role::Depth(line.depth)));
                Role::Meta
            }
            LineKind::Body => Role::Body,
            LineKind::MoreLabel => Role::MoreLabel,
        };
        out.push(Draw::text(row, text_col, clip(&line.text, text_width), role).selected(selected));
    }
    indicator(out, rect, scroll_percent(scroll.top, visible, lines.len()));
}

fn plan_status(engine: &Engine, layout: &Layout, status: &str, out: &mut Vec<Draw>) {
    let rect = layout.status;
    out.push(Draw::Fill {
        rect,
        role: Role::Status,
    });
    let width = rect.width as usize;
    out.push(Draw::text(
        rect.y,
        rect.x,
        clip(status, width.saturating_sub(1)),
        Role::Status,
    ));
    let hints = engine.hints();
    let hints_len = hints.width();
    if hints_len + 2 <= width {
        let col = rect.x + (width - hints_len - 1) as u16;
        out.push(Draw::text(rect.y, col, hints, Role::Status));
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DrawError {
    #[error("draw at ({col}, {row}) outside {width}x{height} surface")]
    OutOfBounds {
        row: u16,
        col: u16,
        width: u16,
        height: u16,
    },
}

/// Paints every instruction; a rejected instruction is skipped, never fatal.
pub fn paint(plan: &[Draw], buf: &mut Buffer) {
    for draw in plan {
        if let Err(err) = paint_one(draw, buf) {
            trace!(%err, "draw instruction skipped");
        }
    }
}

fn paint_one(draw: &Draw, buf: &mut Buffer) -> Result<(), DrawError> {
    let area = buf.area;
    let outside = |row: u16, col: u16| DrawError::OutOfBounds {
        row,
        col,
        width: area.width,
        height: area.height,
    };
    match draw {
        Draw::Border {
            rect,
            title,
            active,
        } => {
            let clipped = rect.intersection(area);
            if clipped.area() == 0 {
                return Err(outside(rect.y, rect.x));
            }
            let (border, title_style) = if *active {
                (
                    Style::default().fg(COLOR_BORDER_FOCUSED),
                    Style::default().fg(COLOR_ACCENT).add_modifier(Modifier::BOLD),
                )
            } else {
                (
                    Style::default().fg(COLOR_BORDER_IDLE),
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                )
            };
            Block::default()
                .title(Span::styled(format!(" {title} "), title_style))
                .borders(Borders::ALL)
                .border_style(border)
                .style(Style::default().bg(COLOR_PANEL_BG))
                .render(clipped, buf);
            Ok(())
        }
        Draw::Fill { rect, role } => {
            let clipped = rect.intersection(area);
            if clipped.area() == 0 {
                return Err(outside(rect.y, rect.x));
            }
            buf.set_style(clipped, style_for(*role, false));
            Ok(())
        }
        Draw::Text {
            row,
            col,
            text,
            role,
            selected,
        } => {
            if *row < area.top()
                || *row >= area.bottom()
                || *col < area.left()
                || *col >= area.right()
            {
                return Err(outside(*row, *col));
            }
            let room = (area.right() - col) as usize;
            buf.set_stringn(*col, *row, text, room, style_for(*role, *selected));
            Ok(())
        }
    }
}
