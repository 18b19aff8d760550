//! Pane geometry. Pure functions of the terminal size.

use ratatui::layout::Rect;

pub const LEFT_PANE_RATIO: f32 = 0.30;
pub const MIN_LEFT_PANE_WIDTH: u16 = 20;
pub const STATUS_BAR_HEIGHT: u16 = 1;
pub const MIN_TERMINAL_WIDTH: u16 = 30;
pub const MIN_TERMINAL_HEIGHT: u16 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Subreddit list, always on the left.
    pub list: Rect,
    /// Post list, post detail or comments, depending on the view.
    pub content: Rect,
    pub status: Rect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("Terminal too small ({width}x{height})")]
    TooSmall { width: u16, height: u16 },
}

pub fn compute(width: u16, height: u16) -> Result<Layout, LayoutError> {
    if height < MIN_TERMINAL_HEIGHT || width < MIN_TERMINAL_WIDTH {
        return Err(LayoutError::TooSmall { width, height });
    }

    let panes_height = height - STATUS_BAR_HEIGHT;
    let ratio_width = (f32::from(width) * LEFT_PANE_RATIO).floor() as u16;
    let left_width = ratio_width.max(MIN_LEFT_PANE_WIDTH).min(width);
    let right_width = width - left_width;

    Ok(Layout {
        list: Rect::new(0, 0, left_width, panes_height),
        content: Rect::new(left_width, 0, right_width, panes_height),
        status: Rect::new(0, panes_height, width, STATUS_BAR_HEIGHT),
    })
}

/// Area inside a one-cell border.
pub fn inner(rect: Rect) -> Rect {
    Rect {
        x: rect.x.saturating_add(1),
        y: rect.y.saturating_add(1),
        width: rect.width.saturating_sub(2),
        height: rect.height.saturating_sub(2),
    }
}
