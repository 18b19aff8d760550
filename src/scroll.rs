//! Selection and scroll offsets for the three kinds of pane.
//!
//! * [`ListScroll`]: one selected item, scrolled by whole items.
//! * [`LineScroll`]: one selected comment, scrolled by display lines.
//! * [`TextScroll`]: no selection, scrolled by display lines.
//!
//! `visible` is always the number of units (items or lines) that fit in the
//! pane; zero is treated as one so a collapsed pane never divides the world.

use crate::flatten::FlattenCache;

/// Largest valid top offset for `count` units in a window of `visible`.
pub fn max_top(count: usize, visible: usize) -> usize {
    count.saturating_sub(visible.max(1))
}

pub fn clamp_top(top: usize, count: usize, visible: usize) -> usize {
    top.min(max_top(count, visible))
}

/// Smallest change to `top` that puts `target` inside the window.
pub fn reveal(top: usize, target: usize, visible: usize) -> usize {
    let visible = visible.max(1);
    if target < top {
        target
    } else if target >= top + visible {
        target + 1 - visible
    } else {
        top
    }
}

fn page_step(visible: usize) -> usize {
    visible.saturating_sub(1).max(1)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListScroll {
    pub selected: usize,
    pub top: usize,
}

impl ListScroll {
    pub fn down(&mut self, len: usize, visible: usize) {
        if self.selected + 1 < len {
            self.selected += 1;
            self.top = reveal(self.top, self.selected, visible);
        }
    }

    pub fn up(&mut self, visible: usize) {
        if self.selected > 0 {
            self.selected -= 1;
            self.top = reveal(self.top, self.selected, visible);
        }
    }

    /// Moves by a page; the offset follows by the distance actually moved.
    pub fn page_down(&mut self, len: usize, visible: usize) {
        if len == 0 {
            return;
        }
        let target = (self.selected + page_step(visible)).min(len - 1);
        let moved = target.saturating_sub(self.selected);
        self.selected = target;
        self.top = (self.top + moved).min(max_top(len, visible));
        self.top = reveal(self.top, self.selected, visible);
    }

    pub fn page_up(&mut self, visible: usize) {
        let target = self.selected.saturating_sub(page_step(visible));
        let moved = self.selected - target;
        self.selected = target;
        self.top = self.top.saturating_sub(moved);
        self.top = reveal(self.top, self.selected, visible);
    }

    pub fn home(&mut self) {
        self.selected = 0;
        self.top = 0;
    }

    pub fn end(&mut self, len: usize, visible: usize) {
        if len == 0 {
            return;
        }
        self.selected = len - 1;
        self.top = max_top(len, visible);
    }

    /// Re-validates both indices after the list was replaced or the pane resized.
    pub fn clamp(&mut self, len: usize, visible: usize) {
        if len == 0 {
            *self = Self::default();
            return;
        }
        self.selected = self.selected.min(len - 1);
        self.top = clamp_top(self.top, len, visible);
        self.top = reveal(self.top, self.selected, visible);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Comment selection: `selected` is a forest index, `top` a display-line index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineScroll {
    pub selected: usize,
    pub top: usize,
}

impl LineScroll {
    pub fn next(&mut self, lines: &FlattenCache, visible: usize) {
        if self.selected + 1 < lines.owner_count() {
            self.selected += 1;
            self.reveal_selected(lines, visible);
        }
    }

    pub fn prev(&mut self, lines: &FlattenCache, visible: usize) {
        if self.selected > 0 {
            self.selected = self.selected.min(lines.owner_count()).saturating_sub(1);
            self.reveal_selected(lines, visible);
        }
    }

    /// Scrolls the view only; the selection stays where it is.
    pub fn page_down(&mut self, total_lines: usize, visible: usize) {
        self.top = (self.top + page_step(visible)).min(max_top(total_lines, visible));
    }

    pub fn page_up(&mut self, visible: usize) {
        self.top = self.top.saturating_sub(page_step(visible));
    }

    pub fn home(&mut self) {
        self.selected = 0;
        self.top = 0;
    }

    pub fn end(&mut self, lines: &FlattenCache, visible: usize) {
        if lines.is_empty() {
            return;
        }
        if let Some(owner) = lines.owner_of_line(lines.len() - 1) {
            self.selected = owner;
        }
        self.top = max_top(lines.len(), visible);
    }

    /// Keeps the selection inside the forest and the offset inside the lines.
    pub fn clamp(&mut self, lines: &FlattenCache, visible: usize) {
        self.selected = self.selected.min(lines.owner_count().saturating_sub(1));
        self.top = clamp_top(self.top, lines.len(), visible);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn reveal_selected(&mut self, lines: &FlattenCache, visible: usize) {
        if let Some(first) = lines.first_line_of(self.selected) {
            self.top = reveal(self.top, first, visible);
        }
        self.top = clamp_top(self.top, lines.len(), visible);
    }
}

/// Plain scrolling for wrapped text without a selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextScroll {
    pub top: usize,
}

impl TextScroll {
    pub fn down(&mut self, total: usize, visible: usize) {
        if self.top < max_top(total, visible) {
            self.top += 1;
        }
    }

    pub fn up(&mut self) {
        self.top = self.top.saturating_sub(1);
    }

    pub fn page_down(&mut self, total: usize, visible: usize) {
        self.top = (self.top + page_step(visible)).min(max_top(total, visible));
    }

    pub fn page_up(&mut self, visible: usize) {
        self.top = self.top.saturating_sub(page_step(visible));
    }

    pub fn home(&mut self) {
        self.top = 0;
    }

    pub fn end(&mut self, total: usize, visible: usize) {
        self.top = max_top(total, visible);
    }

    pub fn clamp(&mut self, total: usize, visible: usize) {
        self.top = clamp_top(self.top, total, visible);
    }
}
