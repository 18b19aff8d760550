//! Paragraph wrapping that keeps whitespace verbatim.
//!
//! `textwrap::wrap` trims whitespace at line ends, which destroys intentional
//! formatting in post and comment bodies. Here every whitespace character is
//! a fragment of its own that counts toward the line width, so a wrapped line
//! never exceeds the target width unless a single word is wider.

use std::collections::VecDeque;
use std::iter::Peekable;
use std::str::Split;

use textwrap::core::Fragment;
use textwrap::wrap_algorithms::wrap_first_fit;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

#[derive(Debug, Clone, Copy)]
pub struct Wrapper<'o> {
    width: usize,
    initial_indent: &'o str,
    subsequent_indent: &'o str,
}

impl<'o> Wrapper<'o> {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
            initial_indent: "",
            subsequent_indent: "",
        }
    }

    pub fn initial_indent(mut self, indent: &'o str) -> Self {
        self.initial_indent = indent;
        self
    }

    pub fn subsequent_indent(mut self, indent: &'o str) -> Self {
        self.subsequent_indent = indent;
        self
    }

    pub fn indent(self, indent: &'o str) -> Self {
        self.initial_indent(indent).subsequent_indent(indent)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Lazily wraps `text`; every `\n` is a hard break.
    pub fn wrap<'t>(&self, text: &'t str) -> Lines<'t, 'o> {
        Lines {
            wrapper: *self,
            paragraphs: text.split('\n').peekable(),
            pending: VecDeque::new(),
        }
    }

    fn wrap_paragraph(&self, paragraph: &str) -> Vec<String> {
        let chunks = chunks(paragraph);
        let first = self.available(self.initial_indent);
        let rest = self.available(self.subsequent_indent);
        wrap_first_fit(&chunks, &[first, rest])
            .into_iter()
            .enumerate()
            .map(|(idx, line)| {
                let indent = if idx == 0 {
                    self.initial_indent
                } else {
                    self.subsequent_indent
                };
                let mut out = String::from(indent);
                for chunk in line {
                    out.push_str(chunk.text);
                }
                out
            })
            .collect()
    }

    fn available(&self, indent: &str) -> f64 {
        self.width.saturating_sub(indent.width()).max(1) as f64
    }
}

/// Wrapped lines of one text. Cloning restarts from the clone point.
#[derive(Debug, Clone)]
pub struct Lines<'t, 'o> {
    wrapper: Wrapper<'o>,
    paragraphs: Peekable<Split<'t, char>>,
    pending: VecDeque<String>,
}

impl Iterator for Lines<'_, '_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Some(line);
            }
            let paragraph = self.paragraphs.next()?;
            let paragraph = paragraph.strip_suffix('\r').unwrap_or(paragraph);
            // "" has no lines and a trailing newline does not open a new one.
            if paragraph.is_empty() && self.paragraphs.peek().is_none() {
                return None;
            }
            self.pending.extend(self.wrapper.wrap_paragraph(paragraph));
        }
    }
}

/// A run of non-whitespace, or a single whitespace character.
#[derive(Debug)]
struct Chunk<'a> {
    text: &'a str,
    width: usize,
}

fn chunks(paragraph: &str) -> Vec<Chunk<'_>> {
    let mut out = Vec::new();
    let mut word_start = None;
    for (idx, ch) in paragraph.char_indices() {
        if !ch.is_whitespace() {
            word_start.get_or_insert(idx);
            continue;
        }
        if let Some(start) = word_start.take() {
            let word = &paragraph[start..idx];
            out.push(Chunk {
                text: word,
                width: word.width(),
            });
        }
        out.push(Chunk {
            text: &paragraph[idx..idx + ch.len_utf8()],
            width: ch.width().unwrap_or(1).max(1),
        });
    }
    if let Some(start) = word_start {
        let word = &paragraph[start..];
        out.push(Chunk {
            text: word,
            width: word.width(),
        });
    }
    out
}

impl Fragment for Chunk<'_> {
    fn width(&self) -> f64 {
        self.width as f64
    }

    fn whitespace_width(&self) -> f64 {
        0.0
    }

    fn penalty_width(&self) -> f64 {
        0.0
    }
}

/// Eager convenience wrapper around [`Wrapper::wrap`].
pub fn wrap_lines(text: &str, width: usize) -> Vec<String> {
    Wrapper::new(width).wrap(text).collect()
}
