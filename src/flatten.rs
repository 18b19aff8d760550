//! Comment forest → display lines, memoized per (post, width, forest generation).

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::model::{self, CommentNode, Forest};
use crate::wrap::Wrapper;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Meta,
    Body,
    MoreLabel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayLine {
    /// Index of the owning node in the forest.
    pub owner: usize,
    pub kind: LineKind,
    pub depth: usize,
    pub text: String,
}

/// Identity of a flattened result. `generation` changes whenever the forest is replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub owner_key: String,
    pub width: usize,
    pub generation: u64,
}

impl CacheKey {
    pub fn new(owner_key: impl Into<String>, width: usize, generation: u64) -> Self {
        Self {
            owner_key: owner_key.into(),
            width,
            generation,
        }
    }
}

pub fn indent_for(depth: usize) -> String {
    "  ".repeat(depth)
}

pub fn more_label(stub: &model::MoreStub) -> String {
    let indent = indent_for(stub.depth);
    if stub.is_expandable() {
        format!("{indent}>>> Load More ({}) Press 'l' <<<", stub.count)
    } else {
        format!("{indent}>>> Continue this thread <<<")
    }
}

/// Flattens `forest` in order; body text wraps to `width` columns including indent.
pub fn flatten(forest: &Forest, width: usize, now: DateTime<Utc>) -> Vec<DisplayLine> {
    let mut lines = Vec::new();
    for (owner, node) in forest.iter().enumerate() {
        match node {
            CommentNode::Comment(comment) => {
                let indent = indent_for(comment.depth);
                let meta = format!(
                    "{indent}{} | {}pts | {}",
                    model::author_label(comment.author.as_deref()),
                    comment.score,
                    model::relative_age(comment.created_at, now)
                );
                lines.push(DisplayLine {
                    owner,
                    kind: LineKind::Meta,
                    depth: comment.depth,
                    text: meta,
                });
                let wrapper = Wrapper::new(width).indent(&indent);
                lines.extend(wrapper.wrap(&comment.body).map(|text| DisplayLine {
                    owner,
                    kind: LineKind::Body,
                    depth: comment.depth,
                    text,
                }));
            }
            CommentNode::More(stub) => lines.push(DisplayLine {
                owner,
                kind: LineKind::MoreLabel,
                depth: stub.depth,
                text: more_label(stub),
            }),
        }
    }
    lines
}

#[derive(Debug, Clone)]
pub struct FlattenCache {
    key: CacheKey,
    lines: Vec<DisplayLine>,
    first_lines: Vec<usize>,
}

impl FlattenCache {
    pub fn build(key: CacheKey, forest: &Forest, now: DateTime<Utc>) -> Self {
        let lines = flatten(forest, key.width, now);
        let mut first_lines = vec![usize::MAX; forest.len()];
        for (idx, line) in lines.iter().enumerate().rev() {
            if let Some(slot) = first_lines.get_mut(line.owner) {
                *slot = idx;
            }
        }
        Self {
            key,
            lines,
            first_lines,
        }
    }

    pub fn is_valid_for(&self, key: &CacheKey) -> bool {
        self.key == *key
    }

    pub fn lines(&self) -> &[DisplayLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn owner_count(&self) -> usize {
        self.first_lines.len()
    }

    pub fn first_line_of(&self, owner: usize) -> Option<usize> {
        self.first_lines
            .get(owner)
            .copied()
            .filter(|&line| line != usize::MAX)
    }

    pub fn owner_of_line(&self, line: usize) -> Option<usize> {
        self.lines.get(line).map(|line| line.owner)
    }
}

/// Holder for the single flattened comment view. Reads always go through a key check.
#[derive(Debug, Default)]
pub struct CommentLines {
    cache: Option<FlattenCache>,
    builds: u64,
}

impl CommentLines {
    pub fn get_or_build(
        &mut self,
        key: CacheKey,
        forest: &Forest,
        now: DateTime<Utc>,
    ) -> &FlattenCache {
        if !self.cache.as_ref().is_some_and(|cache| cache.is_valid_for(&key)) {
            self.cache = None;
        }
        let builds = &mut self.builds;
        self.cache.get_or_insert_with(|| {
            *builds += 1;
            debug!(
                post = %key.owner_key,
                width = key.width,
                generation = key.generation,
                nodes = forest.len(),
                "rebuilding comment lines"
            );
            FlattenCache::build(key, forest, now)
        })
    }

    pub fn get(&self, key: &CacheKey) -> Option<&FlattenCache> {
        self.cache.as_ref().filter(|cache| cache.is_valid_for(key))
    }

    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    /// Number of times lines were regenerated.
    pub fn builds(&self) -> u64 {
        self.builds
    }
}
