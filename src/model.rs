use chrono::{DateTime, Utc};

/// Body of a post: self text or an outbound link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostContent {
    SelfText(String),
    Link(String),
}

/// Immutable snapshot of a post as returned by a listing fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: String,
    pub subreddit: String,
    pub title: String,
    pub author: Option<String>,
    pub score: i64,
    pub num_comments: i64,
    pub created_at: DateTime<Utc>,
    pub content: PostContent,
    pub permalink: String,
    pub stickied: bool,
}

impl Post {
    pub fn is_self(&self) -> bool {
        matches!(self.content, PostContent::SelfText(_))
    }

    pub fn url(&self) -> Option<&str> {
        match &self.content {
            PostContent::Link(url) => Some(url.as_str()),
            PostContent::SelfText(_) => None,
        }
    }

    pub fn permalink_url(&self) -> String {
        if self.permalink.starts_with("http") {
            self.permalink.clone()
        } else {
            format!("https://reddit.com{}", self.permalink)
        }
    }

    /// Target of the "open" action: the discussion for self posts, the link otherwise.
    pub fn open_target(&self) -> String {
        match &self.content {
            PostContent::Link(url) if !url.is_empty() => url.clone(),
            _ => self.permalink_url(),
        }
    }

    /// Text shown in the post detail view.
    pub fn display_body(&self) -> String {
        match &self.content {
            PostContent::SelfText(body) => body.clone(),
            PostContent::Link(url) => format!("Link Post URL:\n{url}"),
        }
    }

    pub fn author_label(&self) -> String {
        author_label(self.author.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub id: String,
    pub depth: usize,
    pub author: Option<String>,
    pub score: i64,
    pub created_at: DateTime<Utc>,
    pub body: String,
}

/// Placeholder for replies that have not been fetched yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoreStub {
    pub depth: usize,
    pub count: u64,
    pub token: String,
    pub children: Vec<String>,
}

impl MoreStub {
    /// Stubs without child ids or count ("continue this thread") cannot be expanded in place.
    pub fn is_expandable(&self) -> bool {
        self.count > 0 && !self.children.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommentNode {
    Comment(Comment),
    More(MoreStub),
}

impl CommentNode {
    pub fn depth(&self) -> usize {
        match self {
            CommentNode::Comment(comment) => comment.depth,
            CommentNode::More(stub) => stub.depth,
        }
    }

    pub fn as_stub(&self) -> Option<&MoreStub> {
        match self {
            CommentNode::More(stub) => Some(stub),
            CommentNode::Comment(_) => None,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ForestError {
    #[error("node index {index} out of range ({len} nodes)")]
    OutOfRange { index: usize, len: usize },
    #[error("node {index} is not a load-more stub")]
    NotAStub { index: usize },
}

/// Comment tree in pre-order, nesting encoded by each node's depth.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Forest {
    nodes: Vec<CommentNode>,
}

impl Forest {
    pub fn new(nodes: Vec<CommentNode>) -> Self {
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CommentNode> {
        self.nodes.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CommentNode> {
        self.nodes.iter()
    }

    pub fn nodes(&self) -> &[CommentNode] {
        &self.nodes
    }

    pub fn stub_indices(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(idx, node)| node.as_stub().map(|_| idx))
            .collect()
    }

    /// Replaces the stub at `index` with `replacement`, keeping every other node in place.
    pub fn splice_stub(
        &mut self,
        index: usize,
        replacement: Vec<CommentNode>,
    ) -> Result<(), ForestError> {
        let len = self.nodes.len();
        match self.nodes.get(index) {
            None => Err(ForestError::OutOfRange { index, len }),
            Some(CommentNode::Comment(_)) => Err(ForestError::NotAStub { index }),
            Some(CommentNode::More(_)) => {
                self.nodes.splice(index..=index, replacement);
                Ok(())
            }
        }
    }
}

impl From<Vec<CommentNode>> for Forest {
    fn from(nodes: Vec<CommentNode>) -> Self {
        Self::new(nodes)
    }
}

impl<'a> IntoIterator for &'a Forest {
    type Item = &'a CommentNode;
    type IntoIter = std::slice::Iter<'a, CommentNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}

pub fn author_label(author: Option<&str>) -> String {
    match author.map(str::trim) {
        Some(name) if !name.is_empty() => format!("u/{name}"),
        _ => "[deleted]".to_string(),
    }
}

/// Coarse "Ns/Nm/Nh/Nd ago" label; future timestamps read as 0s.
pub fn relative_age(created: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - created).num_seconds().max(0);
    if seconds < 60 {
        format!("{seconds}s ago")
    } else if seconds < 3_600 {
        format!("{}m ago", seconds / 60)
    } else if seconds < 86_400 {
        format!("{}h ago", seconds / 3_600)
    } else {
        format!("{}d ago", seconds / 86_400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn comment(id: &str, depth: usize) -> CommentNode {
        CommentNode::Comment(Comment {
            id: id.into(),
            depth,
            author: Some("alice".into()),
            score: 1,
            created_at: Utc.timestamp_opt(0, 0).unwrap(),
            body: format!("body {id}"),
        })
    }

    fn stub(depth: usize) -> CommentNode {
        CommentNode::More(MoreStub {
            depth,
            count: 2,
            token: "more".into(),
            children: vec!["x".into(), "y".into()],
        })
    }

    fn ids(forest: &Forest) -> Vec<String> {
        forest
            .iter()
            .map(|node| match node {
                CommentNode::Comment(c) => c.id.clone(),
                CommentNode::More(_) => "<more>".into(),
            })
            .collect()
    }

    #[test]
    fn splice_stub_preserves_surrounding_order() {
        let mut forest = Forest::new(vec![
            comment("a", 0),
            comment("b", 1),
            stub(1),
            comment("c", 0),
            comment("d", 1),
        ]);
        forest
            .splice_stub(2, vec![comment("x", 1), comment("x1", 2), comment("y", 1)])
            .unwrap();
        assert_eq!(ids(&forest), vec!["a", "b", "x", "x1", "y", "c", "d"]);
    }

    #[test]
    fn splice_stub_with_nothing_removes_stub() {
        let mut forest = Forest::new(vec![comment("a", 0), stub(0)]);
        forest.splice_stub(1, Vec::new()).unwrap();
        assert_eq!(ids(&forest), vec!["a"]);
    }

    #[test]
    fn splice_rejects_comments_and_bad_indices() {
        let mut forest = Forest::new(vec![comment("a", 0)]);
        assert_eq!(
            forest.splice_stub(0, Vec::new()),
            Err(ForestError::NotAStub { index: 0 })
        );
        assert_eq!(
            forest.splice_stub(3, Vec::new()),
            Err(ForestError::OutOfRange { index: 3, len: 1 })
        );
    }

    #[test]
    fn relative_age_buckets() {
        let now = Utc.timestamp_opt(1_000_000, 0).unwrap();
        assert_eq!(relative_age(now - Duration::seconds(42), now), "42s ago");
        assert_eq!(relative_age(now - Duration::minutes(5), now), "5m ago");
        assert_eq!(relative_age(now - Duration::hours(3), now), "3h ago");
        assert_eq!(relative_age(now - Duration::days(9), now), "9d ago");
        assert_eq!(relative_age(now + Duration::hours(1), now), "0s ago");
    }

    #[test]
    fn continue_thread_stubs_are_not_expandable() {
        let mut stub = MoreStub {
            depth: 0,
            count: 3,
            token: "t".into(),
            children: vec!["x".into()],
        };
        assert!(stub.is_expandable());
        stub.count = 0;
        assert!(!stub.is_expandable());
        stub.count = 3;
        stub.children.clear();
        assert!(!stub.is_expandable());
    }

    #[test]
    fn author_label_handles_deleted() {
        assert_eq!(author_label(Some("bob")), "u/bob");
        assert_eq!(author_label(Some("  ")), "[deleted]");
        assert_eq!(author_label(None), "[deleted]");
    }
}
