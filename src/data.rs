use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::model::{Comment, CommentNode, Forest, MoreStub, Post, PostContent};
use crate::reddit::{self, ListingOptions, MORE_CHILDREN_BATCH};

pub trait FeedService: Send + Sync {
    fn fetch_posts(&self, subreddit: &str, limit: u32) -> Result<Vec<Post>>;
}

pub trait CommentService: Send + Sync {
    /// Comment forest of a post. `expand_limit` is the number of "more" stubs
    /// to resolve before returning; zero leaves every stub in place. A failed
    /// stub expansion fails the whole call.
    fn fetch_comments(&self, post_id: &str, expand_limit: usize) -> Result<Forest>;
}

pub trait LinkOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<()>;
}

/// Resolves up to `limit` expandable stubs in forest order, splicing each
/// result in place of its stub. Returns the number of stubs resolved.
pub fn expand_stubs<F>(forest: &mut Forest, limit: usize, mut resolve: F) -> Result<usize>
where
    F: FnMut(&MoreStub, &[String]) -> Result<Vec<CommentNode>>,
{
    let mut expanded = 0;
    let mut cursor = 0;
    while expanded < limit {
        let next = forest
            .iter()
            .enumerate()
            .skip(cursor)
            .find_map(|(idx, node)| match node {
                CommentNode::More(stub) if stub.is_expandable() => Some((idx, stub.clone())),
                _ => None,
            });
        let Some((index, stub)) = next else {
            break;
        };

        let split = stub.children.len().min(MORE_CHILDREN_BATCH);
        let (batch, rest) = stub.children.split_at(split);
        let mut nodes = resolve(&stub, batch)?;
        if !rest.is_empty() {
            nodes.push(CommentNode::More(MoreStub {
                depth: stub.depth,
                count: stub.count.saturating_sub(batch.len() as u64),
                token: stub.token.clone(),
                children: rest.to_vec(),
            }));
        }
        forest.splice_stub(index, nodes)?;
        expanded += 1;
        cursor = index;
    }
    Ok(expanded)
}

pub struct RedditFeedService {
    client: Arc<reddit::Client>,
}

impl RedditFeedService {
    pub fn new(client: Arc<reddit::Client>) -> Self {
        Self { client }
    }
}

impl FeedService for RedditFeedService {
    fn fetch_posts(&self, subreddit: &str, limit: u32) -> Result<Vec<Post>> {
        let listing = self
            .client
            .new_posts(subreddit, ListingOptions::limit(limit))
            .with_context(|| format!("fetch r/{subreddit}"))?;
        Ok(listing
            .children
            .into_iter()
            .map(|thing| Post::from(thing.data))
            .collect())
    }
}

pub struct RedditCommentService {
    client: Arc<reddit::Client>,
    comment_limit: u32,
}

impl RedditCommentService {
    pub fn new(client: Arc<reddit::Client>, comment_limit: u32) -> Self {
        Self {
            client,
            comment_limit,
        }
    }
}

impl CommentService for RedditCommentService {
    fn fetch_comments(&self, post_id: &str, expand_limit: usize) -> Result<Forest> {
        let thread = self
            .client
            .comments(post_id, ListingOptions::limit(self.comment_limit))
            .with_context(|| format!("fetch comments for {post_id}"))?;
        let mut forest = thread.forest();
        if expand_limit > 0 {
            let count = expand_stubs(&mut forest, expand_limit, |stub, children| {
                self.client.more_children(post_id, children, stub.depth)
            })
            .with_context(|| format!("load more comments for {post_id}"))?;
            debug!(post = post_id, count, "expanded comment stubs");
        }
        Ok(forest)
    }
}

#[derive(Debug, Default)]
pub struct BrowserOpener;

impl LinkOpener for BrowserOpener {
    fn open(&self, url: &str) -> Result<()> {
        webbrowser::open(url).with_context(|| format!("open {url}"))
    }
}

/// Sample posts for any subreddit, with per-subreddit overrides and failures.
pub struct MockFeedService {
    epoch: DateTime<Utc>,
    per_subreddit: usize,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl Default for MockFeedService {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl MockFeedService {
    pub fn new(epoch: DateTime<Utc>) -> Self {
        Self {
            epoch,
            per_subreddit: 12,
            failing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn per_subreddit(mut self, count: usize) -> Self {
        self.per_subreddit = count;
        self
    }

    pub fn failing(mut self, subreddit: &str) -> Self {
        self.failing.insert(subreddit.to_string());
        self
    }

    /// Subreddits fetched so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl FeedService for MockFeedService {
    fn fetch_posts(&self, subreddit: &str, limit: u32) -> Result<Vec<Post>> {
        self.calls.lock().push(subreddit.to_string());
        if self.failing.contains(subreddit) {
            return Err(anyhow!("reddit: api error 503 Service Unavailable"));
        }
        let count = self.per_subreddit.min(limit as usize);
        Ok(sample_posts(subreddit, count, self.epoch))
    }
}

pub fn sample_posts(subreddit: &str, count: usize, epoch: DateTime<Utc>) -> Vec<Post> {
    (0..count)
        .map(|idx| {
            let id = format!("{subreddit}{idx}");
            let content = if idx % 3 == 2 {
                PostContent::Link(format!("https://example.com/{subreddit}/{idx}"))
            } else {
                PostContent::SelfText(format!(
                    "Sample discussion {idx} for r/{subreddit}.\n\nNothing here is fetched from the network; \
                     these posts exist so the interface can be explored without credentials."
                ))
            };
            Post {
                permalink: format!("/r/{subreddit}/comments/{id}/sample_{idx}/"),
                id,
                subreddit: subreddit.to_string(),
                title: format!("Sample post {idx} in r/{subreddit}"),
                author: if idx % 5 == 4 {
                    None
                } else {
                    Some(format!("sample_user_{}", idx % 4))
                },
                score: 120 - (idx as i64) * 7,
                num_comments: (idx as i64 * 3) % 40,
                created_at: epoch - Duration::minutes(idx as i64 * 37),
                content,
                stickied: idx == 0,
            }
        })
        .collect()
}

/// Deterministic comment trees; stubs expand into generated replies.
pub struct MockCommentService {
    epoch: DateTime<Utc>,
    forests: HashMap<String, Forest>,
    failing: HashSet<String>,
    failing_expansion: bool,
    calls: Mutex<Vec<(String, usize)>>,
}

impl Default for MockCommentService {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl MockCommentService {
    pub fn new(epoch: DateTime<Utc>) -> Self {
        Self {
            epoch,
            forests: HashMap::new(),
            failing: HashSet::new(),
            failing_expansion: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Initial fetches succeed; resolving any stub fails.
    pub fn failing_expansion(mut self) -> Self {
        self.failing_expansion = true;
        self
    }

    pub fn with_forest(mut self, post_id: &str, forest: Forest) -> Self {
        self.forests.insert(post_id.to_string(), forest);
        self
    }

    pub fn failing(mut self, post_id: &str) -> Self {
        self.failing.insert(post_id.to_string());
        self
    }

    /// `(post_id, expand_limit)` of every fetch so far.
    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().clone()
    }

    fn reply(&self, id: &str, depth: usize, body: String) -> CommentNode {
        CommentNode::Comment(Comment {
            id: id.to_string(),
            depth,
            author: Some(format!("replier_{}", id.len() % 3)),
            score: 1,
            created_at: self.epoch - Duration::minutes(5),
            body,
        })
    }
}

impl CommentService for MockCommentService {
    fn fetch_comments(&self, post_id: &str, expand_limit: usize) -> Result<Forest> {
        self.calls.lock().push((post_id.to_string(), expand_limit));
        if self.failing.contains(post_id) {
            return Err(anyhow!("reddit: rate limited"));
        }
        let mut forest = match self.forests.get(post_id) {
            Some(forest) => forest.clone(),
            None => sample_forest(post_id, self.epoch),
        };
        expand_stubs(&mut forest, expand_limit, |stub, children| {
            if self.failing_expansion {
                return Err(anyhow!("reddit: morechildren error: TOO_MANY_REQUESTS"));
            }
            Ok(children
                .iter()
                .map(|child| self.reply(child, stub.depth, format!("Loaded reply {child}.")))
                .collect())
        })?;
        Ok(forest)
    }
}

pub fn sample_forest(post_id: &str, epoch: DateTime<Utc>) -> Forest {
    let comment = |id: &str, depth: usize, minutes: i64, body: &str| {
        CommentNode::Comment(Comment {
            id: format!("{post_id}_{id}"),
            depth,
            author: Some(format!("commenter_{id}")),
            score: 10 - depth as i64,
            created_at: epoch - Duration::minutes(minutes),
            body: body.to_string(),
        })
    };
    Forest::new(vec![
        comment(
            "a",
            0,
            90,
            "First! This is a top level comment long enough to wrap over several lines in a narrow pane.",
        ),
        comment("b", 1, 80, "A reply to the first comment."),
        comment("c", 2, 70, "Nested further.\nWith an explicit second line."),
        CommentNode::More(MoreStub {
            depth: 1,
            count: 3,
            token: format!("{post_id}_more1"),
            children: vec![
                format!("{post_id}_m1"),
                format!("{post_id}_m2"),
                format!("{post_id}_m3"),
            ],
        }),
        comment("d", 0, 60, "Another top level comment."),
        comment("e", 0, 30, ""),
        CommentNode::More(MoreStub {
            depth: 0,
            count: 0,
            token: format!("{post_id}_continue"),
            children: Vec::new(),
        }),
    ])
}

/// Records opened urls instead of launching a browser.
#[derive(Default)]
pub struct RecordingOpener {
    opened: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingOpener {
    pub fn failing() -> Self {
        Self {
            opened: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }
}

impl LinkOpener for RecordingOpener {
    fn open(&self, url: &str) -> Result<()> {
        if self.fail {
            return Err(anyhow!("no browser available"));
        }
        self.opened.lock().push(url.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn epoch() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn ids(forest: &Forest) -> Vec<String> {
        forest
            .iter()
            .map(|node| match node {
                CommentNode::Comment(c) => c.id.clone(),
                CommentNode::More(m) => format!("more:{}", m.children.len()),
            })
            .collect()
    }

    #[test]
    fn zero_limit_leaves_stubs() {
        let service = MockCommentService::new(epoch());
        let forest = service.fetch_comments("p", 0).unwrap();
        assert_eq!(forest.stub_indices(), vec![3, 6]);
        assert_eq!(service.calls(), vec![("p".to_string(), 0)]);
    }

    #[test]
    fn expansion_splices_in_place() {
        let service = MockCommentService::new(epoch());
        let forest = service.fetch_comments("p", 10).unwrap();
        assert_eq!(
            ids(&forest),
            vec!["p_a", "p_b", "p_c", "p_m1", "p_m2", "p_m3", "p_d", "p_e", "more:0"]
        );
        assert!(forest.iter().skip(3).take(3).all(|node| node.depth() == 1));
    }

    #[test]
    fn expansion_respects_limit_and_batch_size() {
        let children: Vec<String> = (0..MORE_CHILDREN_BATCH + 5).map(|i| format!("k{i}")).collect();
        let mut forest = Forest::new(vec![CommentNode::More(MoreStub {
            depth: 0,
            count: children.len() as u64,
            token: "t".into(),
            children,
        })]);
        let mut batches = Vec::new();
        let count = expand_stubs(&mut forest, 1, |_, ids| {
            batches.push(ids.len());
            Ok(Vec::new())
        })
        .unwrap();
        assert_eq!(count, 1);
        assert_eq!(batches, vec![MORE_CHILDREN_BATCH]);
        match forest.get(0) {
            Some(CommentNode::More(rest)) => {
                assert_eq!(rest.children.len(), 5);
                assert_eq!(rest.count, 5);
            }
            other => panic!("expected remainder stub, got {other:?}"),
        }
    }

    #[test]
    fn failed_expansion_fails_the_fetch() {
        let service = MockCommentService::new(epoch()).failing_expansion();
        assert_eq!(service.fetch_comments("p", 0).unwrap().len(), 7);
        let err = service.fetch_comments("p", 10).unwrap_err();
        assert!(format!("{err:#}").contains("morechildren"));

        let mut forest = sample_forest("p", epoch());
        let before = forest.clone();
        let result = expand_stubs(&mut forest, 10, |_, _| Err(anyhow!("boom")));
        assert!(result.is_err());
        assert_eq!(forest, before);
    }

    #[test]
    fn feed_mock_honours_limit_and_failures() {
        let feed = MockFeedService::new(epoch()).failing("broken");
        assert_eq!(feed.fetch_posts("rust", 5).unwrap().len(), 5);
        assert!(feed.fetch_posts("broken", 5).is_err());
        assert_eq!(feed.calls(), vec!["rust", "broken"]);
    }

    #[test]
    fn recording_opener_records() {
        let opener = RecordingOpener::default();
        opener.open("https://example.com").unwrap();
        assert_eq!(opener.opened(), vec!["https://example.com"]);
        assert!(RecordingOpener::failing().open("x").is_err());
    }
}
