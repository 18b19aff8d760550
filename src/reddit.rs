use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{HeaderMap, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::model::{self, CommentNode, Forest, MoreStub, PostContent};

pub const DEFAULT_BASE_URL: &str = "https://oauth.reddit.com/";
/// Upper bound on child ids per `morechildren` request.
pub const MORE_CHILDREN_BATCH: usize = 100;

pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Result<OAuthToken>;
}

#[derive(Debug, Clone)]
pub struct OAuthToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: Option<SystemTime>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub base_url: Option<String>,
    pub http_client: Option<HttpClient>,
}

#[derive(Debug, Clone, Default)]
pub struct ListingOptions {
    pub limit: Option<u32>,
    pub extra: Vec<(String, String)>,
}

impl ListingOptions {
    pub fn limit(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            extra: Vec::new(),
        }
    }

    fn into_params(self) -> Vec<(String, String)> {
        let mut params = vec![("raw_json".to_string(), "1".to_string())];
        if let Some(limit) = self.limit {
            params.push(("limit".into(), limit.to_string()));
        }
        params.extend(self.extra);
        params
    }
}

/// Quota reported by the `x-ratelimit-*` headers of one response.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateLimit {
    pub used: f64,
    pub remaining: f64,
    /// Seconds until the quota window resets.
    pub reset: f64,
}

impl RateLimit {
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let rate = Self {
            used: header_float(headers, "x-ratelimit-used"),
            remaining: header_float(headers, "x-ratelimit-remaining"),
            reset: header_float(headers, "x-ratelimit-reset"),
        };
        if rate == Self::default() {
            None
        } else {
            Some(rate)
        }
    }
}

pub struct Client {
    token_provider: Arc<dyn TokenProvider>,
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(token_provider: Arc<dyn TokenProvider>, config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("reddit client user agent required");
        }
        let base = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&base)?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(Duration::from_secs(20))
                .build()?,
        };

        Ok(Client {
            token_provider,
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    /// Newest posts of one subreddit.
    pub fn new_posts(&self, subreddit: &str, opts: ListingOptions) -> Result<Listing<Post>> {
        let path = format!("/r/{}/new.json", subreddit.trim_start_matches("r/"));
        let params = opts.into_params();
        let resp = self.request(&path, &params)?;
        let listing: ListingEnvelope<Post> = resp.json().context("reddit: decode post listing")?;
        Ok(listing.data)
    }

    /// Comment tree of a post, with "more" placeholders left as they come.
    pub fn comments(&self, article: &str, opts: ListingOptions) -> Result<PostThread> {
        let path = format!("/comments/{}.json", article.trim_start_matches("t3_"));
        let params = opts.into_params();
        let resp = self.request(&path, &params)?;
        let payload: Vec<Value> = resp.json().context("reddit: decode comments payload")?;
        parse_thread(payload)
    }

    /// Resolves the children of a "more" placeholder. Returned nodes are in
    /// pre-order with depths relative to `base_depth`.
    pub fn more_children(
        &self,
        article: &str,
        children: &[String],
        base_depth: usize,
    ) -> Result<Vec<CommentNode>> {
        if children.is_empty() {
            return Ok(Vec::new());
        }
        let params = vec![
            ("api_type".to_string(), "json".to_string()),
            ("raw_json".to_string(), "1".to_string()),
            (
                "link_id".to_string(),
                format!("t3_{}", article.trim_start_matches("t3_")),
            ),
            ("children".to_string(), children.join(",")),
        ];
        let resp = self.request("/api/morechildren", &params)?;
        let payload: MoreChildrenResponse =
            resp.json().context("reddit: decode morechildren response")?;
        if let Some(err) = payload.json.errors.first() {
            let joined = err
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            bail!("reddit: morechildren error: {}", joined);
        }
        Ok(order_more_children(payload.json.data.things, base_depth))
    }

    fn request(&self, path: &str, params: &[(String, String)]) -> Result<Response> {
        let token = self.token_provider.token()?;
        let mut url = self.base_url.join(path)?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }

        debug!(%path, "reddit request");
        let resp = self
            .http
            .get(url)
            .header(USER_AGENT, self.user_agent.clone())
            .header(AUTHORIZATION, format!("Bearer {}", token.access_token))
            .send()?;
        let rate = RateLimit::from_headers(resp.headers());
        if let Some(rate) = rate {
            debug!(
                remaining = rate.remaining,
                used = rate.used,
                reset = rate.reset,
                "reddit rate limit"
            );
        }
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            Err(status_error(status, &body, rate))
        }
    }
}

fn status_error(status: StatusCode, body: &str, rate: Option<RateLimit>) -> anyhow::Error {
    match status.as_u16() {
        401 => anyhow!("reddit: unauthorized"),
        403 => anyhow!("reddit: forbidden"),
        404 => anyhow!("reddit: not found"),
        429 => match rate.filter(|rate| rate.reset > 0.0) {
            Some(rate) => anyhow!(
                "reddit: rate limited, quota resets in {}s",
                rate.reset.ceil() as u64
            ),
            None => anyhow!("reddit: rate limited: {}", body),
        },
        _ => anyhow!("reddit: api error {}: {}", status, body),
    }
}

/// Splits the `[post listing, comment listing]` pair returned for a thread.
fn parse_thread(payload: Vec<Value>) -> Result<PostThread> {
    let mut parts = payload.into_iter();
    let (Some(post_part), Some(comment_part)) = (parts.next(), parts.next()) else {
        bail!("reddit: comments payload missing elements");
    };
    let post_listing: ListingEnvelope<Post> =
        serde_json::from_value(post_part).context("reddit: decode post listing")?;
    let comments: ListingEnvelope<Value> =
        serde_json::from_value(comment_part).context("reddit: decode comment listing")?;
    let post = post_listing
        .data
        .children
        .into_iter()
        .next()
        .map(|thing| thing.data)
        .ok_or_else(|| anyhow!("reddit: post listing empty"))?;
    Ok(PostThread {
        post,
        comments: comments.data.children,
    })
}

fn header_float(headers: &HeaderMap, key: &str) -> f64 {
    headers
        .get(key)
        .and_then(|value| value.to_str().ok())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn timestamp(created_utc: f64) -> DateTime<Utc> {
    Utc.timestamp_opt(created_utc.trunc() as i64, 0)
        .single()
        .unwrap_or_default()
}

fn author_or_none(author: String) -> Option<String> {
    let trimmed = author.trim();
    if trimmed.is_empty() || trimmed == "[deleted]" {
        None
    } else {
        Some(author)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Listing<T> {
    pub after: Option<String>,
    pub before: Option<String>,
    pub children: Vec<Thing<T>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thing<T> {
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub subreddit: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub is_self: bool,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: i64,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub stickied: bool,
}

impl From<Post> for model::Post {
    fn from(post: Post) -> Self {
        let content = if post.is_self {
            PostContent::SelfText(post.selftext)
        } else {
            PostContent::Link(post.url)
        };
        model::Post {
            id: post.id,
            subreddit: post.subreddit,
            title: post.title,
            author: author_or_none(post.author),
            score: post.score,
            num_comments: post.num_comments,
            created_at: timestamp(post.created_utc),
            content,
            permalink: post.permalink,
            stickied: post.stickied,
        }
    }
}

/// A comment-tree child before its kind is known (`t1` comment or `more`).
#[derive(Debug, Clone, Deserialize)]
pub struct RawThing {
    pub kind: String,
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct CommentData {
    id: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    created_utc: f64,
    #[serde(default)]
    parent_id: String,
    #[serde(default)]
    replies: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct MoreData {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    count: u64,
    #[serde(default)]
    parent_id: String,
    #[serde(default)]
    children: Vec<String>,
}

enum Node {
    Comment(CommentData),
    More(MoreData),
}

impl Node {
    fn parse(thing: RawThing) -> Option<Self> {
        match thing.kind.as_str() {
            "t1" => serde_json::from_value(thing.data).ok().map(Node::Comment),
            "more" => serde_json::from_value(thing.data).ok().map(Node::More),
            _ => None,
        }
    }

    fn parent_id(&self) -> &str {
        match self {
            Node::Comment(data) => &data.parent_id,
            Node::More(data) => &data.parent_id,
        }
    }

    fn into_model(self, depth: usize) -> CommentNode {
        match self {
            Node::Comment(data) => CommentNode::Comment(model::Comment {
                id: data.id,
                depth,
                author: author_or_none(data.author),
                score: data.score,
                created_at: timestamp(data.created_utc),
                body: data.body,
            }),
            Node::More(data) => CommentNode::More(MoreStub {
                depth,
                count: data.count,
                token: if data.name.is_empty() { data.id } else { data.name },
                children: data.children,
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostThread {
    pub post: Post,
    pub comments: Vec<Thing<Value>>,
}

impl PostThread {
    /// Pre-order flattening of the nested reply listings.
    pub fn forest(&self) -> Forest {
        let mut nodes = Vec::new();
        for thing in &self.comments {
            push_nested(thing, 0, &mut nodes);
        }
        Forest::new(nodes)
    }
}

fn push_nested(thing: &Thing<Value>, depth: usize, out: &mut Vec<CommentNode>) {
    let raw = RawThing {
        kind: thing.kind.clone(),
        data: thing.data.clone(),
    };
    let Some(node) = Node::parse(raw) else {
        return;
    };
    let replies = match &node {
        Node::Comment(data) => replies_of(&data.replies),
        Node::More(_) => Vec::new(),
    };
    out.push(node.into_model(depth));
    for reply in &replies {
        push_nested(reply, depth + 1, out);
    }
}

fn replies_of(value: &Value) -> Vec<Thing<Value>> {
    if !value.is_object() {
        return Vec::new();
    }
    serde_json::from_value::<ListingEnvelope<Value>>(value.clone())
        .map(|listing| listing.data.children)
        .unwrap_or_default()
}

/// `morechildren` returns a flat list; rebuild pre-order from parent links.
fn order_more_children(things: Vec<RawThing>, base_depth: usize) -> Vec<CommentNode> {
    let nodes: Vec<Node> = things.into_iter().filter_map(Node::parse).collect();
    let names: HashSet<String> = nodes
        .iter()
        .filter_map(|node| match node {
            Node::Comment(data) => Some(format!("t1_{}", data.id)),
            Node::More(_) => None,
        })
        .collect();

    let mut roots = Vec::new();
    let mut children: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, node) in nodes.iter().enumerate() {
        let parent = node.parent_id();
        if names.contains(parent) {
            children.entry(parent.to_string()).or_default().push(idx);
        } else {
            roots.push(idx);
        }
    }

    let mut slots: Vec<Option<Node>> = nodes.into_iter().map(Some).collect();
    let mut out = Vec::with_capacity(slots.len());
    let mut stack: Vec<(usize, usize)> = roots
        .into_iter()
        .rev()
        .map(|idx| (idx, base_depth))
        .collect();
    while let Some((idx, depth)) = stack.pop() {
        let Some(node) = slots.get_mut(idx).and_then(Option::take) else {
            continue;
        };
        if let Node::Comment(data) = &node {
            if let Some(kids) = children.get(&format!("t1_{}", data.id)) {
                stack.extend(kids.iter().rev().map(|&kid| (kid, depth + 1)));
            }
        }
        out.push(node.into_model(depth));
    }
    out
}

#[derive(Debug, Clone, Deserialize)]
struct ListingEnvelope<T> {
    #[allow(dead_code)]
    kind: String,
    data: Listing<T>,
}

#[derive(Debug, Clone, Deserialize)]
struct MoreChildrenResponse {
    json: MoreChildrenBody,
}

#[derive(Debug, Clone, Deserialize)]
struct MoreChildrenBody {
    #[serde(default)]
    errors: Vec<Vec<Value>>,
    #[serde(default)]
    data: MoreChildrenData,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct MoreChildrenData {
    #[serde(default)]
    things: Vec<RawThing>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn comment_json(id: &str, parent: &str, replies: Value) -> Value {
        json!({
            "kind": "t1",
            "data": {
                "id": id,
                "name": format!("t1_{id}"),
                "parent_id": parent,
                "author": format!("user_{id}"),
                "body": format!("body {id}"),
                "score": 3,
                "created_utc": 1_700_000_000.0,
                "replies": replies
            }
        })
    }

    fn listing(children: Vec<Value>) -> Value {
        json!({"kind": "Listing", "data": {"after": null, "before": null, "children": children}})
    }

    fn ids(forest: &[CommentNode]) -> Vec<(String, usize)> {
        forest
            .iter()
            .map(|node| match node {
                CommentNode::Comment(c) => (c.id.clone(), c.depth),
                CommentNode::More(m) => (format!("more:{}", m.count), m.depth),
            })
            .collect()
    }

    #[test]
    fn nested_replies_flatten_in_pre_order() {
        let tree = listing(vec![
            comment_json(
                "a",
                "t3_p",
                listing(vec![
                    comment_json("b", "t1_a", json!("")),
                    json!({"kind": "more", "data": {
                        "id": "m", "name": "t1_m", "count": 4, "parent_id": "t1_a",
                        "children": ["x", "y"]
                    }}),
                ]),
            ),
            comment_json("c", "t3_p", json!("")),
        ]);
        let envelope: ListingEnvelope<Value> = serde_json::from_value(tree).unwrap();
        let thread = PostThread {
            post: serde_json::from_value(json!({"id": "p", "title": "t", "subreddit": "rust"}))
                .unwrap(),
            comments: envelope.data.children,
        };
        let forest = thread.forest();
        assert_eq!(
            ids(forest.nodes()),
            vec![
                ("a".to_string(), 0),
                ("b".to_string(), 1),
                ("more:4".to_string(), 1),
                ("c".to_string(), 0),
            ]
        );
        match forest.get(2) {
            Some(CommentNode::More(stub)) => assert_eq!(stub.children, vec!["x", "y"]),
            other => panic!("expected stub, got {other:?}"),
        }
    }

    #[test]
    fn more_children_are_reordered_by_parent() {
        let raw = |value: Value| -> RawThing { serde_json::from_value(value).unwrap() };
        let things = vec![
            raw(comment_json("x", "t1_a", json!(""))),
            raw(comment_json("z", "t1_x", json!(""))),
            raw(comment_json("y", "t1_a", json!(""))),
            raw(comment_json("x2", "t1_z", json!(""))),
        ];
        let nodes = order_more_children(things, 2);
        assert_eq!(
            ids(&nodes),
            vec![
                ("x".to_string(), 2),
                ("z".to_string(), 3),
                ("x2".to_string(), 4),
                ("y".to_string(), 2),
            ]
        );
    }

    #[test]
    fn thread_payload_yields_post_and_comment_forest() {
        let post = listing(vec![json!({
            "kind": "t3",
            "data": {"id": "p", "title": "Thread", "subreddit": "rust", "is_self": true}
        })]);
        let comments = listing(vec![
            comment_json("a", "t3_p", listing(vec![comment_json("b", "t1_a", json!(""))])),
            json!({"kind": "more", "data": {
                "id": "m", "name": "t1_m", "count": 2, "parent_id": "t3_p", "children": ["x", "y"]
            }}),
        ]);
        let thread = parse_thread(vec![post, comments]).unwrap();
        assert_eq!(thread.post.title, "Thread");
        assert_eq!(
            ids(thread.forest().nodes()),
            vec![
                ("a".to_string(), 0),
                ("b".to_string(), 1),
                ("more:2".to_string(), 0),
            ]
        );

        assert!(parse_thread(vec![listing(Vec::new())]).is_err());
        assert!(parse_thread(vec![listing(Vec::new()), listing(Vec::new())]).is_err());
    }

    #[test]
    fn rate_limit_headers_reach_the_error() {
        let mut headers = HeaderMap::new();
        assert_eq!(RateLimit::from_headers(&headers), None);

        headers.insert("x-ratelimit-remaining", "0".parse().unwrap());
        headers.insert("x-ratelimit-used", "600".parse().unwrap());
        headers.insert("x-ratelimit-reset", "41.5".parse().unwrap());
        let rate = RateLimit::from_headers(&headers);
        assert_eq!(
            rate,
            Some(RateLimit {
                used: 600.0,
                remaining: 0.0,
                reset: 41.5
            })
        );

        let err = status_error(StatusCode::TOO_MANY_REQUESTS, "", rate);
        assert_eq!(err.to_string(), "reddit: rate limited, quota resets in 42s");
        let err = status_error(StatusCode::TOO_MANY_REQUESTS, "slow down", None);
        assert_eq!(err.to_string(), "reddit: rate limited: slow down");
        let err = status_error(StatusCode::FORBIDDEN, "", rate);
        assert_eq!(err.to_string(), "reddit: forbidden");
    }

    #[test]
    fn post_conversion() {
        let post: Post = serde_json::from_value(json!({
            "id": "abc",
            "title": "Hello",
            "subreddit": "rust",
            "author": "[deleted]",
            "is_self": false,
            "url": "https://example.com",
            "permalink": "/r/rust/comments/abc/hello/",
            "score": 12,
            "num_comments": 4,
            "created_utc": 1_700_000_000.0,
            "stickied": true
        }))
        .unwrap();
        let post = model::Post::from(post);
        assert_eq!(post.author, None);
        assert_eq!(post.url(), Some("https://example.com"));
        assert!(post.stickied);
        assert_eq!(post.created_at.timestamp(), 1_700_000_000);
        assert_eq!(
            post.permalink_url(),
            "https://reddit.com/r/rust/comments/abc/hello/"
        );
    }
}
