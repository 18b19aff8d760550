//! View state machine and the engine that owns all browsing state.
//!
//! Input goes through [`Engine::handle_key`], which mutates selection and
//! scroll state and may queue one blocking fetch. The caller draws a frame
//! (the loading message is part of it) and then runs the fetch with
//! [`Engine::run_pending_fetch`]. Every mutation ends with a clamp pass so the
//! next frame never reads past the end of a list.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::layout::Rect;
use tracing::{debug, info, warn};

use crate::data::{CommentService, FeedService, LinkOpener};
use crate::flatten::{CacheKey, CommentLines, FlattenCache};
use crate::layout::{self, Layout, LayoutError};
use crate::model::{CommentNode, Forest, Post};
use crate::scroll::{ListScroll, LineScroll, TextScroll};
use crate::wrap::Wrapper;

/// Rows taken by one entry of the post list.
pub const POST_ENTRY_ROWS: usize = 2;
/// Title, meta and rule rows above a post body.
pub const DETAIL_HEADER_ROWS: usize = 3;
/// Column left of comment text that holds the depth marker.
pub const COMMENT_GUTTER: usize = 1;

const OPENED_URL_PREVIEW: usize = 60;

/// Values the engine needs from the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub subreddits: Vec<String>,
    pub post_limit: u32,
    pub comment_limit: u32,
    pub expand_batch: usize,
    pub status_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            subreddits: ["commandline", "linux", "python", "devops", "selfhosted"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            post_limit: 30,
            comment_limit: 50,
            expand_batch: 10,
            status_timeout: Duration::from_secs(2),
        }
    }
}

pub trait Clock: Send + Sync {
    /// Wall time, used for relative ages.
    fn now(&self) -> DateTime<Utc>;
    /// Monotonic time, used for status expiry.
    fn instant(&self) -> Instant;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pane {
    Subs,
    Posts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    List(Pane),
    PostDetail,
    Comments,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetch {
    Posts { subreddit: String },
    Comments { post_id: String, expand_limit: usize },
}

impl Fetch {
    /// Centred message for the pane that waits on this fetch.
    pub fn loading_message(&self) -> String {
        match self {
            Fetch::Posts { subreddit } => format!("Fetching r/{subreddit}..."),
            Fetch::Comments { .. } => "Fetching comments...".to_string(),
        }
    }

    fn status_message(&self) -> String {
        match self {
            Fetch::Posts { subreddit } => format!("Fetching posts for r/{subreddit}..."),
            Fetch::Comments { post_id, .. } => format!("Fetching comments for {post_id}..."),
        }
    }
}

/// A persistent message plus an optional transient one that wins until it expires.
#[derive(Debug, Clone)]
pub struct StatusLine {
    persistent: String,
    transient: Option<(String, Instant)>,
    timeout: Duration,
}

impl StatusLine {
    pub fn new(timeout: Duration) -> Self {
        Self {
            persistent: String::new(),
            transient: None,
            timeout,
        }
    }

    pub fn set(&mut self, message: impl Into<String>) {
        self.persistent = message.into();
        self.transient = None;
    }

    pub fn flash(&mut self, message: impl Into<String>, now: Instant) {
        self.transient = Some((message.into(), now + self.timeout));
    }

    /// Text to show at `now`; an expired transient message is dropped.
    pub fn current(&mut self, now: Instant) -> &str {
        if self
            .transient
            .as_ref()
            .is_some_and(|(_, expires)| now >= *expires)
        {
            self.transient = None;
        }
        match &self.transient {
            Some((message, _)) => message,
            None => &self.persistent,
        }
    }

    pub fn persistent(&self) -> &str {
        &self.persistent
    }
}

/// Collaborators the engine calls out to.
#[derive(Clone)]
pub struct Services {
    pub feed: Arc<dyn FeedService>,
    pub comments: Arc<dyn CommentService>,
    pub opener: Arc<dyn LinkOpener>,
}

#[derive(Debug)]
struct ForestEntry {
    forest: Forest,
    generation: u64,
}

pub struct Engine {
    settings: Settings,
    services: Services,
    clock: Arc<dyn Clock>,

    layout: Option<Layout>,
    too_small: Option<LayoutError>,
    view: View,

    subs: ListScroll,
    posts: ListScroll,
    detail: TextScroll,
    comments: LineScroll,

    post_cache: HashMap<String, Vec<Post>>,
    forests: HashMap<String, ForestEntry>,
    generation: u64,
    comment_lines: CommentLines,

    detail_post: Option<Post>,
    comments_post: Option<Post>,
    pending: Option<Fetch>,
    status: StatusLine,
}

impl Engine {
    pub fn new(settings: Settings, services: Services) -> Self {
        Self::with_clock(settings, services, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: Settings, services: Services, clock: Arc<dyn Clock>) -> Self {
        let mut status = StatusLine::new(settings.status_timeout);
        status.set("Select subreddit and press Enter");
        Self {
            settings,
            services,
            clock,
            layout: None,
            too_small: None,
            view: View::List(Pane::Subs),
            subs: ListScroll::default(),
            posts: ListScroll::default(),
            detail: TextScroll::default(),
            comments: LineScroll::default(),
            post_cache: HashMap::new(),
            forests: HashMap::new(),
            generation: 0,
            comment_lines: CommentLines::default(),
            detail_post: None,
            comments_post: None,
            pending: None,
            status,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn layout(&self) -> Result<Layout, LayoutError> {
        match (self.too_small, self.layout) {
            (Some(err), _) => Err(err),
            (None, Some(layout)) => Ok(layout),
            (None, None) => Err(LayoutError::TooSmall {
                width: 0,
                height: 0,
            }),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn subreddits(&self) -> &[String] {
        &self.settings.subreddits
    }

    pub fn subs_scroll(&self) -> ListScroll {
        self.subs
    }

    pub fn posts_scroll(&self) -> ListScroll {
        self.posts
    }

    pub fn detail_scroll(&self) -> TextScroll {
        self.detail
    }

    pub fn comments_scroll(&self) -> LineScroll {
        self.comments
    }

    pub fn selected_subreddit(&self) -> Option<&str> {
        self.settings
            .subreddits
            .get(self.subs.selected)
            .map(String::as_str)
    }

    /// Whether posts of the selected subreddit were fetched (possibly empty).
    pub fn posts_fetched(&self) -> bool {
        self.selected_subreddit()
            .is_some_and(|sub| self.post_cache.contains_key(sub))
    }

    pub fn current_posts(&self) -> &[Post] {
        self.selected_subreddit()
            .and_then(|sub| self.post_cache.get(sub))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn selected_post(&self) -> Option<&Post> {
        self.current_posts().get(self.posts.selected)
    }

    pub fn detail_post(&self) -> Option<&Post> {
        self.detail_post.as_ref()
    }

    pub fn comments_post(&self) -> Option<&Post> {
        self.comments_post.as_ref()
    }

    pub fn forest(&self, post_id: &str) -> Option<&Forest> {
        self.forests.get(post_id).map(|entry| &entry.forest)
    }

    pub fn pending(&self) -> Option<&Fetch> {
        self.pending.as_ref()
    }

    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status.set(message);
    }

    pub fn status_text(&mut self) -> String {
        let now = self.clock.instant();
        self.status.current(now).to_string()
    }

    pub fn hints(&self) -> &'static str {
        match self.view {
            View::List(_) => "Arrows:Nav|Tab:Pane|Enter:Select|c:Comments|o:Open|r:Refresh|q:Quit",
            View::PostDetail => "Arrows/PgUp/Dn:Scroll|o:Open Link|q/Esc:Back",
            View::Comments => "Arrows/PgUp/Dn:Scroll|l:LoadMore|o:Open Post|q/Esc:Back",
        }
    }

    fn list_inner(&self) -> Option<Rect> {
        self.layout.map(|layout| layout::inner(layout.list))
    }

    fn content_inner(&self) -> Option<Rect> {
        self.layout.map(|layout| layout::inner(layout.content))
    }

    pub fn subs_visible(&self) -> usize {
        self.list_inner().map_or(0, |rect| rect.height as usize)
    }

    pub fn posts_visible(&self) -> usize {
        self.content_inner()
            .map_or(0, |rect| rect.height as usize / POST_ENTRY_ROWS)
    }

    pub fn detail_visible(&self) -> usize {
        self.content_inner().map_or(0, |rect| {
            (rect.height as usize).saturating_sub(DETAIL_HEADER_ROWS)
        })
    }

    pub fn content_width(&self) -> usize {
        self.content_inner()
            .map_or(1, |rect| (rect.width as usize).max(1))
    }

    /// Wrap width of comment lines, right of the depth gutter.
    pub fn comment_width(&self) -> usize {
        self.content_width().saturating_sub(COMMENT_GUTTER).max(1)
    }

    pub fn comments_visible(&self) -> usize {
        self.content_inner().map_or(0, |rect| rect.height as usize)
    }

    /// Wrapped body of the post being read.
    pub fn detail_lines(&self) -> Vec<String> {
        match &self.detail_post {
            Some(post) => Wrapper::new(self.content_width())
                .wrap(&post.display_body())
                .collect(),
            None => Vec::new(),
        }
    }

    fn comment_key(&self) -> Option<CacheKey> {
        let post = self.comments_post.as_ref()?;
        let entry = self.forests.get(&post.id)?;
        Some(CacheKey::new(
            post.id.as_str(),
            self.comment_width(),
            entry.generation,
        ))
    }

    /// Validates the flattened comment lines against the current post, width
    /// and forest generation, rebuilding them when stale.
    pub fn comment_cache(&mut self) -> Option<&FlattenCache> {
        let width = self.comment_width();
        let now = self.clock.now();
        build_lines(
            &mut self.comment_lines,
            &self.forests,
            self.comments_post.as_ref(),
            width,
            now,
        )
    }

    /// Read-only access; `None` unless [`Engine::comment_cache`] already
    /// produced lines for the current key.
    pub fn cached_comment_lines(&self) -> Option<&FlattenCache> {
        let key = self.comment_key()?;
        self.comment_lines.get(&key)
    }

    pub fn comment_line_builds(&self) -> u64 {
        self.comment_lines.builds()
    }

    pub fn handle_resize(&mut self, width: u16, height: u16) {
        self.comment_lines.invalidate();
        match layout::compute(width, height) {
            Ok(layout) => {
                debug!(width, height, "layout recomputed");
                self.layout = Some(layout);
                self.too_small = None;
                self.clamp();
            }
            Err(err) => {
                debug!(width, height, "terminal below minimum size");
                self.too_small = Some(err);
            }
        }
    }

    /// Returns `false` when the user asked to quit.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            info!("quit requested");
            return false;
        }
        let keep_running = match self.view {
            View::List(pane) => self.list_key(pane, key.code),
            View::PostDetail => self.detail_key(key.code),
            View::Comments => self.comments_key(key.code),
        };
        self.clamp();
        keep_running
    }

    /// Runs the queued fetch, if any. Returns whether one ran.
    pub fn run_pending_fetch(&mut self) -> bool {
        let Some(fetch) = self.pending.take() else {
            return false;
        };
        match fetch {
            Fetch::Posts { subreddit } => self.load_posts(&subreddit),
            Fetch::Comments {
                post_id,
                expand_limit,
            } => self.load_comments(&post_id, expand_limit),
        }
        self.clamp();
        true
    }

    fn list_key(&mut self, pane: Pane, code: KeyCode) -> bool {
        let subs_len = self.settings.subreddits.len();
        let subs_visible = self.subs_visible();
        let posts_len = self.current_posts().len();
        let posts_visible = self.posts_visible();

        match (code, pane) {
            (KeyCode::Char('q'), _) => return false,
            (KeyCode::Down | KeyCode::Char('j'), Pane::Subs) => {
                self.move_subs(|subs| subs.down(subs_len, subs_visible))
            }
            (KeyCode::Up | KeyCode::Char('k'), Pane::Subs) => {
                self.move_subs(|subs| subs.up(subs_visible))
            }
            (KeyCode::PageDown, Pane::Subs) => {
                self.move_subs(|subs| subs.page_down(subs_len, subs_visible))
            }
            (KeyCode::PageUp, Pane::Subs) => self.move_subs(|subs| subs.page_up(subs_visible)),
            (KeyCode::Home, Pane::Subs) => self.move_subs(ListScroll::home),
            (KeyCode::End, Pane::Subs) => self.move_subs(|subs| subs.end(subs_len, subs_visible)),
            (KeyCode::Down | KeyCode::Char('j'), Pane::Posts) => {
                self.posts.down(posts_len, posts_visible)
            }
            (KeyCode::Up | KeyCode::Char('k'), Pane::Posts) => self.posts.up(posts_visible),
            (KeyCode::PageDown, Pane::Posts) => self.posts.page_down(posts_len, posts_visible),
            (KeyCode::PageUp, Pane::Posts) => self.posts.page_up(posts_visible),
            (KeyCode::Home, Pane::Posts) => self.posts.home(),
            (KeyCode::End, Pane::Posts) => self.posts.end(posts_len, posts_visible),
            (KeyCode::Tab, _) => {
                let next = match pane {
                    Pane::Subs => Pane::Posts,
                    Pane::Posts => Pane::Subs,
                };
                self.view = View::List(next);
                self.status.set(match next {
                    Pane::Posts => "Pane: Posts",
                    Pane::Subs => "Pane: Subreddits",
                });
            }
            (KeyCode::Enter, Pane::Subs) | (KeyCode::Char('r'), _) => self.refresh_posts(),
            (KeyCode::Enter, Pane::Posts) => match self.selected_post().cloned() {
                Some(post) => {
                    debug!(post = %post.id, "open post detail");
                    self.detail_post = Some(post);
                    self.detail.home();
                    self.view = View::PostDetail;
                    self.status.set("Viewing Post");
                }
                None => self.flash("Select post first (Tab -> Select)"),
            },
            (KeyCode::Char('c'), Pane::Posts) => match self.selected_post().cloned() {
                Some(post) => self.open_comments(post),
                None => self.flash("Select post first (Tab -> Select)"),
            },
            (KeyCode::Char('o'), Pane::Posts) => match self.selected_post() {
                Some(post) => {
                    let target = post.open_target();
                    self.open_link(&target);
                }
                None => self.flash("Select post first (Tab -> Select)"),
            },
            (KeyCode::Char('c' | 'o'), Pane::Subs) => {
                self.flash("Select post first (Tab -> Select)")
            }
            _ => {}
        }
        true
    }

    fn detail_key(&mut self, code: KeyCode) -> bool {
        let total = self.detail_lines().len();
        let visible = self.detail_visible();
        match code {
            KeyCode::Char('q') | KeyCode::Esc => self.back_to_posts(),
            KeyCode::Down | KeyCode::Char('j') => self.detail.down(total, visible),
            KeyCode::Up | KeyCode::Char('k') => self.detail.up(),
            KeyCode::PageDown => self.detail.page_down(total, visible),
            KeyCode::PageUp => self.detail.page_up(visible),
            KeyCode::Home => self.detail.home(),
            KeyCode::End => self.detail.end(total, visible),
            KeyCode::Char('o') => {
                if let Some(target) = self.detail_post.as_ref().map(Post::open_target) {
                    self.open_link(&target);
                }
            }
            _ => {}
        }
        true
    }

    fn comments_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.back_to_posts();
                return true;
            }
            KeyCode::Char('l') => {
                self.load_more();
                return true;
            }
            KeyCode::Char('r') => {
                if let Some(post) = &self.comments_post {
                    let fetch = Fetch::Comments {
                        post_id: post.id.clone(),
                        expand_limit: 0,
                    };
                    self.queue(fetch);
                }
                return true;
            }
            KeyCode::Char('o') => {
                if let Some(url) = self.comments_post.as_ref().map(Post::permalink_url) {
                    self.open_link(&url);
                }
                return true;
            }
            _ => {}
        }

        let visible = self.comments_visible();
        let width = self.comment_width();
        let now = self.clock.now();
        let Some(lines) = build_lines(
            &mut self.comment_lines,
            &self.forests,
            self.comments_post.as_ref(),
            width,
            now,
        ) else {
            return true;
        };
        let scroll = &mut self.comments;
        match code {
            KeyCode::Down | KeyCode::Char('j') => scroll.next(lines, visible),
            KeyCode::Up | KeyCode::Char('k') => scroll.prev(lines, visible),
            KeyCode::PageDown => scroll.page_down(lines.len(), visible),
            KeyCode::PageUp => scroll.page_up(visible),
            KeyCode::Home => scroll.home(),
            KeyCode::End => scroll.end(lines, visible),
            _ => {}
        }
        true
    }

    fn move_subs(&mut self, step: impl FnOnce(&mut ListScroll)) {
        let before = self.subs.selected;
        step(&mut self.subs);
        if self.subs.selected != before {
            self.posts.reset();
        }
    }

    fn refresh_posts(&mut self) {
        let Some(subreddit) = self.selected_subreddit().map(str::to_string) else {
            self.flash("No subreddits configured");
            return;
        };
        self.view = View::List(Pane::Posts);
        self.queue(Fetch::Posts { subreddit });
    }

    fn open_comments(&mut self, post: Post) {
        let same_post = self
            .comments_post
            .as_ref()
            .is_some_and(|current| current.id == post.id);
        if !same_post {
            self.comments.reset();
        }
        debug!(post = %post.id, cached = self.forests.contains_key(&post.id), "open comments");
        self.view = View::Comments;
        if self.forests.contains_key(&post.id) {
            let count = self.forests[&post.id].forest.len();
            self.status.set(format!("{count} comment items."));
        } else {
            self.queue(Fetch::Comments {
                post_id: post.id.clone(),
                expand_limit: 0,
            });
        }
        self.comments_post = Some(post);
    }

    fn load_more(&mut self) {
        let Some(post) = self.comments_post.as_ref() else {
            return;
        };
        let selected = self
            .forests
            .get(&post.id)
            .and_then(|entry| entry.forest.get(self.comments.selected));
        match selected {
            Some(CommentNode::More(stub)) if stub.is_expandable() => {
                let fetch = Fetch::Comments {
                    post_id: post.id.clone(),
                    expand_limit: self.settings.expand_batch,
                };
                self.queue(fetch);
                self.flash("Attempting to load more comments...");
            }
            Some(CommentNode::More(_)) => {
                self.flash("Thread continues elsewhere; press 'o' to open it")
            }
            Some(CommentNode::Comment(_)) => self.flash("Not a 'Load More' item."),
            None => self.flash("No comment selected?"),
        }
    }

    fn back_to_posts(&mut self) {
        self.view = View::List(Pane::Posts);
        let label = self
            .selected_subreddit()
            .map(|sub| format!("r/{sub}"))
            .unwrap_or_default();
        self.status.set(label);
    }

    fn queue(&mut self, fetch: Fetch) {
        debug!(?fetch, "fetch queued");
        self.status.set(fetch.status_message());
        self.pending = Some(fetch);
    }

    fn load_posts(&mut self, subreddit: &str) {
        let posts = match self
            .services
            .feed
            .fetch_posts(subreddit, self.settings.post_limit)
        {
            Ok(posts) => {
                info!(subreddit, count = posts.len(), "posts loaded");
                self.status
                    .set(format!("Loaded {} posts from r/{subreddit}.", posts.len()));
                posts
            }
            Err(err) => {
                warn!(subreddit, error = %format!("{err:#}"), "post fetch failed");
                self.flash(format!("Error fetching r/{subreddit}: {err:#}"));
                Vec::new()
            }
        };
        self.post_cache.insert(subreddit.to_string(), posts);
        if self.selected_subreddit() == Some(subreddit) {
            self.posts.reset();
        }
    }

    fn load_comments(&mut self, post_id: &str, expand_limit: usize) {
        let initial = expand_limit == 0;
        let forest = match self
            .services
            .comments
            .fetch_comments(post_id, expand_limit)
        {
            Ok(forest) => {
                info!(post = post_id, nodes = forest.len(), expand_limit, "comments loaded");
                self.status
                    .set(format!("Loaded {} comment items.", forest.len()));
                forest
            }
            Err(err) if !initial && self.forests.contains_key(post_id) => {
                warn!(post = post_id, error = %format!("{err:#}"), "load more failed");
                self.flash(format!("Error loading more comments: {err:#}"));
                return;
            }
            Err(err) => {
                warn!(post = post_id, error = %format!("{err:#}"), "comment fetch failed");
                self.flash(format!("Error fetching comments: {err:#}"));
                Forest::default()
            }
        };
        self.generation += 1;
        self.forests.insert(
            post_id.to_string(),
            ForestEntry {
                forest,
                generation: self.generation,
            },
        );
        let showing = self
            .comments_post
            .as_ref()
            .is_some_and(|post| post.id == post_id);
        if showing && initial {
            self.comments.reset();
        }
    }

    fn open_link(&mut self, url: &str) {
        match self.services.opener.open(url) {
            Ok(()) => {
                info!(url, "opened link");
                let preview: String = url.chars().take(OPENED_URL_PREVIEW).collect();
                self.flash(format!("Opened: {preview}..."));
            }
            Err(err) => {
                warn!(url, error = %format!("{err:#}"), "open link failed");
                self.flash(format!("Failed to open link: {err:#}"));
            }
        }
    }

    fn flash(&mut self, message: impl Into<String>) {
        let now = self.clock.instant();
        self.status.flash(message, now);
    }

    /// Pulls every index back inside its collection and window.
    fn clamp(&mut self) {
        if self.layout.is_none() {
            return;
        }
        let subs_len = self.settings.subreddits.len();
        let subs_visible = self.subs_visible();
        self.subs.clamp(subs_len, subs_visible);

        let posts_len = self.current_posts().len();
        let posts_visible = self.posts_visible();
        self.posts.clamp(posts_len, posts_visible);

        let detail_total = self.detail_lines().len();
        let detail_visible = self.detail_visible();
        self.detail.clamp(detail_total, detail_visible);

        if self.view == View::Comments {
            let visible = self.comments_visible();
            let width = self.comment_width();
            let now = self.clock.now();
            if let Some(lines) = build_lines(
                &mut self.comment_lines,
                &self.forests,
                self.comments_post.as_ref(),
                width,
                now,
            ) {
                self.comments.clamp(lines, visible);
            }
        }
    }
}

fn build_lines<'a>(
    lines: &'a mut CommentLines,
    forests: &HashMap<String, ForestEntry>,
    post: Option<&Post>,
    width: usize,
    now: DateTime<Utc>,
) -> Option<&'a FlattenCache> {
    let post = post?;
    let entry = forests.get(&post.id)?;
    let key = CacheKey::new(post.id.as_str(), width, entry.generation);
    Some(lines.get_or_build(key, &entry.forest, now))
}
