use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use redcli::data::{
    CommentService, MockCommentService, MockFeedService, RecordingOpener,
};
use redcli::flatten::LineKind;
use redcli::model::{Comment, CommentNode, Forest, MoreStub};
use redcli::render::{self, Draw};
use redcli::scroll::{max_top, ListScroll};
use redcli::state::{Clock, Engine, Fetch, Pane, Services, Settings, View};

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }
}

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

fn press(engine: &mut Engine, code: KeyCode) -> bool {
    engine.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
}

fn press_n(engine: &mut Engine, code: KeyCode, times: usize) {
    for _ in 0..times {
        press(engine, code);
    }
}

fn texts(plan: &[Draw]) -> Vec<String> {
    plan.iter()
        .filter_map(|draw| match draw {
            Draw::Text { text, .. } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

struct Harness {
    engine: Engine,
    comments: Arc<MockCommentService>,
    opener: Arc<RecordingOpener>,
}

fn harness(feed: MockFeedService, comments: MockCommentService) -> Harness {
    let comments = Arc::new(comments);
    let opener = Arc::new(RecordingOpener::default());
    let services = Services {
        feed: Arc::new(feed),
        comments: comments.clone(),
        opener: opener.clone(),
    };
    let engine = Engine::with_clock(
        Settings::default(),
        services,
        Arc::new(FixedClock(epoch())),
    );
    Harness {
        engine,
        comments,
        opener,
    }
}

fn default_harness() -> Harness {
    harness(
        MockFeedService::new(epoch()).per_subreddit(20),
        MockCommentService::new(epoch()),
    )
}

/// Loads the first subreddit and opens comments of its first post.
fn open_first_comments(engine: &mut Engine) -> String {
    press(engine, KeyCode::Enter);
    engine.run_pending_fetch();
    press(engine, KeyCode::Char('c'));
    let post_id = match engine.pending() {
        Some(Fetch::Comments {
            post_id,
            expand_limit: 0,
        }) => post_id.clone(),
        other => panic!("expected initial comment fetch, got {other:?}"),
    };
    engine.run_pending_fetch();
    post_id
}

#[test]
fn post_list_scrolls_after_fifth_entry() {
    let mut h = default_harness();
    // 13 rows: 12 for panes, 10 inside the border, five two-row posts.
    h.engine.handle_resize(100, 13);
    press(&mut h.engine, KeyCode::Enter);
    h.engine.run_pending_fetch();
    assert_eq!(h.engine.view(), View::List(Pane::Posts));
    assert_eq!(h.engine.posts_visible(), 5);

    press_n(&mut h.engine, KeyCode::Down, 4);
    assert_eq!(h.engine.posts_scroll(), ListScroll { selected: 4, top: 0 });
    press(&mut h.engine, KeyCode::Down);
    assert_eq!(h.engine.posts_scroll(), ListScroll { selected: 5, top: 1 });

    press(&mut h.engine, KeyCode::End);
    assert_eq!(h.engine.posts_scroll(), ListScroll { selected: 19, top: 15 });
    press(&mut h.engine, KeyCode::PageUp);
    assert_eq!(h.engine.posts_scroll(), ListScroll { selected: 15, top: 11 });
}

#[test]
fn loading_frame_precedes_fetch() {
    let mut h = default_harness();
    h.engine.handle_resize(100, 30);
    assert!(texts(&render::plan(&mut h.engine))
        .contains(&"(Press Enter in left pane to load)".to_string()));

    press(&mut h.engine, KeyCode::Enter);
    let frame = texts(&render::plan(&mut h.engine));
    assert!(frame.contains(&"Fetching r/commandline...".to_string()));

    h.engine.run_pending_fetch();
    let frame = texts(&render::plan(&mut h.engine));
    assert!(frame.contains(&"> Sample post 0 in r/commandline".to_string()));
    assert!(frame.iter().any(|text| text == "[S]"));
}

#[test]
fn comments_view_flow_and_load_more() {
    let mut h = default_harness();
    h.engine.handle_resize(100, 40);
    let post_id = open_first_comments(&mut h.engine);
    assert_eq!(h.engine.view(), View::Comments);
    assert_eq!(h.engine.forest(&post_id).map(Forest::len), Some(7));

    press(&mut h.engine, KeyCode::Char('l'));
    assert!(h.engine.pending().is_none());
    assert_eq!(h.engine.status_text(), "Not a 'Load More' item.");

    press_n(&mut h.engine, KeyCode::Down, 3);
    assert_eq!(h.engine.comments_scroll().selected, 3);
    press(&mut h.engine, KeyCode::Char('l'));
    assert_eq!(
        h.engine.pending(),
        Some(&Fetch::Comments {
            post_id: post_id.clone(),
            expand_limit: 10
        })
    );
    assert!(texts(&render::plan(&mut h.engine)).contains(&"Fetching comments...".to_string()));
    h.engine.run_pending_fetch();

    assert_eq!(
        h.comments.calls(),
        vec![(post_id.clone(), 0), (post_id.clone(), 10)]
    );
    assert_eq!(h.engine.forest(&post_id).map(Forest::len), Some(9));
    assert_eq!(h.engine.comments_scroll().selected, 3);
    assert_eq!(h.engine.status_text(), "Loaded 9 comment items.");

    // Back and forth to the same post neither refetches nor resets.
    press(&mut h.engine, KeyCode::Esc);
    assert_eq!(h.engine.view(), View::List(Pane::Posts));
    press(&mut h.engine, KeyCode::Char('c'));
    assert!(h.engine.pending().is_none());
    assert_eq!(h.engine.comments_scroll().selected, 3);
    assert_eq!(h.comments.calls().len(), 2);
}

#[test]
fn failed_load_more_keeps_thread_and_reports() {
    let mut h = harness(
        MockFeedService::new(epoch()),
        MockCommentService::new(epoch()).failing_expansion(),
    );
    h.engine.handle_resize(100, 40);
    let post_id = open_first_comments(&mut h.engine);
    assert_eq!(h.engine.forest(&post_id).map(Forest::len), Some(7));

    press_n(&mut h.engine, KeyCode::Down, 3);
    press(&mut h.engine, KeyCode::Char('l'));
    h.engine.run_pending_fetch();

    assert_eq!(h.comments.calls().len(), 2);
    assert_eq!(h.engine.forest(&post_id).map(Forest::len), Some(7));
    assert_eq!(h.engine.comments_scroll().selected, 3);
    assert!(h
        .engine
        .status_text()
        .starts_with("Error loading more comments: "));
    assert!(!h.engine.status_text().starts_with("Loaded"));
}

#[test]
fn resize_rewraps_comments_and_keeps_selection() {
    let mut h = default_harness();
    h.engine.handle_resize(100, 40);
    open_first_comments(&mut h.engine);
    press_n(&mut h.engine, KeyCode::Down, 2);

    render::plan(&mut h.engine);
    let wide = h.engine.cached_comment_lines().unwrap().len();
    let builds = h.engine.comment_line_builds();

    // The resize re-clamps against freshly wrapped lines before any frame.
    h.engine.handle_resize(40, 40);
    assert_eq!(h.engine.comment_line_builds(), builds + 1);
    let width = h.engine.comment_width();
    assert_eq!(width, 17);
    let narrow = h.engine.cached_comment_lines().unwrap();
    assert!(narrow.len() > wide);
    assert!(narrow
        .lines()
        .iter()
        .filter(|line| line.kind == LineKind::Body)
        .all(|line| line.text.chars().count() <= width));
    assert_eq!(h.engine.comments_scroll().selected, 2);

    render::plan(&mut h.engine);
    assert_eq!(h.engine.comment_line_builds(), builds + 1);
}

/// First fetch returns a long thread ending in a stub, later ones a short one.
struct ShrinkingComments {
    calls: Mutex<usize>,
}

impl CommentService for ShrinkingComments {
    fn fetch_comments(&self, _post_id: &str, _expand_limit: usize) -> Result<Forest> {
        let mut calls = self.calls.lock();
        *calls += 1;
        let count = if *calls == 1 { 30 } else { 2 };
        let mut nodes: Vec<CommentNode> = (0..count)
            .map(|idx| {
                CommentNode::Comment(Comment {
                    id: format!("c{idx}"),
                    depth: idx % 3,
                    author: Some("shrinker".into()),
                    score: 1,
                    created_at: epoch() - Duration::minutes(idx as i64),
                    body: format!("comment number {idx}\nsecond line"),
                })
            })
            .collect();
        nodes.push(CommentNode::More(MoreStub {
            depth: 0,
            count: 4,
            token: "more".into(),
            children: vec!["x".into()],
        }));
        Ok(Forest::new(nodes))
    }
}

#[test]
fn shrinking_thread_clamps_scroll() {
    let opener = Arc::new(RecordingOpener::default());
    let services = Services {
        feed: Arc::new(MockFeedService::new(epoch())),
        comments: Arc::new(ShrinkingComments {
            calls: Mutex::new(0),
        }),
        opener,
    };
    let mut engine = Engine::with_clock(
        Settings::default(),
        services,
        Arc::new(FixedClock(epoch())),
    );
    engine.handle_resize(100, 20);
    open_first_comments(&mut engine);

    press(&mut engine, KeyCode::End);
    let before = engine.comments_scroll();
    assert_eq!(before.selected, 30);
    assert!(before.top > 0);

    press(&mut engine, KeyCode::Char('l'));
    engine.run_pending_fetch();

    let total = engine.cached_comment_lines().unwrap().len();
    let after = engine.comments_scroll();
    assert!(after.selected <= 2);
    assert!(after.top <= max_top(total, engine.comments_visible()));
    assert!(!render::plan(&mut engine).is_empty());
}

#[test]
fn fetch_errors_become_placeholders() {
    let mut h = harness(
        MockFeedService::new(epoch()).failing("commandline"),
        MockCommentService::new(epoch()),
    );
    h.engine.handle_resize(100, 30);
    press(&mut h.engine, KeyCode::Enter);
    h.engine.run_pending_fetch();
    let frame = texts(&render::plan(&mut h.engine));
    assert!(frame.contains(&"(No posts found or error)".to_string()));
    assert!(frame
        .iter()
        .any(|text| text.starts_with("Error fetching r/commandline")));

    let mut h = harness(
        MockFeedService::new(epoch()),
        MockCommentService::new(epoch()).failing("commandline0"),
    );
    h.engine.handle_resize(100, 30);
    open_first_comments(&mut h.engine);
    let frame = texts(&render::plan(&mut h.engine));
    assert!(frame.contains(&"(No comments found or error)".to_string()));
}

#[test]
fn post_detail_and_open_link() {
    let mut h = default_harness();
    h.engine.handle_resize(100, 30);
    press(&mut h.engine, KeyCode::Enter);
    h.engine.run_pending_fetch();
    press_n(&mut h.engine, KeyCode::Down, 2);
    press(&mut h.engine, KeyCode::Enter);
    assert_eq!(h.engine.view(), View::PostDetail);

    let frame = texts(&render::plan(&mut h.engine));
    assert!(frame.contains(&"Sample post 2 in r/commandline".to_string()));
    assert!(frame.contains(&"Link Post URL:".to_string()));
    assert!(frame.contains(&"https://example.com/commandline/2".to_string()));

    press(&mut h.engine, KeyCode::Char('o'));
    assert_eq!(h.opener.opened(), vec!["https://example.com/commandline/2"]);
    assert!(h.engine.status_text().starts_with("Opened: https://example.com"));

    press(&mut h.engine, KeyCode::Char('q'));
    assert_eq!(h.engine.view(), View::List(Pane::Posts));
    assert_eq!(h.engine.status_text(), "r/commandline");
}

#[test]
fn tiny_terminal_renders_one_diagnostic() {
    let mut h = default_harness();
    h.engine.handle_resize(20, 3);
    let plan = render::plan(&mut h.engine);
    assert_eq!(texts(&plan), vec!["Terminal too small (20x3)".to_string()]);
}
