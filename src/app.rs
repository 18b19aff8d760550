use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use crossterm::event::{self, Event, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tracing::{info, warn};

use crate::auth;
use crate::config::{self, Config};
use crate::data;
use crate::logging;
use crate::reddit;
use crate::render;
use crate::state::{Engine, Services};

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub config_file: Option<PathBuf>,
    /// Browse generated sample content; no credentials or network needed.
    pub demo: bool,
}

pub fn run(options: Options) -> Result<()> {
    let config_path = options.config_file.clone().or_else(config::default_path);
    if !options.demo {
        if let Some(path) = config_path.as_ref().filter(|path| !path.exists()) {
            config::write_default(path).context("write default config")?;
            println!(
                "Created a default config at {}.\nAdd your Reddit script-app credentials there and run redcli again.",
                friendly_path(Some(path))
            );
            return Ok(());
        }
    }

    let cfg = config::load(config::LoadOptions {
        config_file: options.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;

    match logging::init(&cfg.logging) {
        Ok(path) => info!(log = %path.display(), version = crate::VERSION, "starting redcli"),
        Err(err) => eprintln!("warning: logging disabled: {err:#}"),
    }

    let (services, greeting) = if options.demo {
        demo_services()
    } else {
        reddit_services(&cfg, config_path.as_deref())?
    };

    let mut engine = Engine::new(cfg.engine_settings(), services);
    engine.set_status(greeting);
    run_terminal(&mut engine, cfg.ui.poll_interval)
}

fn demo_services() -> (Services, String) {
    let services = Services {
        feed: Arc::new(data::MockFeedService::default()),
        comments: Arc::new(data::MockCommentService::default()),
        opener: Arc::new(data::BrowserOpener),
    };
    (
        services,
        "Demo mode | Select subreddit and press Enter".to_string(),
    )
}

fn reddit_services(cfg: &Config, config_path: Option<&Path>) -> Result<(Services, String)> {
    let missing = cfg.reddit.missing_credentials();
    if !missing.is_empty() {
        bail!(
            "config: missing reddit.{} in {} (or run with --demo)",
            missing.join(", reddit."),
            friendly_path(config_path)
        );
    }

    let grant = Arc::new(
        auth::PasswordGrant::new(auth::Config::from(&cfg.reddit)).context("set up reddit auth")?,
    );
    // A failed login still opens the UI; fetches then report the error.
    let greeting = match grant.verify() {
        Ok(name) => format!("u/{name} | Select subreddit and press Enter"),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "reddit authentication failed");
            format!("Reddit API/Auth Error: {err:#}")
        }
    };

    let client = Arc::new(
        reddit::Client::new(
            grant,
            reddit::ClientConfig {
                user_agent: cfg.reddit.user_agent.clone(),
                ..reddit::ClientConfig::default()
            },
        )
        .context("create reddit client")?,
    );
    let services = Services {
        feed: Arc::new(data::RedditFeedService::new(client.clone())),
        comments: Arc::new(data::RedditCommentService::new(
            client,
            cfg.settings.comment_limit.max(1),
        )),
        opener: Arc::new(data::BrowserOpener),
    };
    Ok((services, greeting))
}

fn run_terminal(engine: &mut Engine, poll_interval: Duration) -> Result<()> {
    let mut stdout = io::stdout();
    enable_raw_mode()?;
    stdout.execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let result = event_loop(engine, &mut terminal, poll_interval);

    disable_raw_mode()?;
    terminal.backend_mut().execute(LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn event_loop(
    engine: &mut Engine,
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    poll_interval: Duration,
) -> Result<()> {
    let size = terminal.size()?;
    engine.handle_resize(size.width, size.height);

    loop {
        draw(engine, terminal)?;

        // The frame above already shows the loading message.
        if engine.run_pending_fetch() {
            continue;
        }

        // Polling with a timeout lets an expired status message clear without input.
        if !event::poll(poll_interval)? {
            continue;
        }
        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                if !engine.handle_key(key) {
                    break;
                }
            }
            Event::Resize(width, height) => engine.handle_resize(width, height),
            _ => {}
        }
    }

    info!("exiting");
    Ok(())
}

fn draw(engine: &mut Engine, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    let plan = render::plan(engine);
    terminal.draw(|frame| render::paint(&plan, frame.buffer_mut()))?;
    Ok(())
}

fn friendly_path(path: Option<&Path>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/redcli/config.yaml".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn friendly_path_shortens_home() {
        if let Some(home) = dirs::home_dir() {
            let path = home.join(".config").join("redcli").join("config.yaml");
            assert_eq!(friendly_path(Some(&path)), "~/.config/redcli/config.yaml");
        }
        assert_eq!(friendly_path(None), "~/.config/redcli/config.yaml");
        assert_eq!(
            friendly_path(Some(Path::new("/etc/redcli.yaml"))),
            "/etc/redcli.yaml"
        );
    }

    #[test]
    fn missing_credentials_abort_before_network() {
        let err = match reddit_services(&Config::default(), None) {
            Ok(_) => panic!("expected missing credentials error"),
            Err(err) => err,
        };
        let message = err.to_string();
        assert!(message.contains("reddit.client_id"));
        assert!(message.contains("--demo"));
    }
}
