#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod auth;
pub mod config;
pub mod data;
pub mod flatten;
pub mod layout;
pub mod logging;
pub mod model;
pub mod reddit;
pub mod render;
pub mod scroll;
pub mod state;
pub mod wrap;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, Options};
