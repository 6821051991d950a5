#![forbid(unsafe_code)]

pub mod api;
pub mod cache;
pub mod classify;
pub mod cli;
pub mod command;
pub mod entity;
pub mod error;
pub mod geometry;
pub mod journal;
pub mod layers;
pub mod modes;
pub mod remote_import;
pub mod runtime;
pub mod script;
pub mod selection;
pub mod session;
pub mod settings;
pub mod util;
pub mod viewport;
pub mod workflows;

pub use cli::run_from_env;
pub use error::{EditorError, Result};
