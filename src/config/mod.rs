//! Process configuration (`certsync.kdl`).

mod loader;
mod types;

pub use types::{Config, Defaults, expand_tilde};
