//! Utility functions shared across the application.

mod parsing;
pub(crate) mod permissions;
pub mod prompt;

pub use parsing::{parse_setting, parse_settings};
pub use permissions::restrict_file_permissions;
