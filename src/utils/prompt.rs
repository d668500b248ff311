//! Interactive terminal prompts.

use std::io::{self, Write};

use zeroize::Zeroizing;

use crate::error::{Result, SyncError};

/// Prompt for a password with hidden input.
pub fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    eprint!("{}: ", prompt);
    io::stderr().flush()?;

    let password = Zeroizing::new(rpassword::read_password()?);
    if password.is_empty() {
        return Err(SyncError::validation("password cannot be empty"));
    }
    Ok(password)
}

/// Prompt twice and require both entries to match.
pub fn prompt_password_with_confirm(prompt: &str) -> Result<Zeroizing<String>> {
    let first = prompt_password(prompt)?;

    eprint!("Confirm password: ");
    io::stderr().flush()?;
    let second = Zeroizing::new(rpassword::read_password()?);

    if *first != *second {
        return Err(SyncError::validation("passwords do not match"));
    }
    Ok(first)
}

/// Ask a yes/no question; anything but `y`/`yes` is no.
pub fn confirm(question: &str) -> Result<bool> {
    eprint!("{} [y/N]: ", question);
    io::stderr().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
