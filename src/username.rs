//! Validation of candidate usernames before they are substituted into URLs.

use thiserror::Error;

/// Longest username accepted on the command line or through the API.
pub const MAX_USERNAME_LENGTH: usize = 100;

/// Characters that would change the structure of a URL if substituted raw.
const URL_STRUCTURAL: &[char] = &['/', '?', '#', '%', '\\'];

/// A username that cannot be checked at all.
///
/// Unlike a site's `regexCheck`, which only makes a username illegal on one
/// site, these errors reject the input before any site is contacted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum UsageError {
    /// The username is empty.
    #[error("username cannot be empty")]
    Empty,
    /// The username is longer than [`MAX_USERNAME_LENGTH`].
    #[error("username `{username}` is too long (max {MAX_USERNAME_LENGTH} characters)")]
    TooLong {
        /// The rejected username.
        username: String,
    },
    /// The username contains whitespace, a control character, or a character
    /// with meaning inside a URL.
    #[error("invalid character {ch:?} in username `{username}`")]
    InvalidCharacter {
        /// The offending character.
        ch: char,
        /// The rejected username.
        username: String,
    },
}

/// Check that `username` can be substituted into a site URL template.
///
/// ```
/// use socialname::username::{validate_username, UsageError};
///
/// assert!(validate_username("octocat").is_ok());
/// assert_eq!(validate_username(""), Err(UsageError::Empty));
/// ```
///
/// # Errors
///
/// Returns a [`UsageError`] describing the first problem found.
pub fn validate_username(username: &str) -> Result<(), UsageError> {
    if username.is_empty() {
        return Err(UsageError::Empty);
    }

    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(UsageError::TooLong {
            username: username.into(),
        });
    }

    for ch in username.chars() {
        if ch.is_whitespace() || ch.is_control() || URL_STRUCTURAL.contains(&ch) {
            return Err(UsageError::InvalidCharacter {
                ch,
                username: username.into(),
            });
        }
    }

    Ok(())
}
