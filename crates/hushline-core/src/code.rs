//! Session codes.
//!
//! A session code is the shared out-of-band secret two or more clients use to
//! find each other. The relay never generates codes, it only validates their
//! shape: exactly 16 characters from the printable ASCII range
//! (`0x20..=0x7E`). Comparison is byte-wise and case-sensitive.

use std::fmt;

use thiserror::Error;

/// Required length of a session code, in characters.
pub const CODE_LEN: usize = 16;

/// Reserved code used by uptime probes.
///
/// Any envelope carrying this value as its `code` is answered with `pong`,
/// whatever its declared type.
pub const HEALTHCHECK_CODE: &str = "1111111111111111";

/// Why a candidate code was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    /// Code is not exactly [`CODE_LEN`] characters long
    #[error("session code must be {CODE_LEN} characters, got {len}")]
    InvalidLength {
        /// Length of the rejected code, in characters
        len: usize,
    },

    /// Code contains a character outside printable ASCII
    #[error("session code has a non-printable or non-ASCII character at position {position}")]
    InvalidCharacter {
        /// Zero-based character position of the first offending character
        position: usize,
    },
}

/// A validated session code.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionCode(String);

impl SessionCode {
    /// Validate `raw` and wrap it.
    ///
    /// # Errors
    ///
    /// Returns [`CodeError`] if `raw` is not 16 printable ASCII characters.
    pub fn parse(raw: &str) -> Result<Self, CodeError> {
        let len = raw.chars().count();
        if len != CODE_LEN {
            return Err(CodeError::InvalidLength { len });
        }

        if let Some(position) = raw.chars().position(|c| !matches!(c, '\x20'..='\x7e')) {
            return Err(CodeError::InvalidCharacter { position });
        }

        Ok(Self(raw.to_owned()))
    }

    /// Borrow the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the [`HEALTHCHECK_CODE`] sentinel.
    pub fn is_healthcheck(&self) -> bool {
        self.0 == HEALTHCHECK_CODE
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Codes are shared secrets, keep most of them out of debug logs.
impl fmt::Debug for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(4).collect();
        write!(f, "SessionCode({prefix}…)")
    }
}

impl AsRef<str> for SessionCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
