//! Filename policy for stored documents.
//!
//! A filename accepted here is safe to use as a single path segment and as a
//! table key: it has no separators, cannot climb out of its directory, carries
//! a Markdown extension and avoids names that some platforms reserve.

use std::fmt;
use std::path::Path;

use thiserror::Error;

/// Maximum filename length in bytes.
pub const MAX_FILENAME_BYTES: usize = 255;

/// Extensions accepted for documents (compared case-insensitively).
pub const ALLOWED_EXTENSIONS: &[&str] = &[".md", ".markdown"];

/// Device names reserved on Windows, matched against the base name.
pub const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Punctuation that may not appear anywhere in a filename.
pub const FORBIDDEN_CHARS: &[char] = &[
    '<', '>', ':', '"', '/', '\\', '|', '?', '*', '+', ',', '!', '%', '@',
];

/// Reason a filename was rejected.
///
/// Rules are checked in declaration order and the first failure wins.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidFilename {
    /// The filename is empty.
    #[error("filename is empty")]
    Empty,

    /// The filename consists only of whitespace.
    #[error("filename consists only of spaces")]
    OnlySpaces,

    /// The filename is longer than the limit.
    #[error("filename is longer than {max} bytes")]
    TooLong { max: usize },

    /// The filename is not valid UTF-8 or contains forbidden characters.
    ///
    /// `chars` is empty when the input was not valid UTF-8.
    #[error("filename contains invalid characters: {}", DisplayChars(.chars))]
    InvalidCharacters { chars: Vec<char> },

    /// The filename contains a path or would leave its directory.
    #[error("filename must not contain a path")]
    PathInFilename,

    /// The extension is not one of the allowed ones.
    #[error("filename extension must be one of {}", .allowed.join(", "))]
    BadExtension { allowed: &'static [&'static str] },

    /// Nothing is left once the extension is removed.
    #[error("filename is empty without its extension")]
    EmptyAfterExtension,

    /// The base name consists only of dots.
    #[error("filename consists only of dots")]
    OnlyDots,

    /// The filename ends with a dot or a space.
    #[error("filename must not end with a dot or a space")]
    TrailingDotOrSpace,

    /// The base name is a reserved device name.
    #[error("filename {name} is reserved")]
    Reserved { name: String },
}

impl InvalidFilename {
    /// Stable reason code for this rejection.
    pub fn code(&self) -> &'static str {
        match self {
            InvalidFilename::Empty => "EMPTY",
            InvalidFilename::OnlySpaces => "ONLY_SPACES",
            InvalidFilename::TooLong { .. } => "TOO_LONG",
            InvalidFilename::InvalidCharacters { .. } => "INVALID_CHARACTERS",
            InvalidFilename::PathInFilename => "PATH_IN_FILENAME",
            InvalidFilename::BadExtension { .. } => "BAD_EXTENSION",
            InvalidFilename::EmptyAfterExtension => "EMPTY_AFTER_EXT",
            InvalidFilename::OnlyDots => "ONLY_DOTS",
            InvalidFilename::TrailingDotOrSpace => "TRAILING_DOT_SPACE",
            InvalidFilename::Reserved { .. } => "RESERVED",
        }
    }

    /// Offending characters rendered for display, control characters as `U+XX`.
    pub fn rendered_chars(&self) -> Vec<String> {
        match self {
            InvalidFilename::InvalidCharacters { chars } => {
                chars.iter().map(|&c| render_char(c)).collect()
            }
            _ => Vec::new(),
        }
    }
}

struct DisplayChars<'a>(&'a [char]);

impl fmt::Display for DisplayChars<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("not valid UTF-8");
        }
        let rendered: Vec<String> = self.0.iter().map(|&c| render_char(c)).collect();
        f.write_str(&rendered.join(" "))
    }
}

fn render_char(c: char) -> String {
    if is_control(c) {
        format!("U+{:02X}", c as u32)
    } else {
        c.to_string()
    }
}

fn is_control(c: char) -> bool {
    (c as u32) <= 0x1F || c as u32 == 0x7F
}

/// Validate a filename.
///
/// # Examples
///
/// ```
/// use mdstore::storage::{validate_filename, InvalidFilename};
///
/// assert!(validate_filename("notes.md").is_ok());
/// assert_eq!(
///     validate_filename("../secret.md"),
///     Err(InvalidFilename::PathInFilename)
/// );
/// ```
pub fn validate_filename(filename: &str) -> Result<(), InvalidFilename> {
    validate_filename_bytes(filename.as_bytes()).map(|_| ())
}

/// Validate a filename given as raw bytes.
///
/// Returns the filename as `&str` when it is accepted.
pub fn validate_filename_bytes(raw: &[u8]) -> Result<&str, InvalidFilename> {
    if raw.is_empty() {
        return Err(InvalidFilename::Empty);
    }

    let decoded = std::str::from_utf8(raw);

    if let Ok(s) = decoded {
        if s.trim().is_empty() {
            return Err(InvalidFilename::OnlySpaces);
        }
    }

    if raw.len() > MAX_FILENAME_BYTES {
        return Err(InvalidFilename::TooLong {
            max: MAX_FILENAME_BYTES,
        });
    }

    let name = decoded.map_err(|_| InvalidFilename::InvalidCharacters { chars: Vec::new() })?;

    check_single_segment(name)?;

    let base = strip_allowed_extension(name)?;

    if base.is_empty() {
        return Err(InvalidFilename::EmptyAfterExtension);
    }

    if base.chars().all(|c| c == '.') {
        return Err(InvalidFilename::OnlyDots);
    }

    if has_trailing_dot_or_space(name) {
        return Err(InvalidFilename::TrailingDotOrSpace);
    }

    if let Some(reserved) = reserved_name(base) {
        return Err(InvalidFilename::Reserved {
            name: reserved.to_string(),
        });
    }

    let invalid = invalid_chars(name);
    if !invalid.is_empty() {
        return Err(InvalidFilename::InvalidCharacters { chars: invalid });
    }

    Ok(name)
}

fn check_single_segment(name: &str) -> Result<(), InvalidFilename> {
    if name.contains('/') || name.contains('\\') {
        return Err(InvalidFilename::PathInFilename);
    }

    // "." and ".." have no file name component
    match Path::new(name).file_name() {
        Some(last) if last == name => Ok(()),
        _ => Err(InvalidFilename::PathInFilename),
    }
}

/// Return the base name if the extension is allowed.
fn strip_allowed_extension(name: &str) -> Result<&str, InvalidFilename> {
    let bad = InvalidFilename::BadExtension {
        allowed: ALLOWED_EXTENSIONS,
    };

    let dot = name.rfind('.').ok_or(bad.clone())?;
    let ext = name[dot..].to_ascii_lowercase();

    if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(&name[..dot])
    } else {
        Err(bad)
    }
}

fn has_trailing_dot_or_space(name: &str) -> bool {
    name.ends_with('.') || name.ends_with(' ')
}

fn reserved_name(base: &str) -> Option<&'static str> {
    RESERVED_NAMES
        .iter()
        .copied()
        .find(|reserved| base.eq_ignore_ascii_case(reserved))
}

/// Collect forbidden characters, de-duplicated, in order of first appearance.
fn invalid_chars(name: &str) -> Vec<char> {
    let mut found = Vec::new();
    for c in name.chars() {
        if (is_control(c) || FORBIDDEN_CHARS.contains(&c)) && !found.contains(&c) {
            found.push(c);
        }
    }
    found
}
