//! Well-known payload keys written by the indexer

use std::fmt;

/// Strongly-typed payload keys to avoid string literals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKey {
    /// Source file the chunk was cut from
    FilePath,
    /// First line of the chunk (1-based)
    LineStart,
    /// Last line of the chunk (inclusive)
    LineEnd,
    /// Language of the source file
    Language,
    /// Branches the chunk is visible on
    Branches,
}

impl PayloadKey {
    /// Get the string key used in the record payload
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FilePath => "file_path",
            Self::LineStart => "line_start",
            Self::LineEnd => "line_end",
            Self::Language => "language",
            Self::Branches => "branches",
        }
    }
}

impl fmt::Display for PayloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
