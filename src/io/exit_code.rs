//! Process exit codes. `0` and `1` keep their usual meaning, `2` tells
//! scripts to stop, and each code from `3` up names one recoverable failure.

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    /// Data on disk is unusable and was not repaired automatically.
    BlockingError = 2,
    NotFound = 3,
    InvalidInput = 4,
    IoError = 5,
    ConfigError = 6,
    /// Another process held the collection lock for too long.
    LockTimeout = 7,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl ExitCode {
    /// An empty search is reported as `NotFound` so scripts can branch on it.
    pub fn from_results<T>(results: &[T]) -> Self {
        match results {
            [] => Self::NotFound,
            _ => Self::Success,
        }
    }

    pub fn from_error(error: &StoreError) -> Self {
        match error {
            StoreError::CollectionNotFound { .. } => ExitCode::NotFound,
            StoreError::InvalidDimension { .. }
            | StoreError::InvalidParameters { .. }
            | StoreError::CollectionExists { .. } => ExitCode::InvalidInput,
            StoreError::FileRead { .. } | StoreError::FileWrite { .. } => ExitCode::IoError,
            StoreError::LockTimeout { .. } => ExitCode::LockTimeout,
            // Index corruption is repaired by rebuilding, record and metadata
            // corruption is not
            StoreError::RecordCorrupt { .. } | StoreError::Serialization { .. } => {
                ExitCode::BlockingError
            }
            _ => ExitCode::GeneralError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_codes_are_stable() {
        let codes: Vec<i32> = [
            ExitCode::Success,
            ExitCode::BlockingError,
            ExitCode::NotFound,
            ExitCode::ConfigError,
            ExitCode::LockTimeout,
        ]
        .into_iter()
        .map(i32::from)
        .collect();
        assert_eq!(codes, vec![0, 2, 3, 6, 7]);
    }

    #[test]
    fn test_from_error() {
        let missing = StoreError::CollectionNotFound {
            name: "code".to_string(),
        };
        assert_eq!(ExitCode::from_error(&missing), ExitCode::NotFound);

        let timeout = StoreError::LockTimeout {
            path: PathBuf::from(".metadata.lock"),
            waited: Duration::from_millis(50),
        };
        assert_eq!(ExitCode::from_error(&timeout), ExitCode::LockTimeout);

        let dim = StoreError::InvalidDimension {
            expected: 8,
            actual: 3,
        };
        assert_eq!(ExitCode::from_error(&dim), ExitCode::InvalidInput);
    }

    #[test]
    fn test_from_results() {
        assert_eq!(ExitCode::from_results(&[1]), ExitCode::Success);
        assert_eq!(ExitCode::from_results::<u8>(&[]), ExitCode::NotFound);
    }
}
