use std::fmt;
use std::path::PathBuf;

use tripdata_core::PartitionKey;
use url::Url;

/// One partition to download into `dest_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchJob {
    pub key: PartitionKey,
    pub url: Url,
    pub dest_dir: PathBuf,
    pub file_name: String,
}

/// A downloaded partition. The caller owns the file and must delete it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub key: PartitionKey,
    pub path: PathBuf,
    pub byte_len: u64,
    pub attempts: u32,
}

/// Outcome of one fetch, delivered in enumeration order.
#[derive(Debug)]
pub struct FetchEvent {
    pub key: PartitionKey,
    pub result: Result<FetchedFile, FetchFailure>,
}

/// Failure of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    Network,
    LocalIo,
}

impl FailureKind {
    /// Transport errors and bad statuses are worth another attempt; local
    /// disk problems and malformed addresses are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::HttpStatus(_) | FailureKind::Timeout | FailureKind::Network
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::LocalIo => write!(f, "local io error"),
        }
    }
}

impl std::error::Error for FetchError {}

/// Permanent failure of a partition after the retry loop gave up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchFailure {
    #[error("gave up after {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: u32, last_error: FetchError },
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

impl FetchFailure {
    pub fn attempts(&self) -> u32 {
        match self {
            FetchFailure::Exhausted { attempts, .. } | FetchFailure::Cancelled { attempts } => {
                *attempts
            }
        }
    }
}
