use crate::query::CursorState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WysciError {
    #[error("metadata error: {0}")]
    Metadata(String),
    #[error("scan error: {0}")]
    Scan(String),
    #[error("driver error: {0}")]
    Driver(String),
    #[error("sink error: {0}")]
    Sink(#[from] std::io::Error),
    #[error("cursor is {0}")]
    CursorUnavailable(CursorState),
    #[error("stream cancelled")]
    Cancelled,
    #[error("config error: {0}")]
    Config(String),
    #[error("column error: {0}")]
    Column(String),
}

/// A sink write that failed after `written` bytes had already been accepted.
#[derive(Debug, Error)]
#[error("write failed after {written} bytes: {source}")]
pub struct WriteFailure {
    pub written: usize,
    #[source]
    pub source: std::io::Error,
}

/// Returned by `QueryProcessor`: the first error plus every byte committed to
/// the sink before it.
#[derive(Debug, Error)]
#[error("stream stopped after {bytes_written} bytes: {source}")]
pub struct ProcessError {
    pub bytes_written: usize,
    #[source]
    pub source: WysciError,
}

/// Reducer or scan failure during a fold; `last_good` is the accumulator as it
/// stood before the failing row.
#[derive(Debug, Error)]
#[error("fold stopped: {source}")]
pub struct FoldError<A, E> {
    pub last_good: A,
    #[source]
    pub source: E,
}
