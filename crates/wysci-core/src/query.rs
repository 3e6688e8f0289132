use crate::buffer::ScanTargets;
use crate::cursor::Cursor;
use crate::error::{FoldError, WysciError};
use crate::types::{Column, LogicalType, Row};
use std::fmt;
use std::ops::ControlFlow;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Created,
    Executing,
    Exhausted,
    Closed,
    Errored,
}

impl CursorState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CursorState::Exhausted | CursorState::Closed | CursorState::Errored
        )
    }
}

impl fmt::Display for CursorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CursorState::Created => "created",
            CursorState::Executing => "executing",
            CursorState::Exhausted => "exhausted",
            CursorState::Closed => "closed",
            CursorState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Owns an executing cursor together with the column metadata captured when
/// it was opened.
pub struct QueryHandle<C: Cursor> {
    sql: String,
    cursor: C,
    columns: Vec<Column>,
    targets: ScanTargets,
    state: CursorState,
    released: bool,
}

impl<C: Cursor> fmt::Debug for QueryHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryHandle")
            .field("sql", &self.sql)
            .field("columns", &self.columns)
            .field("state", &self.state)
            .finish()
    }
}

impl<C: Cursor> QueryHandle<C> {
    /// Introspect the cursor's columns and classify each once. On failure the
    /// cursor is closed before the error is returned.
    pub fn open(sql: impl Into<String>, mut cursor: C) -> Result<Self, WysciError> {
        let descriptors = match cursor.describe() {
            Ok(descriptors) => descriptors,
            Err(err) => {
                if let Err(close_err) = cursor.close() {
                    warn!("failed to close cursor after metadata error: {close_err}");
                }
                return Err(match err {
                    WysciError::Metadata(_) => err,
                    other => WysciError::Metadata(other.to_string()),
                });
            }
        };
        let columns: Vec<Column> = descriptors
            .into_iter()
            .enumerate()
            .map(|(ordinal, descriptor)| Column::new(ordinal, descriptor))
            .collect();
        let targets = ScanTargets::allocate(&columns);
        let mut handle = Self {
            sql: sql.into(),
            cursor,
            columns,
            targets,
            state: CursorState::Created,
            released: false,
        };
        handle.state = CursorState::Executing;
        Ok(handle)
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn cursor(&self) -> &C {
        &self.cursor
    }

    /// First ordinal carrying `name`. Duplicate names resolve to the leftmost.
    pub fn index_of(&self, name: &str) -> Result<usize, WysciError> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| {
                debug!(column = name, "column lookup failed");
                WysciError::Column(format!("no column named {name}"))
            })
    }

    pub fn logical_type(&self, ordinal: usize) -> Result<LogicalType, WysciError> {
        self.columns
            .get(ordinal)
            .map(|c| c.logical_type)
            .ok_or_else(|| WysciError::Column(format!("no column at ordinal {ordinal}")))
    }

    /// Advance one row. `Ok(None)` marks exhaustion; the cursor is closed on
    /// exhaustion, on error and on cancellation.
    pub async fn next_row(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Row>, WysciError> {
        if self.state != CursorState::Executing {
            return Err(WysciError::CursorUnavailable(self.state));
        }
        if cancel.is_cancelled() {
            return Err(self.fail(WysciError::Cancelled, CursorState::Closed));
        }
        self.targets.clear();
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WysciError::Cancelled),
            fetched = self.cursor.next_row(&mut self.targets) => fetched,
        };
        match fetched {
            Ok(true) => match self.targets.capture() {
                Ok(row) => Ok(Some(row)),
                Err(err) => Err(self.fail(err, CursorState::Errored)),
            },
            Ok(false) => {
                self.state = CursorState::Exhausted;
                self.release()?;
                Ok(None)
            }
            Err(WysciError::Cancelled) => {
                Err(self.fail(WysciError::Cancelled, CursorState::Closed))
            }
            Err(err) => Err(self.fail(err, CursorState::Errored)),
        }
    }

    /// Hand each row to `visitor` until it breaks, errors, or rows run out.
    /// Returns the number of rows the visitor saw.
    pub async fn for_each<E, F>(&mut self, cancel: &CancellationToken, mut visitor: F) -> Result<u64, E>
    where
        E: From<WysciError>,
        F: FnMut(&Row) -> Result<ControlFlow<()>, E>,
    {
        let mut seen = 0u64;
        while let Some(row) = self.next_row(cancel).await? {
            seen += 1;
            match visitor(&row) {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => break,
                Err(err) => {
                    self.state = CursorState::Errored;
                    self.release_quietly();
                    return Err(err);
                }
            }
        }
        Ok(seen)
    }

    /// Thread an accumulator through every row. On failure the accumulator
    /// from before the failing row is returned with the error.
    pub async fn fold<A, E, F>(
        &mut self,
        cancel: &CancellationToken,
        initial: A,
        mut reducer: F,
    ) -> Result<A, FoldError<A, E>>
    where
        E: From<WysciError>,
        F: FnMut(&A, &Row) -> Result<A, E>,
    {
        let mut current = initial;
        loop {
            let row = match self.next_row(cancel).await {
                Ok(Some(row)) => row,
                Ok(None) => return Ok(current),
                Err(err) => {
                    return Err(FoldError {
                        last_good: current,
                        source: err.into(),
                    })
                }
            };
            match reducer(&current, &row) {
                Ok(next) => current = next,
                Err(source) => {
                    self.state = CursorState::Errored;
                    self.release_quietly();
                    return Err(FoldError {
                        last_good: current,
                        source,
                    });
                }
            }
        }
    }

    /// Close the cursor. Safe to call any number of times.
    pub fn close(&mut self) -> Result<(), WysciError> {
        if !self.state.is_terminal() {
            self.state = CursorState::Closed;
        }
        self.release()
    }

    fn fail(&mut self, err: WysciError, state: CursorState) -> WysciError {
        self.state = state;
        self.release_quietly();
        err
    }

    fn release(&mut self) -> Result<(), WysciError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.cursor.close()
    }

    fn release_quietly(&mut self) {
        if let Err(err) = self.release() {
            warn!("failed to close cursor: {err}");
        }
    }
}

impl<C: Cursor> Drop for QueryHandle<C> {
    fn drop(&mut self) {
        self.release_quietly();
    }
}
