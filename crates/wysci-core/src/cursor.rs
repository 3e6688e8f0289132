use crate::buffer::ScanTargets;
use crate::error::WysciError;
use crate::types::{CellValue, ColumnDescriptor};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A live, forward-only result cursor supplied by a database adapter.
pub trait Cursor: Send {
    /// Column names and native type names, in ordinal order.
    fn describe(&mut self) -> Result<Vec<ColumnDescriptor>, WysciError>;

    /// Advance one row and store every cell into `targets`. `Ok(false)` means
    /// the result set is exhausted.
    fn next_row(
        &mut self,
        targets: &mut ScanTargets,
    ) -> impl Future<Output = Result<bool, WysciError>> + Send;

    /// Release the server-side cursor. Called at most once by `QueryHandle`.
    fn close(&mut self) -> Result<(), WysciError>;
}

/// Cursor over rows already held in memory.
#[derive(Debug, Default)]
pub struct MemoryCursor {
    columns: Vec<ColumnDescriptor>,
    rows: VecDeque<Vec<CellValue>>,
    fail_describe: Option<String>,
    fail_after: Option<(usize, String)>,
    delivered: usize,
    closes: Arc<AtomicUsize>,
}

impl MemoryCursor {
    pub fn new(columns: Vec<ColumnDescriptor>, rows: Vec<Vec<CellValue>>) -> Self {
        Self {
            columns,
            rows: rows.into(),
            ..Self::default()
        }
    }

    /// Make `describe` fail, as a driver whose metadata lookup errors would.
    pub fn with_describe_error(mut self, message: impl Into<String>) -> Self {
        self.fail_describe = Some(message.into());
        self
    }

    /// Fail the fetch that follows `rows` delivered rows.
    pub fn with_fetch_error_after(mut self, rows: usize, message: impl Into<String>) -> Self {
        self.fail_after = Some((rows, message.into()));
        self
    }

    pub fn delivered(&self) -> usize {
        self.delivered
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Shared close counter, readable after the cursor has been moved away.
    pub fn close_tracker(&self) -> Arc<AtomicUsize> {
        self.closes.clone()
    }
}

impl Cursor for MemoryCursor {
    fn describe(&mut self) -> Result<Vec<ColumnDescriptor>, WysciError> {
        if let Some(message) = &self.fail_describe {
            return Err(WysciError::Metadata(message.clone()));
        }
        Ok(self.columns.clone())
    }

    async fn next_row(&mut self, targets: &mut ScanTargets) -> Result<bool, WysciError> {
        if let Some((after, message)) = &self.fail_after {
            if self.delivered == *after {
                return Err(WysciError::Driver(message.clone()));
            }
        }
        let Some(row) = self.rows.pop_front() else {
            return Ok(false);
        };
        if row.len() != targets.len() {
            return Err(WysciError::Scan(format!(
                "row has {} values but cursor has {} columns",
                row.len(),
                targets.len()
            )));
        }
        self.delivered += 1;
        for (ordinal, value) in row.into_iter().enumerate() {
            targets.set(ordinal, value)?;
        }
        Ok(true)
    }

    fn close(&mut self) -> Result<(), WysciError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.rows.clear();
        Ok(())
    }
}
