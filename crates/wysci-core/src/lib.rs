pub mod buffer;
pub mod cursor;
pub mod error;
pub mod format;
pub mod observer;
pub mod processor;
pub mod query;
pub mod types;

pub use buffer::ScanTargets;
pub use cursor::{Cursor, MemoryCursor};
pub use error::{FoldError, ProcessError, WriteFailure, WysciError};
pub use format::{escape_field, CsvFormatter, CsvOptions, RowFormatter};
pub use observer::{NoopObserver, StreamEvent, StreamObserver, TracingObserver};
pub use processor::QueryProcessor;
pub use query::{CursorState, QueryHandle};
pub use types::{classify, CellValue, Column, ColumnDescriptor, LogicalType, NullableValue, Number, Row, Temporal};
