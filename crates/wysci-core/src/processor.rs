use crate::cursor::Cursor;
use crate::error::{ProcessError, WysciError};
use crate::format::{CsvFormatter, RowFormatter};
use crate::observer::{StreamEvent, StreamObserver};
use crate::query::QueryHandle;
use std::time::Instant;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

const PROGRESS_INTERVAL: u64 = 10_000;

/// Pulls rows from a query handle into a formatter and onto a sink.
#[derive(Debug, Clone)]
pub struct QueryProcessor<O> {
    observer: O,
}

impl<O: StreamObserver> QueryProcessor<O> {
    pub fn new(observer: O) -> Self {
        Self { observer }
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Stream with the default comma-delimited formatter bound to the handle's
    /// columns.
    pub async fn process<C, W>(
        &self,
        handle: &mut QueryHandle<C>,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<usize, ProcessError>
    where
        C: Cursor,
        W: AsyncWrite + Unpin + Send,
    {
        let mut formatter = CsvFormatter::new(handle.columns());
        self.process_with(handle, &mut formatter, sink, cancel).await
    }

    /// Stream every remaining row through `formatter`. Stops at the first
    /// scan, sink or cancellation error and reports the bytes already
    /// committed to the sink alongside it.
    pub async fn process_with<C, F, W>(
        &self,
        handle: &mut QueryHandle<C>,
        formatter: &mut F,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<usize, ProcessError>
    where
        C: Cursor,
        F: RowFormatter,
        W: AsyncWrite + Unpin + Send,
    {
        let started = Instant::now();
        self.observer.on_event(StreamEvent::QueryStarted {
            sql: handle.sql(),
            columns: handle.columns().len(),
        });

        let mut total = 0usize;
        let mut rows = 0u64;
        let outcome = loop {
            let row = match handle.next_row(cancel).await {
                Ok(Some(row)) => row,
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            };
            match formatter.format(&row, sink).await {
                Ok(n) => {
                    total += n;
                    rows += 1;
                    if rows % PROGRESS_INTERVAL == 0 {
                        self.observer.on_event(StreamEvent::Progress { rows, bytes: total });
                    }
                }
                Err(failure) => {
                    total += failure.written;
                    break Err(WysciError::Sink(failure.source));
                }
            }
        };

        let outcome = match outcome {
            Ok(()) => self.finish(formatter, sink, &mut total).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                self.observer.on_event(StreamEvent::Finished {
                    rows,
                    bytes: total,
                    elapsed: started.elapsed(),
                });
                Ok(total)
            }
            Err(source) => {
                if let Err(close_err) = handle.close() {
                    tracing::warn!("failed to close cursor: {close_err}");
                }
                self.observer.on_event(StreamEvent::Failed {
                    rows,
                    bytes: total,
                    error: &source,
                });
                Err(ProcessError {
                    bytes_written: total,
                    source,
                })
            }
        }
    }

    async fn finish<F, W>(&self, formatter: &mut F, sink: &mut W, total: &mut usize) -> Result<(), WysciError>
    where
        F: RowFormatter,
        W: AsyncWrite + Unpin + Send,
    {
        match formatter.finish(sink).await {
            Ok(n) => *total += n,
            Err(failure) => {
                *total += failure.written;
                return Err(WysciError::Sink(failure.source));
            }
        }
        sink.flush().await?;
        Ok(())
    }
}
