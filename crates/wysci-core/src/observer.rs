use crate::error::WysciError;
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Debug)]
pub enum StreamEvent<'a> {
    QueryStarted { sql: &'a str, columns: usize },
    Progress { rows: u64, bytes: usize },
    Finished { rows: u64, bytes: usize, elapsed: Duration },
    Failed { rows: u64, bytes: usize, error: &'a WysciError },
}

/// Structured event sink handed to the stream consumers.
pub trait StreamObserver: Send + Sync {
    fn on_event(&self, event: StreamEvent<'_>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl StreamObserver for NoopObserver {
    fn on_event(&self, _event: StreamEvent<'_>) {}
}

/// Forwards events to `tracing`, tagged with the request id when one is known.
#[derive(Debug, Default, Clone)]
pub struct TracingObserver {
    request_id: Option<String>,
}

impl TracingObserver {
    pub fn new(request_id: Option<String>) -> Self {
        Self { request_id }
    }
}

impl StreamObserver for TracingObserver {
    fn on_event(&self, event: StreamEvent<'_>) {
        let request_id = self.request_id.as_deref().unwrap_or("");
        match event {
            StreamEvent::QueryStarted { sql, columns } => {
                info!(request_id, sql, columns, "streaming query");
            }
            StreamEvent::Progress { rows, bytes } => {
                debug!(request_id, rows, bytes, "streaming progress");
            }
            StreamEvent::Finished {
                rows,
                bytes,
                elapsed,
            } => {
                info!(
                    request_id,
                    rows,
                    bytes,
                    duration_ms = elapsed.as_millis() as u64,
                    "finished streaming query"
                );
            }
            StreamEvent::Failed { rows, bytes, error } => {
                error!(request_id, rows, bytes, "stream failed: {error}");
            }
        }
    }
}

impl<T: StreamObserver + ?Sized> StreamObserver for std::sync::Arc<T> {
    fn on_event(&self, event: StreamEvent<'_>) {
        (**self).on_event(event)
    }
}
