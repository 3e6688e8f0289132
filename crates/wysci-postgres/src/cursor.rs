use crate::decode::decode_cell;
use crate::params::QueryParam;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_postgres::{CancelToken, Client, Config, NoTls, RowStream};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};
use wysci_core::{ColumnDescriptor, Cursor, QueryHandle, ScanTargets, WysciError};

/// Forward-only cursor over a running PostgreSQL query.
pub struct PgCursor {
    columns: Vec<ColumnDescriptor>,
    stream: Option<Pin<Box<RowStream>>>,
    cancel: CancelToken,
    finished: bool,
    // a dedicated connection and its slot live exactly as long as the stream
    client: Option<Client>,
    permit: Option<OwnedSemaphorePermit>,
}

impl PgCursor {
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Ask the server to stop producing rows nobody will read. Without this
    /// the connection has to drain the rest of the result set.
    fn cancel_on_server(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no runtime available to cancel an abandoned query");
            return;
        };
        let token = self.cancel.clone();
        runtime.spawn(async move {
            match token.cancel_query(NoTls).await {
                Ok(()) => debug!("cancelled abandoned query"),
                Err(err) => warn!("failed to cancel abandoned query: {err}"),
            }
        });
    }
}

impl Cursor for PgCursor {
    fn describe(&mut self) -> Result<Vec<ColumnDescriptor>, WysciError> {
        Ok(self.columns.clone())
    }

    async fn next_row(&mut self, targets: &mut ScanTargets) -> Result<bool, WysciError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(false);
        };
        let row = match stream.next().await {
            Some(Ok(row)) => row,
            Some(Err(err)) => {
                self.finished = true;
                return Err(WysciError::Driver(err.to_string()));
            }
            None => {
                self.finished = true;
                return Ok(false);
            }
        };
        if row.len() != targets.len() {
            return Err(WysciError::Scan(format!(
                "row has {} columns, expected {}",
                row.len(),
                targets.len()
            )));
        }
        for idx in 0..row.len() {
            let kind = targets
                .kind(idx)
                .ok_or_else(|| WysciError::Scan(format!("no scan target for column {idx}")))?;
            let value = decode_cell(&row, idx, kind)?;
            targets.set(idx, value)?;
        }
        Ok(true)
    }

    fn close(&mut self) -> Result<(), WysciError> {
        if self.stream.take().is_some() && !self.finished {
            self.cancel_on_server();
        }
        self.client = None;
        self.permit = None;
        Ok(())
    }
}

/// Open a client and drive its connection on a background task.
pub async fn connect(config: &Config) -> Result<Client, WysciError> {
    let (client, connection) = config
        .connect(NoTls)
        .await
        .map_err(|e| WysciError::Driver(format!("failed to connect: {e}")))?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!("postgres connection error: {err}");
        }
    });
    Ok(client)
}

/// Prepare `sql`, start streaming its rows over `client` and wrap the cursor
/// in a handle. A client runs one stream at a time; later queries on it
/// wait until this one is drained or closed.
pub async fn execute(
    client: &Client,
    sql: &str,
    params: &[QueryParam],
) -> Result<QueryHandle<PgCursor>, WysciError> {
    let started = Instant::now();
    let cursor = start(client, sql, params).await?;
    into_handle(sql, cursor, started)
}

async fn start(client: &Client, sql: &str, params: &[QueryParam]) -> Result<PgCursor, WysciError> {
    info!(sql, "querying database");
    let statement = client.prepare(sql).await.map_err(|e| {
        error!("failed to prepare query: {e}");
        WysciError::Driver(e.to_string())
    })?;
    let columns = statement
        .columns()
        .iter()
        .map(|c| ColumnDescriptor::new(c.name(), c.type_().name().to_uppercase()))
        .collect();

    let stream = client
        .query_raw(&statement, params.iter())
        .await
        .map_err(|e| {
            error!("failed to execute query: {e}");
            WysciError::Driver(e.to_string())
        })?;
    Ok(PgCursor {
        columns,
        stream: Some(Box::pin(stream)),
        cancel: client.cancel_token(),
        finished: false,
        client: None,
        permit: None,
    })
}

fn into_handle(
    sql: &str,
    cursor: PgCursor,
    started: Instant,
) -> Result<QueryHandle<PgCursor>, WysciError> {
    let handle = QueryHandle::open(sql, cursor)?;
    info!(
        duration_ms = started.elapsed().as_millis() as u64,
        columns = handle.columns().len(),
        "query executing"
    );
    Ok(handle)
}

/// Hands every stream its own connection, with at most `max_connections`
/// open at once. Streams beyond that wait for a slot.
#[derive(Clone)]
pub struct PgConnector {
    config: Config,
    slots: Arc<Semaphore>,
    max_connections: usize,
}

impl PgConnector {
    pub fn new(config: Config, max_connections: usize) -> Self {
        let max_connections = max_connections.max(1);
        Self {
            config,
            slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Run `sql` on a fresh connection. The connection closes with the handle.
    pub async fn open(
        &self,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<QueryHandle<PgCursor>, WysciError> {
        let started = Instant::now();
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WysciError::Driver("connection slots closed".into()))?;
        let client = connect(&self.config).await?;
        let mut cursor = start(&client, sql, params).await?;
        cursor.client = Some(client);
        cursor.permit = Some(permit);
        into_handle(sql, cursor, started)
    }

    /// Check that the database is reachable.
    pub async fn ping(&self) -> Result<(), WysciError> {
        let client = connect(&self.config).await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| WysciError::Driver(e.to_string()))?;
        Ok(())
    }
}
