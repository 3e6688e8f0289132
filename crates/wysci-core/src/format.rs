use crate::error::{WriteFailure, WysciError};
use crate::types::{Column, NullableValue};
use std::borrow::Cow;
use std::future::Future;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Renders rows of captured values onto a byte sink. One instance serves one
/// row stream, sequentially.
pub trait RowFormatter: Send {
    /// Write one row (and the header, on the first call). Returns the exact
    /// number of bytes the sink accepted.
    fn format<W>(
        &mut self,
        row: &[NullableValue],
        sink: &mut W,
    ) -> impl Future<Output = Result<usize, WriteFailure>> + Send
    where
        W: AsyncWrite + Unpin + Send;

    /// Called by `QueryProcessor` after the cursor is exhausted; writes
    /// anything still owed, such as a header for an empty result.
    fn finish<W>(&mut self, sink: &mut W) -> impl Future<Output = Result<usize, WriteFailure>> + Send
    where
        W: AsyncWrite + Unpin + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvOptions {
    pub delimiter: char,
    pub null_placeholder: String,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            null_placeholder: String::new(),
        }
    }
}

impl CsvOptions {
    pub fn validate(&self) -> Result<(), WysciError> {
        match self.delimiter {
            '"' | '\r' | '\n' => Err(WysciError::Config(format!(
                "{:?} cannot be used as a delimiter",
                self.delimiter
            ))),
            _ => Ok(()),
        }
    }
}

/// Delimited-text formatter with a lazily written header row.
#[derive(Debug, Clone)]
pub struct CsvFormatter {
    delimiter: char,
    null_placeholder: String,
    header: Vec<String>,
    header_emitted: bool,
}

impl CsvFormatter {
    pub fn new(columns: &[Column]) -> Self {
        Self::from_names(
            columns.iter().map(|c| c.name.clone()).collect(),
            CsvOptions::default(),
        )
    }

    pub fn with_options(columns: &[Column], options: CsvOptions) -> Result<Self, WysciError> {
        options.validate()?;
        Ok(Self::from_names(
            columns.iter().map(|c| c.name.clone()).collect(),
            options,
        ))
    }

    pub fn from_names(header: Vec<String>, options: CsvOptions) -> Self {
        Self {
            delimiter: options.delimiter,
            null_placeholder: options.null_placeholder,
            header,
            header_emitted: false,
        }
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn null_placeholder(&self) -> &str {
        &self.null_placeholder
    }

    pub fn header_emitted(&self) -> bool {
        self.header_emitted
    }

    pub fn column_count(&self) -> usize {
        self.header.len()
    }

    /// Write the header line unless it already went out.
    pub async fn write_header<W>(&mut self, sink: &mut W) -> Result<usize, WriteFailure>
    where
        W: AsyncWrite + Unpin + Send,
    {
        if self.header_emitted {
            return Ok(0);
        }
        let line = render_line(self.header.iter().map(String::as_str), self.delimiter);
        let written = write_counted(sink, &line).await?;
        self.header_emitted = true;
        Ok(written)
    }

    pub fn render_row(&self, row: &[NullableValue]) -> Vec<u8> {
        let fields = row
            .iter()
            .map(|v| v.raw().unwrap_or(self.null_placeholder.as_str()));
        render_line(fields, self.delimiter)
    }
}

impl RowFormatter for CsvFormatter {
    async fn format<W>(&mut self, row: &[NullableValue], sink: &mut W) -> Result<usize, WriteFailure>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let header = self.write_header(sink).await?;
        let line = self.render_row(row);
        match write_counted(sink, &line).await {
            Ok(n) => Ok(header + n),
            Err(mut failure) => {
                failure.written += header;
                Err(failure)
            }
        }
    }

    async fn finish<W>(&mut self, sink: &mut W) -> Result<usize, WriteFailure>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.write_header(sink).await
    }
}

/// Quote `field` when it holds the delimiter or a double quote, doubling any
/// embedded quotes. Other fields pass through untouched.
pub fn escape_field(field: &str, delimiter: char) -> Cow<'_, str> {
    if !field.contains(delimiter) && !field.contains('"') {
        return Cow::Borrowed(field);
    }
    let mut out = String::with_capacity(field.len() + 2);
    out.push('"');
    for ch in field.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
    Cow::Owned(out)
}

fn render_line<'a, I>(fields: I, delimiter: char) -> Vec<u8>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut sep = [0u8; 4];
    let sep = delimiter.encode_utf8(&mut sep).as_bytes();
    let mut line = Vec::new();
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            line.extend_from_slice(sep);
        }
        line.extend_from_slice(escape_field(field, delimiter).as_bytes());
    }
    line.extend_from_slice(LINE_TERMINATOR);
    line
}

/// Push `buf` into the sink, retrying short writes and interrupts, and report
/// how far it got if the sink gives up.
async fn write_counted<W>(sink: &mut W, buf: &[u8]) -> Result<usize, WriteFailure>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut written = 0;
    while written < buf.len() {
        match sink.write(&buf[written..]).await {
            Ok(0) => {
                return Err(WriteFailure {
                    written,
                    source: io::Error::from(io::ErrorKind::WriteZero),
                })
            }
            Ok(n) => written += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(source) => return Err(WriteFailure { written, source }),
        }
    }
    Ok(written)
}
