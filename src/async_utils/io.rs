//! I/O utilities.
//!
//! We read single documents and configuration as JSON or TOML, record streams
//! as JSONL or CSV, and write JSONL or pretty-printed JSON. Formats are
//! detected from the file extension, or from the first byte of standard
//! input.

use std::{pin::Pin, sync::Arc, task::Context};

use futures::{TryStreamExt as _, pin_mut, stream::StreamExt as _};
use peekable::tokio::AsyncPeekable;
use serde_json::Map;
use tokio::{
    fs::File,
    io::{
        AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt as _, AsyncWrite,
        AsyncWriteExt as _, BufReader, BufWriter, ReadBuf,
    },
};
use tokio_stream::wrappers::LinesStream;

use super::BoxedStream;
use crate::{
    prelude::*,
    ui::{ProgressConfig, Ui},
};

/// An async reader which knows whether its input looks like JSON.
pub struct SmartReader {
    /// Does our input look like JSON or JSONL (as opposed to TOML or CSV)?
    is_json_like: bool,

    /// A human-readable description of the input source, for error messages.
    description: String,

    reader: Pin<Box<dyn AsyncBufRead + Unpin + Send + Sync + 'static>>,
}

impl SmartReader {
    /// Wrap a reader, peeking at the first byte to guess the format.
    pub async fn new_from_reader(
        description: String,
        reader: impl AsyncRead + Unpin + Send + Sync + 'static,
    ) -> Result<Self> {
        let mut peekable = AsyncPeekable::new(Box::new(BufReader::new(reader)));
        let mut first = [0u8; 1];
        let is_json_like = match peekable.peek_exact(&mut first).await {
            Ok(_) => first[0] == b'{',
            // Empty input. Treat it as JSONL, which has zero records.
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => true,
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read from {}", description));
            }
        };
        Ok(Self {
            is_json_like,
            description,
            reader: Box::pin(BufReader::new(peekable)),
        })
    }

    /// Open a file, guessing the format from its extension.
    pub async fn new_from_path(path: &Path) -> Result<Self> {
        let ext = path.extension().unwrap_or_default();
        let file = File::open(path)
            .await
            .with_context(|| format!("Failed to open file at path: {:?}", path))?;
        Ok(Self {
            is_json_like: ext == "json" || ext == "jsonl",
            description: path.to_string_lossy().into_owned(),
            reader: Box::pin(BufReader::new(file)),
        })
    }

    /// Open a file, or standard input if `path` is `None`.
    pub async fn new_from_path_or_stdin(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::new_from_path(path).await,
            None => Self::new_from_reader("stdin".to_owned(), tokio::io::stdin()).await,
        }
    }

    pub fn is_json_like(&self) -> bool {
        self.is_json_like
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl AsyncRead for SmartReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        Pin::get_mut(self).reader.as_mut().poll_read(cx, buf)
    }
}

impl AsyncBufRead for SmartReader {
    fn poll_fill_buf(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> std::task::Poll<std::io::Result<&[u8]>> {
        Pin::get_mut(self).reader.as_mut().poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        Pin::get_mut(self).reader.as_mut().consume(amt)
    }
}

/// Read TOML or JSON from a file.
pub async fn read_json_or_toml<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let mut reader = SmartReader::new_from_path(path).await?;
    let mut data = String::new();
    // Our parsers want the whole document at once.
    reader
        .read_to_string(&mut data)
        .await
        .with_context(|| format!("Failed to read file at path: {:?}", path))?;
    if reader.is_json_like() {
        serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse JSON from file at path: {:?}", path))
    } else {
        toml::from_str(&data)
            .with_context(|| format!("Failed to parse TOML from file at path: {:?}", path))
    }
}

/// Read a whole text file, such as a reference transcription.
pub async fn read_text(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read text file at path: {:?}", path))
}

/// A stream of JSON records.
pub type JsonStream = BoxedStream<Result<Value>>;

/// Records read from JSONL or CSV, plus the record count if we could get one
/// cheaply.
///
/// The outer `Result` of each item reports I/O errors, which end the stream.
/// The inner one reports a single record we couldn't parse.
pub struct RecordStream {
    pub records: BoxedStream<Result<Result<Value>>>,
    pub len: Option<u64>,
}

/// Count the records in a JSONL or CSV file. Returns `None` for things which
/// aren't regular files, like named pipes.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
async fn count_records(ui: &Ui, path: &Path) -> Result<Option<u64>> {
    if !path.is_file() {
        return Ok(None);
    }
    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "🧮",
        msg: "Counting input records",
        done_msg: "Counted input records",
    });
    let reader = SmartReader::new_from_path(path).await?;
    let count: u64 = if reader.is_json_like() {
        LinesStream::new(reader.lines())
            .try_filter(|line| std::future::ready(!line.trim().is_empty()))
            .try_fold(0, |acc, _| async move { Ok(acc + 1) })
            .await?
    } else {
        csv_async::AsyncReaderBuilder::new()
            .create_reader(reader)
            .into_byte_records()
            .try_fold(0, |acc, _| async move { Ok(acc + 1) })
            .await?
    };
    spinner.finish_with_message(format!("Found {count} records"));
    Ok(Some(count))
}

/// Read JSONL or CSV records from a file or standard input.
///
/// CSV cells are all read as JSON strings. Blank JSONL lines are skipped.
/// Lines which aren't valid JSON and malformed CSV rows are reported per
/// record, so callers can carry on past them.
pub async fn read_jsonl_or_csv(ui: &Ui, path: Option<&Path>) -> Result<RecordStream> {
    let len = match path {
        Some(path) => count_records(ui, path).await?,
        None => None,
    };

    let reader = SmartReader::new_from_path_or_stdin(path).await?;
    let description = Arc::new(reader.description().to_owned());
    let records: BoxedStream<Result<Result<Value>>> = if reader.is_json_like() {
        LinesStream::new(reader.lines())
            .enumerate()
            .filter(|(_, line)| {
                std::future::ready(!matches!(line, Ok(line) if line.trim().is_empty()))
            })
            .map(move |(idx, line)| {
                let line = line.with_context(|| format!("Failed to read from {}", description))?;
                Ok(serde_json::from_str::<Value>(&line).with_context(|| {
                    format!(
                        "Failed to parse JSON from line {} in {}: {:?}",
                        idx + 1,
                        description,
                        line
                    )
                }))
            })
            .boxed()
    } else {
        let mut reader = csv_async::AsyncReaderBuilder::new().create_reader(reader);
        let headers = reader
            .headers()
            .await
            .with_context(|| format!("Failed to read CSV headers from {}", description))?
            .to_owned();
        reader
            .into_records()
            .map(move |record| {
                let record = match record {
                    Ok(record) => record,
                    Err(err) if matches!(err.kind(), csv_async::ErrorKind::Io(_)) => {
                        return Err(err).with_context(|| {
                            format!("Failed to read CSV record from {}", description)
                        });
                    }
                    Err(err) => {
                        return Ok(Err(err).with_context(|| {
                            format!("Failed to parse CSV record from {}", description)
                        }));
                    }
                };
                let map = headers
                    .iter()
                    .zip(record.iter())
                    .map(|(header, value)| (header.to_owned(), Value::String(value.to_owned())))
                    .collect::<Map<_, _>>();
                Ok(Ok(Value::Object(map)))
            })
            .boxed()
    };
    Ok(RecordStream { records, len })
}

/// Create an [`AsyncWrite`] for a file or stdout.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("Failed to create file at path: {:?}", path))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Write a stream of JSON values as JSONL to either standard output or a file.
///
/// If the stream fails partway, everything before the failure is still
/// flushed.
pub async fn write_jsonl(path: Option<&Path>, stream: JsonStream) -> Result<()> {
    let mut writer = BufWriter::new(create_writer(path).await?);
    pin_mut!(stream);
    let mut result = Ok(());
    while let Some(value) = stream.next().await {
        if let Err(err) = write_json_line(&mut writer, value).await {
            result = Err(err);
            break;
        }
    }
    writer.flush().await.context("Failed to flush output")?;
    result
}

async fn write_json_line(
    writer: &mut (impl AsyncWrite + Unpin),
    value: Result<Value>,
) -> Result<()> {
    let mut line = serde_json::to_string(&value?).context("Failed to serialize JSON")?;
    line.push('\n');
    writer
        .write_all(line.as_bytes())
        .await
        .context("Failed to write JSON to output")
}

/// Write a single value as pretty-printed JSON.
pub async fn write_json_pretty<T: Serialize>(path: Option<&Path>, value: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
    json.push('\n');
    let mut writer = create_writer(path).await?;
    writer
        .write_all(json.as_bytes())
        .await
        .context("Failed to write JSON to output")?;
    writer.flush().await.context("Failed to flush output")?;
    Ok(())
}
