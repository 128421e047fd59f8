use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::{CrmTapError, Result};
use crate::pipeline::record::Record;

/// Destination for records coming out of a read.
#[async_trait]
pub trait RecordWriter: Send + Sync {
    async fn write_record(&self, stream: &str, record: &Record) -> Result<()>;

    /// Lifecycle hooks.
    async fn begin(&self) -> Result<()> {
        Ok(())
    }
    async fn commit(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Serialize)]
struct RecordMessage<'a> {
    stream: &'a str,
    data: &'a Record,
    emitted_at: i64,
}

/// Writes one JSON object per line.
pub struct JsonLinesWriter<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl<W: Write + Send> RecordWriter for JsonLinesWriter<W> {
    async fn write_record(&self, stream: &str, record: &Record) -> Result<()> {
        let msg = RecordMessage {
            stream,
            data: record,
            emitted_at: chrono::Utc::now().timestamp_millis(),
        };
        let line = serde_json::to_string(&msg)?;
        let mut out = self
            .out
            .lock()
            .map_err(|_| CrmTapError::WriterError("output lock poisoned".into()))?;
        writeln!(out, "{line}")?;
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| CrmTapError::WriterError("output lock poisoned".into()))?;
        out.flush()?;
        Ok(())
    }
}
