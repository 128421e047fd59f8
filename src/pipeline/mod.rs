use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ConnectorConfig;
use crate::errors::Result;
use crate::http::retry::ApiClient;
use crate::http::{Getter, QueryParams};
use crate::pipeline::record::Record;
use crate::pipeline::stream::{properties_path_for, CrmStream, StreamDef};

pub mod merge;
pub mod record;
pub mod stream;

/// Entity whose property schema is requested by the connection check.
const CHECK_ENTITY: &str = "contact";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub alive: bool,
    pub error: Option<String>,
}

/// A record tagged with the stream it was read from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamRecord {
    pub stream: String,
    pub record: Record,
}

/// The connector: one configured API client plus the stream catalog.
pub struct CrmSource {
    config: ConnectorConfig,
    client: ApiClient,
}

impl CrmSource {
    pub fn new(config: ConnectorConfig) -> Result<Self> {
        let client = ApiClient::from_config(&config)?;
        Ok(Self { config, client })
    }

    /// Probe the API with the contact property schema request.
    ///
    /// Transient failures are absorbed by the retry client; whatever still
    /// fails is reported in `error` rather than returned.
    pub async fn check_connection(&self) -> ConnectionStatus {
        match self
            .client
            .get(&properties_path_for(CHECK_ENTITY), &QueryParams::new())
            .await
        {
            Ok(_) => ConnectionStatus {
                alive: true,
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "connection check failed");
                ConnectionStatus {
                    alive: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub fn streams(&self) -> Vec<CrmStream> {
        StreamDef::catalog()
            .into_iter()
            .map(|def| {
                CrmStream::new(def)
                    .with_start_date(self.config.start_date)
                    .with_page_size(self.config.page_size)
            })
            .collect()
    }

    pub fn stream(&self, name: &str) -> Option<CrmStream> {
        self.streams().into_iter().find(|s| s.name() == name)
    }

    /// Read the named streams one after another.
    ///
    /// Names not in the catalog are skipped with a warning. A stream that
    /// lacks permissions yields nothing and the next stream still runs.
    pub fn read<'a>(&'a self, names: &[String]) -> BoxStream<'a, Result<StreamRecord>> {
        let mut selected = Vec::with_capacity(names.len());
        for name in names {
            match self.stream(name) {
                Some(stream) => selected.push(stream),
                None => warn!(stream = %name, "stream is not available in this source, skipping"),
            }
        }

        let s = async_stream::try_stream! {
            for stream in selected {
                info!(stream = %stream.name(), "reading stream");
                let mut records = stream.read(&self.client);
                while let Some(record) = records.next().await {
                    yield StreamRecord {
                        stream: stream.name().to_string(),
                        record: record?,
                    };
                }
            }
        };
        s.boxed()
    }
}
