use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::errors::{CrmTapError, Result};
use crate::http::fetcher::{fetch_pages, DEFAULT_DATA_FIELD};
use crate::http::{Getter, QueryParams};
use crate::pipeline::merge::merge_partitions;
use crate::pipeline::record::Record;
use crate::utils::properties::PROPERTIES_PARAM_MAX_LENGTH;

/// Static description of one readable stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDef {
    pub name: String,
    pub path: String,
    /// CRM object type whose property schema drives partitioning.
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default = "default_data_field")]
    pub data_field: String,
}

fn default_data_field() -> String {
    DEFAULT_DATA_FIELD.to_string()
}

impl StreamDef {
    pub fn crm_object(name: &str, entity: &str) -> Self {
        Self {
            name: name.to_string(),
            path: format!("/crm/v3/objects/{name}"),
            entity: Some(entity.to_string()),
            data_field: default_data_field(),
        }
    }

    pub fn plain(name: &str, path: &str, data_field: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            entity: None,
            data_field: data_field.to_string(),
        }
    }

    /// Streams this connector knows how to read.
    pub fn catalog() -> Vec<StreamDef> {
        vec![
            StreamDef::crm_object("companies", "company"),
            StreamDef::crm_object("contacts", "contact"),
            StreamDef::crm_object("deals", "deal"),
            StreamDef::crm_object("products", "product"),
            StreamDef::crm_object("tickets", "ticket"),
            StreamDef::plain("workflows", "/automation/v3/workflows", "workflows"),
        ]
    }

    pub fn properties_path(&self) -> Option<String> {
        self.entity.as_deref().map(properties_path_for)
    }
}

pub fn properties_path_for(entity: &str) -> String {
    format!("/properties/v2/{entity}/properties")
}

#[derive(Debug, Deserialize)]
struct PropertyDescriptor {
    name: String,
}

/// Fetch the names of every property defined for `entity`, deduplicated.
pub async fn fetch_property_names<G>(getter: &G, entity: &str) -> Result<Vec<String>>
where
    G: Getter + ?Sized,
{
    let body = getter
        .get(&properties_path_for(entity), &QueryParams::new())
        .await?;
    let descriptors: Vec<PropertyDescriptor> = serde_json::from_value(body)?;

    let names: IndexSet<String> = descriptors.into_iter().map(|d| d.name).collect();
    Ok(names.into_iter().collect())
}

/// Reads one stream: resolve properties, partition, paginate, merge, filter.
#[derive(Debug, Clone)]
pub struct CrmStream {
    def: StreamDef,
    start_date: Option<DateTime<Utc>>,
    page_size: u32,
    max_properties_len: usize,
}

impl CrmStream {
    pub fn new(def: StreamDef) -> Self {
        Self {
            def,
            start_date: None,
            page_size: 100,
            max_properties_len: PROPERTIES_PARAM_MAX_LENGTH,
        }
    }

    pub fn with_start_date(mut self, start_date: DateTime<Utc>) -> Self {
        self.start_date = Some(start_date);
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_max_properties_len(mut self, max_len: usize) -> Self {
        self.max_properties_len = max_len;
        self
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn def(&self) -> &StreamDef {
        &self.def
    }

    fn base_params(&self) -> QueryParams {
        let mut params = QueryParams::new();
        params.insert("limit".to_string(), self.page_size.to_string());
        params
    }

    /// Lazily read every record of this stream.
    ///
    /// No request is made until the stream is first polled. A missing-scope
    /// failure is logged once as a warning and ends the stream with no
    /// records; any other error is yielded.
    pub fn read<'a, G>(&'a self, getter: &'a G) -> BoxStream<'a, Result<Record>>
    where
        G: Getter + ?Sized,
    {
        let span = info_span!("stream.read", stream = %self.def.name);
        let s = async_stream::try_stream! {
            let records = match self.read_all(getter).instrument(span).await {
                Ok(records) => records,
                Err(CrmTapError::PermissionDenied { message, .. }) => {
                    warn!("Stream `{}` cannot be procced. {}", self.def.name, message);
                    Vec::new()
                }
                Err(e) => Err(e)?,
            };
            for record in records {
                yield record;
            }
        };
        s.boxed()
    }

    /// Drain-then-return: every partition and page is read before the first
    /// record is available.
    pub async fn read_all<G>(&self, getter: &G) -> Result<Vec<Record>>
    where
        G: Getter + ?Sized,
    {
        let base = self.base_params();

        let records = match &self.def.entity {
            Some(entity) => {
                let properties = fetch_property_names(getter, entity).await?;
                debug!(properties = properties.len(), "resolved stream properties");
                merge_partitions(
                    getter,
                    &self.def.path,
                    &base,
                    &properties,
                    self.max_properties_len,
                    &self.def.data_field,
                )
                .await?
            }
            None => {
                let pages: Vec<_> = fetch_pages(getter, &self.def.path, base, &self.def.data_field)
                    .try_collect()
                    .await?;
                pages.into_iter().flat_map(|p| p.results).collect()
            }
        };

        let total = records.len();
        let kept: Vec<Record> = records
            .into_iter()
            .filter(|r| self.is_after_start(r))
            .collect();
        info!(records = kept.len(), skipped = total - kept.len(), "stream read finished");
        Ok(kept)
    }

    fn is_after_start(&self, record: &Record) -> bool {
        match (self.start_date, record.updated_at()) {
            (Some(start), Some(updated)) => updated >= start,
            _ => true,
        }
    }
}
