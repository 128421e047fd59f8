use futures::TryStreamExt;
use indexmap::map::Entry;
use indexmap::IndexMap;
use tracing::{debug, info_span, Instrument};

use crate::errors::Result;
use crate::http::fetcher::fetch_pages;
use crate::http::{Getter, QueryParams};
use crate::pipeline::record::Record;
use crate::utils::properties::split_properties;

pub const PROPERTIES_PARAM: &str = "properties";

/// Records keyed by id, in the order each id was first seen.
#[derive(Debug, Default)]
pub struct MergeBuffer {
    records: IndexMap<String, Record>,
}

impl MergeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: Record) {
        match self.records.entry(record.id.clone()) {
            Entry::Occupied(mut slot) => slot.get_mut().merge_from(record),
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records.into_values().collect()
    }
}

/// Read every property partition of a listing and merge the partial records.
///
/// Each partition is paginated to the end before the next one starts, and
/// nothing is returned until the last partition is drained. With no
/// properties at all the listing is read once without a `properties` param.
pub async fn merge_partitions<G>(
    getter: &G,
    path: &str,
    base_params: &QueryParams,
    properties: &[String],
    max_len: usize,
    data_field: &str,
) -> Result<Vec<Record>>
where
    G: Getter + ?Sized,
{
    let span = info_span!("merge.partitions", path, properties = properties.len());
    collect_partitions(getter, path, base_params, properties, max_len, data_field)
        .instrument(span)
        .await
}

async fn collect_partitions<G>(
    getter: &G,
    path: &str,
    base_params: &QueryParams,
    properties: &[String],
    max_len: usize,
    data_field: &str,
) -> Result<Vec<Record>>
where
    G: Getter + ?Sized,
{
    let mut buffer = MergeBuffer::new();

    if properties.is_empty() {
        drain_into(&mut buffer, getter, path, base_params.clone(), data_field).await?;
        return Ok(buffer.into_records());
    }

    for (idx, chunk) in split_properties(properties, max_len).enumerate() {
        let mut params = base_params.clone();
        params.insert(PROPERTIES_PARAM.to_string(), chunk.join(","));

        let pages = drain_into(&mut buffer, getter, path, params, data_field).await?;
        debug!(
            partition = idx,
            partition_properties = chunk.len(),
            pages,
            records = buffer.len(),
            "partition drained"
        );
    }

    Ok(buffer.into_records())
}

async fn drain_into<G>(
    buffer: &mut MergeBuffer,
    getter: &G,
    path: &str,
    params: QueryParams,
    data_field: &str,
) -> Result<usize>
where
    G: Getter + ?Sized,
{
    let mut pages = fetch_pages(getter, path, params, data_field);
    let mut count = 0usize;
    while let Some(page) = pages.try_next().await? {
        count += 1;
        for record in page.results {
            buffer.push(record);
        }
    }
    Ok(count)
}
