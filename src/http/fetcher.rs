use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::errors::{CrmTapError, Result};
use crate::http::{Getter, QueryParams};
use crate::pipeline::record::Record;

/// Query parameter carrying the pagination cursor.
pub const CURSOR_PARAM: &str = "after";
pub const DEFAULT_DATA_FIELD: &str = "results";

// =========================== Wire types ======================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub next: Option<NextPage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextPage {
    #[serde(deserialize_with = "cursor_as_string")]
    pub after: String,
}

/// One response of a paginated listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub results: Vec<Record>,
    pub paging: Option<Paging>,
}

impl Page {
    /// Decode a page whose records live under `data_field`.
    ///
    /// A missing or null data field is an empty page; `paging` is optional.
    pub fn from_value(mut body: Value, data_field: &str) -> Result<Self> {
        if !body.is_object() {
            return Err(CrmTapError::PaginationError(format!(
                "expected a JSON object page, got {}",
                type_name(&body)
            )));
        }

        let results = match body.get_mut(data_field).map(Value::take) {
            None | Some(Value::Null) => Vec::new(),
            Some(items) => serde_json::from_value(items)?,
        };
        let paging = match body.get_mut("paging").map(Value::take) {
            None | Some(Value::Null) => None,
            Some(p) => Some(serde_json::from_value(p)?),
        };

        Ok(Self { results, paging })
    }

    /// Cursor for the following page, if the API announced one.
    pub fn next_cursor(&self) -> Option<&str> {
        self.paging
            .as_ref()
            .and_then(|p| p.next.as_ref())
            .map(|n| n.after.as_str())
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn cursor_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

// =========================== Fetcher =========================================

/// Follow `paging.next.after` cursors from the first page to the last.
///
/// Nothing is requested until the stream is polled. Every request is the
/// base params plus `after=<cursor>` once a cursor is known. The stream ends
/// after the first page without `paging.next`, or after yielding an error.
pub fn fetch_pages<'a, G>(
    getter: &'a G,
    path: &'a str,
    base_params: QueryParams,
    data_field: &'a str,
) -> BoxStream<'a, Result<Page>>
where
    G: Getter + ?Sized,
{
    let s = async_stream::try_stream! {
        let mut cursor: Option<String> = None;
        let mut page_number = 0u64;

        loop {
            let mut params = base_params.clone();
            if let Some(after) = &cursor {
                params.insert(CURSOR_PARAM.to_string(), after.clone());
            }

            let body = getter.get(path, &params).await?;
            let page = Page::from_value(body, data_field)?;
            page_number += 1;
            trace!(page = page_number, items = page.results.len(), path, "fetched page");

            cursor = page.next_cursor().map(str::to_string);
            let last = cursor.is_none();
            yield page;

            if last {
                debug!(pages = page_number, path, "pagination finished");
                break;
            }
        }
    };
    s.boxed()
}
