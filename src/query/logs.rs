//! Structured log views and request/response capture reconstruction

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use super::traces::resource_name;
use super::QueryError;
use crate::otel::proto::{LogRecord, LogsData};

/// Body prefixes that mark request/response capture and error-channel
/// records. These never appear in generic log listings.
pub const REQUEST_TAG: &str = "[REQUEST]";
pub const RESPONSE_TAG: &str = "[RESPONSE]";
pub const ERROR_TAG: &str = "[ERROR]";

const CAPTURE_TAGS: &[&str] = &[REQUEST_TAG, RESPONSE_TAG, ERROR_TAG];

fn is_capture_record(body: &str) -> bool {
    CAPTURE_TAGS.iter().any(|tag| body.starts_with(tag))
}

/// One flattened log line as the viewer lists it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogView {
    pub service: String,
    /// Decimal string to survive JSON consumers; see the wire model.
    pub time_unix_nano: String,
    pub severity_number: i32,
    pub severity_text: String,
    pub body: String,
    pub trace_id: String,
    pub span_id: String,
}

impl LogView {
    fn from_record(service: &str, record: &LogRecord) -> Self {
        Self {
            service: service.to_string(),
            time_unix_nano: record.time_unix_nano.to_string(),
            severity_number: record.severity_number,
            severity_text: record.severity_text.clone(),
            body: record.body_str().to_string(),
            trace_id: hex::encode(&record.trace_id),
            span_id: hex::encode(&record.span_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogFilter {
    /// `"all"` or an exact `service.name` match.
    pub resource: String,
    /// `"all"` or an exact `severity_text` match.
    pub severity: String,
    /// Case-insensitive substring over the body; empty matches everything.
    pub search: String,
    /// Keep only records whose offset-adjusted date equals this date.
    pub date: Option<NaiveDate>,
    /// Viewer's UTC offset in hours, applied before the date comparison.
    pub utc_offset_hours: i32,
    /// Oldest-first when set; the default is newest-first.
    pub ascending: bool,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            resource: "all".to_string(),
            severity: "all".to_string(),
            search: String::new(),
            date: None,
            utc_offset_hours: 0,
            ascending: false,
        }
    }
}

fn matches(service: &str, record: &LogRecord, filter: &LogFilter) -> bool {
    let body = record.body_str();
    if is_capture_record(body) {
        return false;
    }
    if filter.resource != "all" && service != filter.resource {
        return false;
    }
    if filter.severity != "all" && record.severity_text != filter.severity {
        return false;
    }
    if !filter.search.is_empty()
        && !body.to_lowercase().contains(&filter.search.to_lowercase())
    {
        return false;
    }
    if let Some(target) = filter.date {
        let adjusted = DateTime::from_timestamp_nanos(record.time_unix_nano as i64)
            + Duration::hours(filter.utc_offset_hours as i64);
        if adjusted.date_naive() != target {
            return false;
        }
    }
    true
}

/// Flatten log roots into a filtered listing sorted by timestamp.
pub fn filter_logs(roots: &[LogsData], filter: &LogFilter) -> Vec<LogView> {
    let mut listing: Vec<(u64, LogView)> = Vec::new();

    for root in roots {
        for resource_logs in &root.resource_logs {
            let service = resource_name(resource_logs.resource.as_ref());
            for scope_logs in &resource_logs.scope_logs {
                for record in &scope_logs.log_records {
                    if matches(service, record, filter) {
                        listing.push((record.time_unix_nano, LogView::from_record(service, record)));
                    }
                }
            }
        }
    }

    if filter.ascending {
        listing.sort_by_key(|(ts, _)| *ts);
    } else {
        listing.sort_by_key(|(ts, _)| std::cmp::Reverse(*ts));
    }
    listing.into_iter().map(|(_, view)| view).collect()
}

/// Trace id of the first log record (first resource, first scope),
/// hex-encoded.
pub fn log_trace_id_hex(logs: &LogsData) -> Option<String> {
    logs.resource_logs
        .first()
        .and_then(|rl| rl.scope_logs.first())
        .and_then(|sl| sl.log_records.first())
        .map(|record| hex::encode(&record.trace_id))
}

/// A `[REQUEST]` capture body, parsed. Headers and query are explicit
/// ordered name → value-list maps; bodies keep whatever shape the capture
/// recorded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    #[serde(deserialize_with = "one_or_many")]
    pub headers: BTreeMap<String, Vec<String>>,
    #[serde(deserialize_with = "one_or_many")]
    pub query: BTreeMap<String, Vec<String>>,
    pub body: serde_json::Value,
}

/// Captures record single-valued entries as bare strings and multi-valued
/// ones as arrays; normalize both to value lists.
fn one_or_many<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    let raw = BTreeMap::<String, OneOrMany>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(name, values)| {
            let values = match values {
                OneOrMany::One(v) => vec![v],
                OneOrMany::Many(vs) => vs,
            };
            (name, values)
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponsePair {
    pub trace_id: String,
    pub request: CapturedRequest,
    /// Response shapes are arbitrary; kept as the raw captured string.
    pub response: String,
}

/// Reconstruct the request/response capture of one logs root: the first
/// `[REQUEST]`-tagged and first `[RESPONSE]`-tagged records form the pair.
/// Returns `None` when either tag is missing.
pub fn request_response(root: &LogsData) -> Result<Option<RequestResponsePair>, QueryError> {
    let mut request: Option<&LogRecord> = None;
    let mut response: Option<&LogRecord> = None;

    for resource_logs in &root.resource_logs {
        for scope_logs in &resource_logs.scope_logs {
            for record in &scope_logs.log_records {
                let body = record.body_str();
                if request.is_none() && body.starts_with(REQUEST_TAG) {
                    request = Some(record);
                } else if response.is_none() && body.starts_with(RESPONSE_TAG) {
                    response = Some(record);
                }
            }
        }
    }

    let (request, response) = match (request, response) {
        (Some(req), Some(resp)) => (req, resp),
        _ => return Ok(None),
    };

    let request_body = request.body_str().trim_start_matches(REQUEST_TAG).trim();
    let parsed: CapturedRequest = serde_json::from_str(request_body)?;

    Ok(Some(RequestResponsePair {
        trace_id: hex::encode(&request.trace_id),
        request: parsed,
        response: response
            .body_str()
            .trim_start_matches(RESPONSE_TAG)
            .trim()
            .to_string(),
    }))
}
