//! Query extensions over the stored telemetry trees
//!
//! Pure functions that derive identifiers and build filtered, sorted views
//! from the OTLP roots. Nothing here mutates a root or touches the store.

pub mod logs;
pub mod metrics;
pub mod traces;

pub use logs::{filter_logs, request_response, CapturedRequest, LogFilter, LogView, RequestResponsePair};
pub use metrics::{latency_percentiles, percentile, service_and_route, LatencyPercentiles};
pub use traces::{filter_traces, resource_name, route, span_duration_ms, trace_id_hex, TraceFilter};

use crate::otel::proto::KeyValue;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("malformed request capture: {0}")]
    MalformedCapture(#[from] serde_json::Error),
}

/// First string value stored under `key`. Duplicate keys are legal on the
/// wire; the first match wins.
pub fn string_attribute<'a>(attributes: &'a [KeyValue], key: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|kv| kv.key == key)
        .and_then(|kv| kv.value.as_ref())
        .and_then(|v| v.as_str())
}

/// Page a sorted listing. `page` is 1-based; a `page_size` of zero disables
/// paging and returns everything.
pub fn paginate<T>(items: Vec<T>, page: usize, page_size: usize) -> Vec<T> {
    if page_size == 0 {
        return items;
    }
    let start = page.saturating_sub(1).saturating_mul(page_size);
    items.into_iter().skip(start).take(page_size).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paginate_slices_one_based_pages() {
        let items: Vec<u32> = (1..=10).collect();
        assert_eq!(paginate(items.clone(), 1, 4), vec![1, 2, 3, 4]);
        assert_eq!(paginate(items.clone(), 3, 4), vec![9, 10]);
        assert_eq!(paginate(items.clone(), 4, 4), Vec::<u32>::new());
        // zero page size means no paging
        assert_eq!(paginate(items.clone(), 1, 0).len(), 10);
        // page zero is treated as the first page
        assert_eq!(paginate(items, 0, 3), vec![1, 2, 3]);
    }
}
