//! Metric derivations: correlating ids and latency percentiles

use serde::Serialize;

use super::string_attribute;
use super::traces::{resource_name, URL_PATH_ATTR};
use crate::otel::proto::{HistogramDataPoint, Metric, MetricsData};

const HTTP_ROUTE_ATTR: &str = "http.route";

fn data_point_route(metric: &Metric) -> Option<&str> {
    if let Some(sum) = &metric.sum {
        if let Some(point) = sum.data_points.first() {
            return string_attribute(&point.attributes, URL_PATH_ATTR)
                .or_else(|| string_attribute(&point.attributes, HTTP_ROUTE_ATTR));
        }
    }
    if let Some(histogram) = &metric.histogram {
        if let Some(point) = histogram.data_points.first() {
            return string_attribute(&point.attributes, URL_PATH_ATTR)
                .or_else(|| string_attribute(&point.attributes, HTTP_ROUTE_ATTR));
        }
    }
    None
}

/// The (service, route) pair a metrics export is keyed under. Service comes
/// from the first resource; route from the first data point carrying a path
/// attribute, empty when none does.
pub fn service_and_route(metrics: &MetricsData) -> (String, String) {
    let service = metrics
        .resource_metrics
        .first()
        .map(|rm| resource_name(rm.resource.as_ref()))
        .unwrap_or("")
        .to_string();

    let route = metrics
        .resource_metrics
        .iter()
        .flat_map(|rm| rm.scope_metrics.iter())
        .flat_map(|sm| sm.metrics.iter())
        .find_map(data_point_route)
        .unwrap_or("")
        .to_string();

    (service, route)
}

/// P50/P90/P99 in the histogram's native unit (seconds for request
/// duration metrics).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyPercentiles {
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

/// Percentile over an explicit-bounds histogram: walk the cumulative counts
/// until they cover `quantile * total`, then interpolate linearly between
/// the containing bucket's bounds. A rank landing in the overflow bucket
/// clamps to the last bound.
pub fn percentile(bucket_counts: &[u64], explicit_bounds: &[f64], quantile: f64) -> f64 {
    let total: u64 = bucket_counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let rank = quantile * total as f64;

    let mut cumulative = 0.0;
    for (i, &count) in bucket_counts.iter().enumerate() {
        let next = cumulative + count as f64;
        if next >= rank && count > 0 {
            let lower = if i == 0 { 0.0 } else { explicit_bounds[i - 1] };
            let upper = match explicit_bounds.get(i) {
                Some(&bound) => bound,
                None => return explicit_bounds.last().copied().unwrap_or(lower),
            };
            let fraction = (rank - cumulative) / count as f64;
            return lower + (upper - lower) * fraction;
        }
        cumulative = next;
    }

    explicit_bounds.last().copied().unwrap_or(0.0)
}

pub fn latency_percentiles(point: &HistogramDataPoint) -> LatencyPercentiles {
    LatencyPercentiles {
        p50: percentile(&point.bucket_counts, &point.explicit_bounds, 0.50),
        p90: percentile(&point.bucket_counts, &point.explicit_bounds, 0.90),
        p99: percentile(&point.bucket_counts, &point.explicit_bounds, 0.99),
    }
}
