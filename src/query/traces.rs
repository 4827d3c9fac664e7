//! Trace derivations and the trace listing view

use super::string_attribute;
use crate::otel::proto::{Resource, ResourceSpans, Span, TracesData};

pub const SERVICE_NAME_ATTR: &str = "service.name";
pub const URL_PATH_ATTR: &str = "url.path";

/// Instrumentation scopes that record outbound HTTP client calls. Spans from
/// these scopes carry the callee's path, so inbound server routes are
/// preferred when deriving the route of a resource.
pub const OUTBOUND_CLIENT_SCOPES: &[&str] = &[
    "System.Net.Http",
    "opentelemetry.instrumentation.http",
    "reqwest",
];

/// The `service.name` resource attribute, or empty when absent.
pub fn resource_name(resource: Option<&Resource>) -> &str {
    resource
        .and_then(|r| string_attribute(&r.attributes, SERVICE_NAME_ATTR))
        .unwrap_or("")
}

/// Trace id of the first span (first resource, first scope), hex-encoded.
/// Mixed-resource roots may carry other trace ids further in.
pub fn trace_id_hex(traces: &TracesData) -> Option<String> {
    traces
        .resource_spans
        .first()
        .and_then(|rs| rs.scope_spans.first())
        .and_then(|ss| ss.spans.first())
        .map(|span| hex::encode(&span.trace_id))
}

/// Span duration in milliseconds with 2-decimal precision. The subtraction
/// and the division to hundredths stay in integer space; nanosecond
/// timestamps exceed what an f64 can hold exactly.
pub fn span_duration_ms(span: &Span) -> f64 {
    let nanos = span.end_time_unix_nano.saturating_sub(span.start_time_unix_nano);
    (nanos / 10_000) as f64 / 100.0
}

/// The `url.path` of the first span of the first scope that is not a known
/// outbound HTTP client scope, falling back to the first scope outright.
pub fn route(resource_spans: &ResourceSpans) -> Option<&str> {
    let scope_spans = resource_spans
        .scope_spans
        .iter()
        .find(|ss| {
            let scope = ss.scope.as_ref().map(|s| s.name.as_str()).unwrap_or("");
            !OUTBOUND_CLIENT_SCOPES.contains(&scope)
        })
        .or_else(|| resource_spans.scope_spans.first())?;
    let span = scope_spans.spans.first()?;
    string_attribute(&span.attributes, URL_PATH_ATTR)
}

fn first_span(resource_spans: &ResourceSpans) -> Option<&Span> {
    resource_spans
        .scope_spans
        .first()
        .and_then(|ss| ss.spans.first())
}

fn min_start_time(resource_spans: &ResourceSpans) -> u64 {
    resource_spans
        .scope_spans
        .iter()
        .flat_map(|ss| ss.spans.iter())
        .map(|span| span.start_time_unix_nano)
        .min()
        .unwrap_or(u64::MAX)
}

#[derive(Debug, Clone)]
pub struct TraceFilter {
    /// `"all"` or an exact `service.name` match.
    pub resource: String,
    /// Keep only resources whose first span carries a `url.path` attribute.
    pub routes_only: bool,
}

impl Default for TraceFilter {
    fn default() -> Self {
        Self {
            resource: "all".to_string(),
            routes_only: false,
        }
    }
}

/// Flatten trace roots into a resource-level listing, newest first
/// (descending by the minimum span start within each resource).
pub fn filter_traces(roots: Vec<TracesData>, filter: &TraceFilter) -> Vec<ResourceSpans> {
    let mut listing: Vec<ResourceSpans> = roots
        .into_iter()
        .flat_map(|root| root.resource_spans)
        .filter(|rs| {
            filter.resource == "all" || resource_name(rs.resource.as_ref()) == filter.resource
        })
        .filter(|rs| {
            !filter.routes_only
                || first_span(rs)
                    .map(|span| string_attribute(&span.attributes, URL_PATH_ATTR).is_some())
                    .unwrap_or(false)
        })
        .collect();

    listing.sort_by(|a, b| min_start_time(b).cmp(&min_start_time(a)));
    listing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otel::proto::{string_kv, InstrumentationScope, ScopeSpans};

    fn resource(service: &str) -> Resource {
        Resource {
            attributes: vec![string_kv(SERVICE_NAME_ATTR, service)],
            dropped_attributes_count: 0,
        }
    }

    fn span(start: u64, end: u64, attrs: Vec<crate::otel::proto::KeyValue>) -> Span {
        Span {
            trace_id: vec![0x11; 16],
            span_id: vec![0x22; 8],
            name: "op".to_string(),
            start_time_unix_nano: start,
            end_time_unix_nano: end,
            attributes: attrs,
            ..Default::default()
        }
    }

    fn scoped(scope: &str, spans: Vec<Span>) -> ScopeSpans {
        ScopeSpans {
            scope: Some(InstrumentationScope {
                name: scope.to_string(),
                ..Default::default()
            }),
            spans,
            schema_url: String::new(),
        }
    }

    fn root(service: &str, start: u64, attrs: Vec<crate::otel::proto::KeyValue>) -> TracesData {
        TracesData {
            resource_spans: vec![ResourceSpans {
                resource: Some(resource(service)),
                scope_spans: vec![scoped("server", vec![span(start, start + 1_000_000, attrs)])],
                schema_url: String::new(),
            }],
        }
    }

    #[test]
    fn resource_name_missing_attribute_is_empty() {
        assert_eq!(resource_name(None), "");
        assert_eq!(
            resource_name(Some(&Resource {
                attributes: vec![string_kv("host.name", "box-1")],
                dropped_attributes_count: 0,
            })),
            ""
        );
        assert_eq!(resource_name(Some(&resource("billing"))), "billing");
    }

    #[test]
    fn duration_rounds_to_hundredths_without_float_drift() {
        let s = span(1_713_893_865_123_456_789, 1_713_893_865_123_696_789, vec![]);
        // 240_000 ns = 0.24 ms exactly
        assert_eq!(span_duration_ms(&s), 0.24);

        let backwards = span(2_000, 1_000, vec![]);
        assert_eq!(span_duration_ms(&backwards), 0.0);
    }

    #[test]
    fn route_prefers_non_client_scope() {
        let rs = ResourceSpans {
            resource: Some(resource("api")),
            scope_spans: vec![
                scoped(
                    "System.Net.Http",
                    vec![span(0, 1, vec![string_kv(URL_PATH_ATTR, "/outbound")])],
                ),
                scoped(
                    "Microsoft.AspNetCore",
                    vec![span(0, 1, vec![string_kv(URL_PATH_ATTR, "/inbound")])],
                ),
            ],
            schema_url: String::new(),
        };
        assert_eq!(route(&rs), Some("/inbound"));
    }

    #[test]
    fn route_falls_back_to_first_scope() {
        let rs = ResourceSpans {
            resource: Some(resource("api")),
            scope_spans: vec![scoped(
                "System.Net.Http",
                vec![span(0, 1, vec![string_kv(URL_PATH_ATTR, "/only")])],
            )],
            schema_url: String::new(),
        };
        assert_eq!(route(&rs), Some("/only"));
    }

    #[test]
    fn listing_filters_by_resource_and_sorts_newest_first() {
        let roots = vec![
            root("api", 100, vec![]),
            root("worker", 300, vec![]),
            root("api", 200, vec![]),
        ];

        let all = filter_traces(roots.clone(), &TraceFilter::default());
        assert_eq!(all.len(), 3);
        assert_eq!(min_start_time(&all[0]), 300);
        assert_eq!(min_start_time(&all[2]), 100);

        let api_only = filter_traces(
            roots,
            &TraceFilter {
                resource: "api".to_string(),
                routes_only: false,
            },
        );
        assert_eq!(api_only.len(), 2);
        assert!(api_only
            .iter()
            .all(|rs| resource_name(rs.resource.as_ref()) == "api"));
    }

    #[test]
    fn routes_only_drops_resources_without_url_path() {
        let roots = vec![
            root("api", 100, vec![string_kv(URL_PATH_ATTR, "/orders")]),
            root("worker", 200, vec![]),
        ];
        let listed = filter_traces(
            roots,
            &TraceFilter {
                resource: "all".to_string(),
                routes_only: true,
            },
        );
        assert_eq!(listed.len(), 1);
        assert_eq!(resource_name(listed[0].resource.as_ref()), "api");
    }
}
