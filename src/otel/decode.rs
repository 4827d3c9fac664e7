//! OTLP HTTP body decoding
//!
//! Turns an inbound export request into a typed root. Two wire formats are
//! negotiated by content type: protobuf is decoded, JSON is recognized but
//! rejected (exporters must send protobuf). Failures come back as a tagged
//! result, never a panic, so the endpoint can pick the HTTP status.

use axum::body::Body;
use axum::http::{header::CONTENT_TYPE, HeaderMap};
use bytes::BytesMut;
use futures::StreamExt;
use prost::Message;

/// Hard cap on an export body. Anything larger is refused before decode.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";
pub const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("request body exceeds {MAX_BODY_BYTES} bytes")]
    TooLarge,

    #[error("request body read was canceled: {0}")]
    Canceled(String),

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

fn require_protobuf(headers: &HeaderMap) -> Result<(), DecodeError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let media_type = content_type.split(';').next().unwrap_or("").trim();

    if media_type.eq_ignore_ascii_case(PROTOBUF_CONTENT_TYPE) {
        return Ok(());
    }
    // JSON ingestion is not a supported decode path; reject it the same way
    // as any other media type so exporters fall back to protobuf.
    if media_type.is_empty() {
        return Err(DecodeError::UnsupportedContentType("<missing>".to_string()));
    }
    Err(DecodeError::UnsupportedContentType(media_type.to_string()))
}

/// Accumulate the chunked body up to [`MAX_BODY_BYTES`]. A transport error
/// mid-read surfaces as `Canceled`; crossing the cap aborts immediately
/// instead of buffering the remainder.
async fn read_body(body: Body) -> Result<bytes::Bytes, DecodeError> {
    let mut stream = body.into_data_stream();
    let mut buf = BytesMut::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| DecodeError::Canceled(err.to_string()))?;
        if buf.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(DecodeError::TooLarge);
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(buf.freeze())
}

/// Decode one OTLP export request body into its typed root
/// ([`super::proto::TracesData`], [`super::proto::MetricsData`], or
/// [`super::proto::LogsData`]).
pub async fn decode_export<T>(headers: &HeaderMap, body: Body) -> Result<T, DecodeError>
where
    T: Message + Default,
{
    require_protobuf(headers)?;
    let bytes = read_body(body).await?;
    T::decode(bytes).map_err(|err| DecodeError::Malformed(err.to_string()))
}
