use crate::error::ProxyError;
use crate::translate::CONTENT_TYPE_EVENT_STREAM;
use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::Response;
use futures::StreamExt;
use tracing::{debug, warn};

/// Relays a successful backend event stream to the browser chunk by chunk.
///
/// Bytes are forwarded as they arrive; nothing is reframed or buffered, so
/// backpressure comes from the browser's read rate.
pub fn relay_event_stream(upstream: reqwest::Response) -> Result<Response, ProxyError> {
    let url = upstream.url().clone();
    debug!(%url, "relaying event stream");

    let stream = upstream.bytes_stream().map(move |chunk| {
        if let Err(err) = &chunk {
            warn!(%url, error = %err, "event stream read failed");
        }
        chunk
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, CONTENT_TYPE_EVENT_STREAM)
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(stream))
        .map_err(|e| ProxyError::Internal(format!("failed to build stream response: {e}")))
}
