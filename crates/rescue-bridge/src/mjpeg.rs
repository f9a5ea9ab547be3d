//! MJPEG stream and single-frame snapshot over the [`FrameCache`].

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::Stream;
use futures_util::stream;
use rescue_middleware::{Frame, FrameCache, FrameWatcher};
use serde_json::json;
use tracing::debug;

/// Multipart boundary token.
pub const BOUNDARY: &str = "frameboundary";

pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frameboundary";

pub const STREAM_CACHE_CONTROL: &str = "no-cache, no-store, must-revalidate";

/// Encode one JPEG part of the multipart stream.
pub fn encode_part(frame: &Frame) -> Bytes {
    let head = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        frame.data.len()
    );
    let mut out = BytesMut::with_capacity(head.len() + frame.data.len() + 2);
    out.put_slice(head.as_bytes());
    out.put_slice(&frame.data);
    out.put_slice(b"\r\n");
    out.freeze()
}

/// Yield a part for every new frame.
///
/// The cached frame goes out at once if there is one; after that the cache is
/// re-read each time the watcher is signalled or `wait` elapses. A frame whose
/// sequence token was already sent is skipped, so a quiet camera does not
/// produce duplicate parts.
pub fn frame_stream(
    watcher: FrameWatcher,
    wait: Duration,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    stream::unfold((watcher, 0u64), move |(watcher, last_sent)| async move {
        loop {
            if let Some(frame) = watcher.latest()
                && frame.seq != last_sent
            {
                let part = encode_part(&frame);
                return Some((Ok(part), (watcher, frame.seq)));
            }
            if !watcher.wait(wait).await {
                debug!(watcher = %watcher.id(), "no frame signal, re-checking cache");
            }
        }
    })
}

/// The multipart response for one MJPEG client.
pub fn stream_response(watcher: FrameWatcher, wait: Duration) -> Response {
    (
        [
            (header::CONTENT_TYPE, STREAM_CONTENT_TYPE),
            (header::CACHE_CONTROL, STREAM_CACHE_CONTROL),
        ],
        Body::from_stream(frame_stream(watcher, wait)),
    )
        .into_response()
}

/// Answer a snapshot request with the cached frame, or 503 before the first
/// frame has arrived.
pub fn snapshot_response(frames: &FrameCache) -> Response {
    match frames.latest() {
        Some(frame) => (
            [
                (header::CONTENT_TYPE, "image/jpeg"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            frame.data,
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "no frame available" })),
        )
            .into_response(),
    }
}
