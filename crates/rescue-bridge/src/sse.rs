//! Server-Sent Events adapter.
//!
//! Turns a [`Subscription`] into the `event: <type>\ndata: <payload>\n\n`
//! stream served by axum's [`Sse`](axum::response::sse::Sse), with a
//! `: keepalive` comment whenever the queue stays idle.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive};
use futures_util::Stream;
use futures_util::stream;
use rescue_middleware::{Subscription, Wake};
use rescue_types::StreamEvent;
use tracing::{debug, warn};

/// Comment text sent when nothing was delivered within the keepalive
/// interval.
pub const KEEPALIVE_TEXT: &str = "keepalive";

/// Encode one event. A payload containing newlines becomes several `data:`
/// lines, which the client joins back together.
pub fn encode_event(event: &StreamEvent) -> Event {
    let data = event.payload.replace("\r\n", "\n").replace('\r', "\n");
    Event::default().event(&event.event_type).data(data)
}

pub fn keep_alive(interval: Duration) -> KeepAlive {
    KeepAlive::new().interval(interval).text(KEEPALIVE_TEXT)
}

/// Stream the events of `subscription` in FIFO order.
///
/// The stream ends when the subscriber is evicted or its queue closes. It
/// owns the subscription, so dropping the response body deregisters it.
pub fn event_stream(
    subscription: Subscription,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    stream::unfold(subscription, |mut subscription| async move {
        match subscription.recv().await {
            Wake::Event(event) => Some((Ok(encode_event(&event)), subscription)),
            Wake::Evicted => {
                warn!(subscriber = %subscription.id(), "sse client evicted for falling behind");
                None
            }
            Wake::Closed | Wake::Idle => {
                debug!(subscriber = %subscription.id(), "event stream closed");
                None
            }
        }
    })
}
