#[cfg(test)]
#[path = "stream_test.rs"]
mod tests;

use futures::stream::StreamExt;
use log::debug;
use tokio_util::sync::CancellationToken;

use chatbridge_models::{StreamError, StreamEvent, StreamHandlers};

use crate::sse::FrameDecoder;

/// Drives one open response body to completion: pulls chunks, feeds the
/// frame decoder, and dispatches every decoded event to the handler set in
/// arrival order. Returns once a terminal event was dispatched, the body
/// ended, or the token was cancelled.
///
/// Cancellation suppresses all further dispatch, including transport errors
/// that are a side effect of aborting. Any other read failure is reported
/// exactly once through `on_error`.
pub async fn run_stream(
    response: reqwest::Response,
    handlers: &mut dyn StreamHandlers,
    cancel: CancellationToken,
) {
    let mut body = response.bytes_stream();
    let mut decoder = FrameDecoder::new();

    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("stream cancelled");
                return;
            }
            item = body.next() => item,
        };

        match item {
            Some(Ok(chunk)) => {
                for event in decoder.feed(&chunk) {
                    if cancel.is_cancelled() {
                        return;
                    }
                    handlers.dispatch(event);
                }
                if decoder.is_closed() {
                    return;
                }
            }
            Some(Err(err)) => {
                if !cancel.is_cancelled() {
                    handlers.dispatch(StreamEvent::Error(StreamError::stream(err.to_string())));
                }
                return;
            }
            None => {
                if let Some(event) = decoder.finish() {
                    if !cancel.is_cancelled() {
                        handlers.dispatch(event);
                    }
                }
                return;
            }
        }
    }
}
