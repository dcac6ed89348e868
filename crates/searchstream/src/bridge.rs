//! Fragment stream to response body adapter

use crate::orchestrator::FragmentStream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::any::Any;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use tracing::error;

/// Turn conversation output into body chunks
///
/// The first error, or a panic while producing the next fragment, is
/// rendered as a final `An error occurred: ...` chunk and the stream ends.
/// Transport-level errors are never produced.
pub fn bridge(
    fragments: FragmentStream,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    async_stream::stream! {
        let mut fragments = AssertUnwindSafe(fragments).catch_unwind();

        while let Some(item) = fragments.next().await {
            match item {
                Ok(Ok(fragment)) => yield Ok(Bytes::from(fragment.into_text())),
                Ok(Err(e)) => {
                    error!(error = %e, "Conversation failed");
                    yield Ok(Bytes::from(format!("An error occurred: {}", e)));
                    break;
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(panic = %message, "Conversation panicked");
                    yield Ok(Bytes::from(format!("An error occurred: {}", message)));
                    break;
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "internal panic".to_string()
    }
}
