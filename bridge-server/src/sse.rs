//! Server-sent event framing for streaming invocations.

use std::convert::Infallible;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bridge_kernel::{InvocationStream, StreamFrame};
use bridge_primitives::RequestId;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::{HeaderMap, HeaderValue, header};
use tracing::{debug, warn};

const ENCODE_FAILURE: &str = "event: error\ndata: {\"kind\":\"error\",\"error\":{\"kind\":\"execution_error\",\"message\":\"failed to encode frame\"}}\n\n";

/// Encodes one frame as `event: <kind>` plus a JSON `data:` line.
#[must_use]
pub fn encode_frame(frame: &StreamFrame) -> Bytes {
    match serde_json::to_string(frame) {
        Ok(json) => Bytes::from(format!("event: {}\ndata: {json}\n\n", frame.kind())),
        Err(err) => {
            warn!(error = %err, kind = frame.kind(), "failed to serialize stream frame");
            Bytes::from_static(ENCODE_FAILURE.as_bytes())
        }
    }
}

/// Turns an invocation into an SSE body stream.
///
/// Dropping the returned stream drops the invocation, which cancels the tool
/// when the client goes away.
pub fn frame_stream(
    invocation: InvocationStream,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let request_id: RequestId = invocation.request_id();
    invocation.map(move |frame| {
        if frame.is_terminal() {
            debug!(%request_id, kind = frame.kind(), "stream finished");
        }
        Ok(encode_frame(&frame))
    })
}

/// Wraps a byte stream in an event-stream response.
pub fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    (headers, Body::from_stream(stream)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    use bridge_kernel::{ErrorBody, ErrorKind};

    #[test]
    fn frames_carry_event_name_and_json() {
        let bytes = encode_frame(&StreamFrame::OutputDelta { delta: "A".into() });
        assert_eq!(
            bytes,
            Bytes::from_static(b"event: output_delta\ndata: {\"kind\":\"output_delta\",\"delta\":\"A\"}\n\n")
        );
    }

    #[test]
    fn error_frames_keep_the_kind() {
        let bytes = encode_frame(&StreamFrame::Error {
            error: ErrorBody {
                kind: ErrorKind::ExecutionError,
                message: "tool `x` failed".into(),
            },
        });
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("event: error\n"));
        assert!(text.contains("\"execution_error\""));
    }

    #[test]
    fn fallback_frame_is_valid_json() {
        let data = ENCODE_FAILURE
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .unwrap();
        let frame: StreamFrame = serde_json::from_str(data).unwrap();
        assert!(frame.is_terminal());
    }

    #[test]
    fn response_is_an_event_stream() {
        let response = sse_response(futures::stream::empty::<Result<Bytes, Infallible>>());
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
    }
}
