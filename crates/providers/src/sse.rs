//! Shared SSE plumbing for the provider adapters.
//!
//! Every upstream streams the same envelope: chunked bytes containing
//! `data:` lines separated by blank lines. The adapters only differ in
//! how a single payload maps to stream events, so that mapping is a
//! closure and the buffering lives here.

use futures_util::StreamExt;

use crate::util::from_reqwest;
use forge_domain::error::Result;
use forge_domain::stream::{BoxStream, StreamEvent};

/// Pull complete `data:` payloads out of the buffer, leaving any
/// trailing partial event in place for the next chunk.
pub(crate) fn take_payloads(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let event: String = buffer.drain(..pos + 2).collect();
        for line in event.lines() {
            if let Some(data) = line.trim().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
    }

    payloads
}

/// Wrap an SSE `reqwest::Response` into a stream of provider events.
///
/// `parse` maps one `data:` payload to zero or more events; it is
/// `FnMut` because tool-call assembly needs state across payloads. A
/// trailing payload without its blank-line terminator is flushed when
/// the body ends, and a fallback `Done` is appended if the upstream
/// never produced one.
pub(crate) fn event_stream<F>(
    response: reqwest::Response,
    mut parse: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut body = response.bytes_stream();
        let mut buffer = String::new();
        let mut done_seen = false;

        loop {
            let chunk = match body.next().await {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    yield Err(from_reqwest(e));
                    break;
                }
                None => {
                    // Body closed; force out whatever is still buffered.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                    }
                    for payload in take_payloads(&mut buffer) {
                        for event in parse(&payload) {
                            done_seen |= matches!(&event, Ok(StreamEvent::Done { .. }));
                            yield event;
                        }
                    }
                    break;
                }
            };

            buffer.push_str(&String::from_utf8_lossy(&chunk));
            for payload in take_payloads(&mut buffer) {
                for event in parse(&payload) {
                    done_seen |= matches!(&event, Ok(StreamEvent::Done { .. }));
                    yield event;
                }
            }
        }

        if !done_seen {
            yield Ok(StreamEvent::Done { usage: None, finish_reason: Some("stop".into()) });
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_event_is_extracted() {
        let mut buf = String::from("event: message\ndata: {\"a\":1}\n\n");
        assert_eq!(take_payloads(&mut buf), vec!["{\"a\":1}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_event_stays_buffered() {
        let mut buf = String::from("data: whole\n\ndata: torn");
        assert_eq!(take_payloads(&mut buf), vec!["whole"]);
        assert_eq!(buf, "data: torn");
    }

    #[test]
    fn multiple_events_in_one_chunk() {
        let mut buf = String::from("data: one\n\ndata: two\n\ndata: three\n\n");
        assert_eq!(take_payloads(&mut buf), vec!["one", "two", "three"]);
    }

    #[test]
    fn non_data_lines_are_skipped() {
        let mut buf = String::from("event: ping\nid: 7\nretry: 1000\ndata: keep\n\n");
        assert_eq!(take_payloads(&mut buf), vec!["keep"]);
    }

    #[test]
    fn empty_data_line_dropped() {
        let mut buf = String::from("data:\n\n");
        assert!(take_payloads(&mut buf).is_empty());
    }

    #[test]
    fn done_sentinel_passes_through() {
        let mut buf = String::from("data: [DONE]\n\n");
        assert_eq!(take_payloads(&mut buf), vec!["[DONE]"]);
    }

    #[test]
    fn incremental_chunks_reassemble() {
        let mut buf = String::from("data: par");
        assert!(take_payloads(&mut buf).is_empty());
        buf.push_str("tial\n\n");
        assert_eq!(take_payloads(&mut buf), vec!["partial"]);
    }
}
