//! SSE plumbing for the completion adapter.
//!
//! The provider sends `data:` payloads separated by blank lines.  We
//! buffer raw bytes, peel off complete payloads, and hand each one to a
//! wire-format parser that emits zero or more [`StreamEvent`]s.

use pal_domain::error::{Error, Result};
use pal_domain::stream::{BoxStream, StreamEvent};

/// Convert a [`reqwest::Error`] into the domain error, keeping timeouts
/// distinguishable.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::LlmTimeout(e.to_string())
    } else if e.is_connect() {
        Error::LlmUnavailable(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Peel complete `data:` payloads off the front of `buffer`.
///
/// Events are delimited by `\n\n`; `event:`/`id:`/`retry:` lines are
/// ignored.  A trailing partial event stays in the buffer for the next
/// chunk.
pub(crate) fn drain_data_payloads(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        for line in block.lines() {
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

/// Wrap an SSE `reqwest::Response` into a [`BoxStream`] of events.
///
/// `parse` receives each payload string.  The stream flushes the buffer
/// when the body closes and guarantees a trailing `Done` even when the
/// provider never sent one.
pub(crate) fn into_event_stream<F>(
    response: reqwest::Response,
    mut parse: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut done_emitted = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for payload in drain_data_payloads(&mut buffer) {
                        for event in parse(&payload) {
                            if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                done_emitted = true;
                            }
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for payload in drain_data_payloads(&mut buffer) {
                            for event in parse(&payload) {
                                if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                    done_emitted = true;
                                }
                                yield event;
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }

        if !done_emitted {
            yield Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            });
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_event_is_drained() {
        let mut buf = String::from("event: message\ndata: {\"a\":1}\n\n");
        assert_eq!(drain_data_payloads(&mut buf), vec!["{\"a\":1}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_event_stays_buffered() {
        let mut buf = String::from("data: whole\n\ndata: par");
        assert_eq!(drain_data_payloads(&mut buf), vec!["whole"]);
        assert_eq!(buf, "data: par");

        buf.push_str("tial\n\n");
        assert_eq!(drain_data_payloads(&mut buf), vec!["partial"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn non_data_lines_are_ignored() {
        let mut buf = String::from("event: ping\nid: 7\nretry: 5000\ndata: payload\n\n");
        assert_eq!(drain_data_payloads(&mut buf), vec!["payload"]);
    }

    #[test]
    fn done_sentinel_passes_through() {
        let mut buf = String::from("data: [DONE]\n\n");
        assert_eq!(drain_data_payloads(&mut buf), vec!["[DONE]"]);
    }

    #[test]
    fn empty_data_lines_are_dropped() {
        let mut buf = String::from("data: \n\n");
        assert!(drain_data_payloads(&mut buf).is_empty());
        assert!(buf.is_empty());
    }
}
