//! # SSE decoder
//!
//! Turns the raw bytes of a `text/event-stream` response into named events:
//! - bytes are buffered so frames and UTF-8 sequences may span chunks
//! - lines end in LF, CRLF or a lone CR
//! - `event:` names the frame (default `message`), `data:` lines are joined
//!   with `\n`, a blank line dispatches, `:` starts a comment
//! - `id:` and `retry:` are accepted and ignored; there is no reconnect

use bytes::{Buf, BytesMut};

use opsdeck_core::events::{ChannelEvent, DEFAULT_EVENT_NAME};

/// Incremental SSE frame decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    event_name: Option<String>,
    data_lines: Vec<String>,
    /// The last line ended in CR at a chunk boundary; a leading LF in the
    /// next chunk belongs to it.
    skip_next_lf: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk and collect every frame it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ChannelEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(line) = self.take_line() {
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// End of stream: flush a last unterminated line and a frame that was
    /// never followed by a blank line.
    pub fn finish(&mut self) -> Vec<ChannelEvent> {
        let mut events = Vec::new();
        while let Some(line) = self.take_line() {
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        if !self.buffer.is_empty() {
            let rest = String::from_utf8_lossy(&self.buffer).into_owned();
            self.buffer.clear();
            if let Some(event) = self.process_line(&rest) {
                events.push(event);
            }
        }
        if let Some(event) = self.dispatch() {
            events.push(event);
        }
        events
    }

    fn take_line(&mut self) -> Option<String> {
        if self.skip_next_lf {
            let first = *self.buffer.first()?;
            self.skip_next_lf = false;
            if first == b'\n' {
                self.buffer.advance(1);
            }
        }
        let pos = self.buffer.iter().position(|&b| b == b'\n' || b == b'\r')?;
        let ended_in_cr = self.buffer[pos] == b'\r';
        let line_bytes = self.buffer.split_to(pos);
        self.buffer.advance(1);
        if ended_in_cr {
            match self.buffer.first() {
                Some(b'\n') => self.buffer.advance(1),
                Some(_) => {}
                None => self.skip_next_lf = true,
            }
        }
        Some(String::from_utf8_lossy(&line_bytes).into_owned())
    }

    fn process_line(&mut self, line: &str) -> Option<ChannelEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event_name = Some(value.to_string()),
            "data" => self.data_lines.push(value.to_string()),
            "id" | "retry" => {}
            other => tracing::trace!(field = other, "ignoring unknown SSE field"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<ChannelEvent> {
        let name = self.event_name.take();
        if self.data_lines.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data_lines).join("\n");
        let name = match name {
            Some(n) if !n.is_empty() => n,
            _ => DEFAULT_EVENT_NAME.to_string(),
        };
        Some(ChannelEvent { name, data })
    }
}

/// Decode a complete SSE body in one go.
pub fn parse_sse_text(raw: &str) -> Vec<ChannelEvent> {
    let mut decoder = SseDecoder::new();
    let mut events = decoder.feed(raw.as_bytes());
    events.extend(decoder.finish());
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(name: &str, data: &str) -> ChannelEvent {
        ChannelEvent::new(name, data)
    }

    #[test]
    fn parse_named_events() {
        let raw = "event:meta\ndata:jobId=7\n\nevent:stdout\ndata:hello\n\nevent:end\ndata:0\n\n";
        assert_eq!(
            parse_sse_text(raw),
            vec![ev("meta", "jobId=7"), ev("stdout", "hello"), ev("end", "0")]
        );
    }

    #[test]
    fn single_space_after_colon_is_stripped() {
        let events = parse_sse_text("event: stdout\ndata:  indented\n\n");
        assert_eq!(events, vec![ev("stdout", " indented")]);
    }

    #[test]
    fn multiline_data_is_joined() {
        let events = parse_sse_text("event:stdout\ndata:a\ndata:b\n\n");
        assert_eq!(events, vec![ev("stdout", "a\nb")]);
    }

    #[test]
    fn default_name_is_message() {
        let events = parse_sse_text("data:plain\n\n");
        assert_eq!(events, vec![ev("message", "plain")]);
    }

    #[test]
    fn comments_and_ids_are_ignored() {
        let events = parse_sse_text(": keepalive\nid: 3\nretry: 1000\nevent:meta\ndata:x\n\n");
        assert_eq!(events, vec![ev("meta", "x")]);
    }

    #[test]
    fn frame_without_data_is_not_dispatched() {
        let events = parse_sse_text("event:meta\n\nevent:stdout\ndata:y\n\n");
        assert_eq!(events, vec![ev("stdout", "y")]);
    }

    #[test]
    fn empty_data_line_yields_empty_payload() {
        let events = parse_sse_text("event:stdout\ndata:\n\n");
        assert_eq!(events, vec![ev("stdout", "")]);
    }

    #[test]
    fn crlf_and_cr_line_endings() {
        let events = parse_sse_text("event:meta\r\ndata:a\r\n\r\nevent:stdout\rdata:b\r\r");
        assert_eq!(events, vec![ev("meta", "a"), ev("stdout", "b")]);
    }

    #[test]
    fn frames_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event:std").is_empty());
        assert!(decoder.feed(b"out\ndata:hel").is_empty());
        assert!(decoder.feed(b"lo\n").is_empty());
        assert_eq!(decoder.feed(b"\n"), vec![ev("stdout", "hello")]);
    }

    #[test]
    fn crlf_split_between_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event:meta\r").is_empty());
        assert_eq!(decoder.feed(b"\ndata:x\r\n\r"), vec![ev("meta", "x")]);
        // LF completing the CRLF is not a second blank line.
        assert!(decoder.feed(b"\n").is_empty());
        assert_eq!(decoder.feed(b"data:y\n\n"), vec![ev("message", "y")]);
    }

    #[test]
    fn cr_terminated_frame_dispatches_without_more_input() {
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.feed(b"event:end\rdata:0\r\r"), vec![ev("end", "0")]);
    }

    #[test]
    fn lone_cr_then_non_lf_chunk() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data:a\r").is_empty());
        assert_eq!(decoder.feed(b"\r"), vec![ev("message", "a")]);
    }

    #[test]
    fn utf8_split_across_chunks() {
        let bytes = "event:stdout\ndata:连接成功\n\n".as_bytes();
        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        for chunk in bytes.chunks(3) {
            events.extend(decoder.feed(chunk));
        }
        assert_eq!(events, vec![ev("stdout", "连接成功")]);
    }

    #[test]
    fn trailing_frame_flushed_at_finish() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event:end\ndata:0").is_empty());
        assert_eq!(decoder.finish(), vec![ev("end", "0")]);
    }

    #[test]
    fn finish_on_clean_boundary_yields_nothing() {
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.feed(b"event:end\ndata:0\n\n").len(), 1);
        assert!(decoder.finish().is_empty());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn frames() -> impl Strategy<Value = Vec<(&'static str, String)>> {
            proptest::collection::vec(
                (
                    prop::sample::select(vec!["meta", "stdout", "stderr", "error", "end"]),
                    "([a-z0-9=é连][a-z0-9 =é连]{0,11})?",
                ),
                0..12,
            )
        }

        proptest! {
            #[test]
            fn any_chunking_decodes_like_the_whole_body(
                frames in frames(),
                eol in prop::sample::select(vec!["\n", "\r\n", "\r"]),
                cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..8),
            ) {
                let body: String = frames
                    .iter()
                    .map(|(name, data)| format!("event:{name}{eol}data:{data}{eol}{eol}"))
                    .collect();
                let bytes = body.as_bytes();

                let mut offsets: Vec<usize> = cuts.iter().map(|c| c.index(bytes.len() + 1)).collect();
                offsets.push(0);
                offsets.push(bytes.len());
                offsets.sort_unstable();
                offsets.dedup();

                let mut decoder = SseDecoder::new();
                let mut chunked = Vec::new();
                for pair in offsets.windows(2) {
                    chunked.extend(decoder.feed(&bytes[pair[0]..pair[1]]));
                }
                chunked.extend(decoder.finish());

                let expected: Vec<ChannelEvent> = frames
                    .iter()
                    .map(|(name, data)| ChannelEvent::new(*name, data.as_str()))
                    .collect();
                prop_assert_eq!(&chunked, &expected);
                prop_assert_eq!(parse_sse_text(&body), expected);
            }
        }
    }
}
