//! Incremental decoding of the message stream body into JSON frames.
//!
//! The body is newline-delimited. Lines of the form `data: <json>` carry a
//! frame; every other line (blank separators, comments, `event:` fields) is
//! skipped. Chunk boundaries from the transport are arbitrary, so a partial
//! trailing line is carried into the next chunk instead of being parsed early.

use std::collections::VecDeque;

use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

/// Marker that prefixes every data-bearing line.
pub const DATA_PREFIX: &[u8] = b"data: ";

/// Longest line kept while waiting for its terminator. Stage payloads carry
/// every model's full answer on one line, so this is generous.
pub const MAX_LINE_BYTES: usize = 32 * 1024 * 1024;

/// One decoded JSON event record.
pub type Frame = Value;

/// Line splitter that buffers bytes until a full line is available.
///
/// Buffering bytes rather than text keeps multi-byte UTF-8 sequences intact
/// when the transport splits them across chunks.
#[derive(Debug)]
pub struct FrameDecoder {
    pending: Vec<u8>,
    /// Prefix of `pending` already known to hold no newline.
    scanned: usize,
    max_line: usize,
    /// Dropping the rest of an oversized line up to its newline.
    discarding: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            max_line,
            discarding: false,
        }
    }

    /// Feed one transport chunk and return the frames it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.pending[from..].iter().position(|&b| b == b'\n') {
            let end = from + offset;
            if self.discarding {
                self.discarding = false;
            } else if let Some(frame) = decode_line(&self.pending[start..end]) {
                frames.push(frame);
            }
            start = end + 1;
            from = start;
        }
        self.pending.drain(..start);

        if self.pending.len() > self.max_line {
            warn!(bytes = self.pending.len(), "dropping oversized line");
            self.pending.clear();
            self.discarding = true;
        }
        self.scanned = self.pending.len();
        frames
    }

    /// Decode whatever is left once the transport reports end of data.
    pub fn finish(&mut self) -> Option<Frame> {
        let rest = std::mem::take(&mut self.pending);
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        decode_line(&rest)
    }

    /// Bytes held back waiting for a line terminator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Decode a single line (without its `\n`).
///
/// Returns `None` for lines without the data marker and for malformed JSON;
/// a bad frame is dropped so the rest of the stream still applies.
pub fn decode_line(line: &[u8]) -> Option<Frame> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let payload = line.strip_prefix(DATA_PREFIX)?;
    match serde_json::from_slice(payload) {
        Ok(frame) => Some(frame),
        Err(e) => {
            debug!(
                error = %e,
                line = %String::from_utf8_lossy(payload),
                "dropping malformed frame"
            );
            None
        }
    }
}

/// Lazy frame sequence over a stream of transport chunks.
///
/// Tied to one stream: once the chunk stream ends, the reader is exhausted.
pub struct FrameReader<S> {
    chunks: S,
    decoder: FrameDecoder,
    ready: VecDeque<Frame>,
    done: bool,
}

impl<S, B, E> FrameReader<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    pub fn new(chunks: S) -> Self {
        Self {
            chunks,
            decoder: FrameDecoder::new(),
            ready: VecDeque::new(),
            done: false,
        }
    }

    /// Read the next frame, awaiting more chunks as needed.
    ///
    /// Returns `Ok(None)` at end of data. A transport error is returned as-is
    /// and frames already decoded before it stay available.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, E> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(Some(frame));
            }
            if self.done {
                return Ok(None);
            }
            match self.chunks.next().await {
                Some(chunk) => {
                    let chunk = chunk?;
                    self.ready.extend(self.decoder.push(chunk.as_ref()));
                }
                None => {
                    self.done = true;
                    self.ready.extend(self.decoder.finish());
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::convert::Infallible;

    use futures::stream;
    use serde_json::json;

    use super::*;

    fn collect_all(chunks: &[&[u8]]) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new();
        let mut frames: Vec<Frame> = chunks.iter().flat_map(|c| decoder.push(c)).collect();
        frames.extend(decoder.finish());
        frames
    }

    #[test]
    fn ignores_non_data_lines() {
        let body: &[u8] = b": keepalive\nevent: message\ndata: {\"type\":\"complete\"}\n\n";
        assert_eq!(collect_all(&[body]), vec![json!({"type": "complete"})]);
    }

    #[test]
    fn split_at_every_offset_matches_unsplit() {
        let line = "data: {\"type\":\"stage1_complete\",\"data\":[{\"model\":\"Gemini Pro\",\"response\":\"h\u{e9}llo \u{2014} \u{1f600}\"}]}\n\n";
        let bytes = line.as_bytes();
        let expected = collect_all(&[bytes]);
        assert_eq!(expected.len(), 1);

        for cut in 0..=bytes.len() {
            let (a, b) = bytes.split_at(cut);
            assert_eq!(collect_all(&[a, b]), expected, "split at byte {cut}");
        }
        for first in 0..bytes.len() {
            for second in first..bytes.len() {
                let parts = [&bytes[..first], &bytes[first..second], &bytes[second..]];
                assert_eq!(collect_all(&parts), expected, "split at {first}/{second}");
            }
        }
    }

    #[test]
    fn one_byte_chunks() {
        let body: &[u8] = b"data: {\"type\":\"stage1_start\"}\n\ndata: {\"type\":\"stage2_start\"}\n\n";
        let chunks: Vec<&[u8]> = body.chunks(1).collect();
        assert_eq!(
            collect_all(&chunks),
            vec![json!({"type": "stage1_start"}), json!({"type": "stage2_start"})]
        );
    }

    #[test]
    fn malformed_json_is_dropped() {
        let body: &[u8] = b"data: {not valid json\ndata: {\"type\":\"complete\"}\n";
        assert_eq!(collect_all(&[body]), vec![json!({"type": "complete"})]);
    }

    #[test]
    fn crlf_line_endings() {
        let body: &[u8] = b"data: {\"type\":\"complete\"}\r\n\r\n";
        assert_eq!(collect_all(&[body]), vec![json!({"type": "complete"})]);
    }

    #[test]
    fn trailing_line_without_newline_decodes_on_finish() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\"comp").is_empty());
        assert!(decoder.push(b"lete\"}").is_empty());
        assert_eq!(decoder.pending_len(), 25);
        assert_eq!(decoder.finish(), Some(json!({"type": "complete"})));
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn oversized_line_is_dropped_up_to_its_newline() {
        let mut decoder = FrameDecoder::with_max_line(16);
        assert!(decoder.push(b"data: {\"type\":\"stage1_").is_empty());
        assert_eq!(decoder.pending_len(), 0);
        assert!(decoder.push(b"complete\",\"data\":[]}").is_empty());
        assert_eq!(decoder.pending_len(), 0);
        assert_eq!(
            decoder.push(b"]}\ndata: {\"a\":1}\n"),
            vec![json!({"a": 1})]
        );
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn long_line_in_small_chunks_scans_only_new_bytes() {
        let mut decoder = FrameDecoder::new();
        let payload = "x".repeat(10_000);
        let line = format!("data: \"{payload}\"\n");
        let mut frames = Vec::new();
        for (i, chunk) in line.as_bytes().chunks(3).enumerate() {
            frames.extend(decoder.push(chunk));
            if frames.is_empty() {
                assert_eq!(decoder.scanned, decoder.pending_len(), "after chunk {i}");
            }
        }
        assert_eq!(frames, vec![json!(payload)]);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn prefix_requires_space() {
        assert_eq!(decode_line(b"data:{\"type\":\"complete\"}"), None);
        assert_eq!(decode_line(b""), None);
    }

    #[tokio::test]
    async fn reader_yields_frames_across_chunks() {
        let chunks: Vec<Result<&[u8], Infallible>> = vec![
            Ok(b"data: {\"type\":\"st".as_slice()),
            Ok(b"age1_start\"}\n\ndata: {\"ty".as_slice()),
            Ok(b"pe\":\"complete\"}\n\n".as_slice()),
        ];
        let mut reader = FrameReader::new(stream::iter(chunks));
        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(json!({"type": "stage1_start"}))
        );
        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(json!({"type": "complete"}))
        );
        assert_eq!(reader.next_frame().await.unwrap(), None);
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn reader_surfaces_transport_error_after_buffered_frames() {
        let chunks: Vec<Result<&[u8], &str>> = vec![
            Ok(b"data: {\"type\":\"stage1_start\"}\n".as_slice()),
            Err("connection reset"),
        ];
        let mut reader = FrameReader::new(stream::iter(chunks));
        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(json!({"type": "stage1_start"}))
        );
        assert_eq!(reader.next_frame().await, Err("connection reset"));
    }
}
