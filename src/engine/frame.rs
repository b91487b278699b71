//! Line framing for the job event stream.
//!
//! The body is a sequence of `\n`-terminated lines. Chunks may split a line
//! (or a multi-byte character) anywhere, so bytes stay buffered until the
//! terminating newline arrives. [`FrameDecoder`] is a
//! [`tokio_util::codec::Decoder`] and is read through `FramedRead`.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

/// Prefix of a line carrying one JSON status event.
pub const DATA_MARKER: &str = "data: ";
/// Prefix of the line the server sends before closing the body.
pub const CLOSE_MARKER: &str = "event: close";

/// Longest line accepted: 1 MiB. Longer lines are skipped up to their newline.
pub const MAX_LINE_BYTES: usize = 1_048_576;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolFrame {
    Data(String),
    Close,
    /// Any other non-empty line; carried so the caller can log it.
    Other(String),
}

#[derive(Debug)]
pub struct FrameDecoder {
    lines: LinesCodec,
    closed: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    pub fn with_max_length(max: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max),
            closed: false,
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameDecoder {
    type Item = ProtocolFrame;
    type Error = std::io::Error;

    /// Next complete frame, or `Ok(None)` while no terminated line is buffered.
    /// After a close frame everything is discarded.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ProtocolFrame>, Self::Error> {
        loop {
            if self.closed {
                src.clear();
                return Ok(None);
            }
            // Over-long and non-UTF-8 lines are dropped; FramedRead would end
            // the stream on the first decoder error.
            let line = match self.lines.decode(src) {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(None),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!("dropping over-long stream line");
                    continue;
                }
                Err(LinesCodecError::Io(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                    warn!(error = %e, "dropping undecodable stream line");
                    continue;
                }
                Err(LinesCodecError::Io(e)) => return Err(e),
            };
            if let Some(frame) = classify(&line) {
                if frame == ProtocolFrame::Close {
                    self.closed = true;
                    src.clear();
                }
                return Ok(Some(frame));
            }
        }
    }

    /// An unterminated trailing line never becomes a frame.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<ProtocolFrame>, Self::Error> {
        let frame = self.decode(src)?;
        if frame.is_none() && !src.is_empty() {
            debug!(bytes = src.len(), "discarding unterminated line at end of body");
            src.clear();
        }
        Ok(frame)
    }
}

fn classify(line: &str) -> Option<ProtocolFrame> {
    if line.is_empty() {
        return None;
    }
    if line.starts_with(CLOSE_MARKER) {
        return Some(ProtocolFrame::Close);
    }
    if let Some(payload) = line.strip_prefix(DATA_MARKER) {
        return Some(ProtocolFrame::Data(payload.to_string()));
    }
    Some(ProtocolFrame::Other(line.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{stream, StreamExt};
    use tokio_util::codec::FramedRead;
    use tokio_util::io::StreamReader;

    const STREAM: &str = concat!(
        "data: {\"status\":\"initiated\",\"message\":\"Starting…\"}\n\n",
        ": keep-alive\n",
        "data: {\"status\":\"processing\",\"message\":\"Initializing AI model...\"}\r\n\n",
        "data: {\"status\":\"completed\",\"message\":\"done\",\"title\":\"T\"}\n\n",
        "event: close\ndata: {}\n\n",
    );

    /// Feed chunks straight into the decoder, draining after each one.
    fn decode_chunks(chunks: &[&[u8]]) -> Vec<ProtocolFrame> {
        decode_with(FrameDecoder::new(), chunks)
    }

    fn decode_with(mut dec: FrameDecoder, chunks: &[&[u8]]) -> Vec<ProtocolFrame> {
        let mut buf = BytesMut::new();
        let mut out = Vec::new();
        for chunk in chunks {
            buf.extend_from_slice(chunk);
            while let Some(frame) = dec.decode(&mut buf).unwrap() {
                out.push(frame);
            }
        }
        out
    }

    #[test]
    fn decodes_whole_stream() {
        let frames = decode_chunks(&[STREAM.as_bytes()]);
        assert_eq!(frames.len(), 5);
        assert_eq!(
            frames[0],
            ProtocolFrame::Data("{\"status\":\"initiated\",\"message\":\"Starting…\"}".into())
        );
        assert_eq!(frames[1], ProtocolFrame::Other(": keep-alive".into()));
        assert_eq!(
            frames[2],
            ProtocolFrame::Data(
                "{\"status\":\"processing\",\"message\":\"Initializing AI model...\"}".into()
            )
        );
        assert_eq!(frames[4], ProtocolFrame::Close);
    }

    #[test]
    fn framing_is_independent_of_chunk_boundaries() {
        let bytes = STREAM.as_bytes();
        let expected = decode_chunks(&[bytes]);

        // Every single split point, including inside the multi-byte ellipsis.
        for at in 0..=bytes.len() {
            let (a, b) = bytes.split_at(at);
            assert_eq!(decode_chunks(&[a, b]), expected, "split at {at}");
        }

        // Byte-at-a-time delivery.
        let singles: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(decode_chunks(&singles), expected);

        // Uneven chunk sizes.
        for size in [2, 3, 7, 13, 64] {
            let chunks: Vec<&[u8]> = bytes.chunks(size).collect();
            assert_eq!(decode_chunks(&chunks), expected, "chunk size {size}");
        }
    }

    #[test]
    fn split_mid_json_yields_one_frame() {
        let frames = decode_chunks(&[
            b"data: {\"status\":\"initiated\",\"".as_slice(),
            b"message\":\"starting\"}\n".as_slice(),
        ]);
        assert_eq!(
            frames,
            vec![ProtocolFrame::Data(
                "{\"status\":\"initiated\",\"message\":\"starting\"}".into()
            )]
        );
    }

    #[test]
    fn unterminated_line_is_not_emitted() {
        let mut dec = FrameDecoder::new();
        let mut buf = BytesMut::from(&b"data: {\"status\":\"processing\",\"message\":\"x\"}"[..]);
        assert_eq!(dec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"\n");
        assert!(matches!(dec.decode(&mut buf).unwrap(), Some(ProtocolFrame::Data(_))));
        assert!(buf.is_empty());
    }

    #[test]
    fn unterminated_tail_is_dropped_at_eof() {
        let mut dec = FrameDecoder::new();
        let mut buf = BytesMut::from(&b"data: one\ndata: partial"[..]);
        assert_eq!(
            dec.decode_eof(&mut buf).unwrap(),
            Some(ProtocolFrame::Data("one".into()))
        );
        assert_eq!(dec.decode_eof(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn frames_before_close_in_same_chunk_come_first() {
        let mut dec = FrameDecoder::new();
        let mut buf =
            BytesMut::from(&b"data: one\ndata: two\nevent: close\ndata: {}\ndata: partial"[..]);
        assert_eq!(dec.decode(&mut buf).unwrap(), Some(ProtocolFrame::Data("one".into())));
        assert_eq!(dec.decode(&mut buf).unwrap(), Some(ProtocolFrame::Data("two".into())));
        assert_eq!(dec.decode(&mut buf).unwrap(), Some(ProtocolFrame::Close));
        assert_eq!(dec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"\ndata: late\n");
        assert_eq!(dec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn blank_lines_produce_nothing() {
        assert!(decode_chunks(&[b"\n\r\n\n".as_slice()]).is_empty());
    }

    #[test]
    fn over_long_line_is_skipped_with_bounded_buffer() {
        let mut dec = FrameDecoder::with_max_length(64);
        let mut buf = BytesMut::new();
        let junk = [b'x'; 1024];
        for _ in 0..64 {
            buf.extend_from_slice(&junk);
            assert_eq!(dec.decode(&mut buf).unwrap(), None);
            assert!(buf.len() <= 64 + 1, "buffer held {} bytes", buf.len());
        }
        buf.extend_from_slice(b"xxxx\ndata: after\n");
        assert_eq!(
            dec.decode(&mut buf).unwrap(),
            Some(ProtocolFrame::Data("after".into()))
        );
    }

    #[test]
    fn invalid_utf8_line_is_skipped() {
        let frames = decode_chunks(&[b"data: \xff\xfe\ndata: ok\n".as_slice()]);
        assert_eq!(frames, vec![ProtocolFrame::Data("ok".into())]);
    }

    #[tokio::test]
    async fn framed_read_over_byte_stream() {
        let chunks: Vec<std::io::Result<bytes::Bytes>> = STREAM
            .as_bytes()
            .chunks(5)
            .map(|c| Ok(bytes::Bytes::copy_from_slice(c)))
            .collect();
        let reader = StreamReader::new(stream::iter(chunks));
        let frames: Vec<ProtocolFrame> = FramedRead::new(reader, FrameDecoder::new())
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(frames, decode_chunks(&[STREAM.as_bytes()]));
    }
}
