//! Frame extraction for the kiosk controller's wire format.
//!
//! The controller writes flat JSON objects back to back with no length prefix,
//! checksum or line discipline:
//! ```text
//! noise {"belt_separator":1} \r\n {"clear_pet":1,"grinder":1} ...
//! └────┘└──────────────────┘      └──────────────────────────┘
//! dropped      frame                          frame
//! ```
//!
//! A frame runs from the first `{` to the first `}` after it. The scan does
//! not balance braces, so a nested object would be cut at its inner `}`.
//! The controller never sends nested objects.
//!
//! A frame longer than [`MAX_FRAME_SIZE`] bytes is dropped whole, whether it
//! arrived in one read or many. Scanning resumes after its closing brace.

use bytes::{Buf, BytesMut};

/// Opening delimiter.
pub const FRAME_START: u8 = b'{';

/// Closing delimiter.
pub const FRAME_END: u8 = b'}';

/// Largest frame, braces included, that is passed on.
pub const MAX_FRAME_SIZE: usize = 4096;

/// Incremental frame extractor that handles partial data.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    /// Inside an oversized frame; everything up to the next `}` is dropped.
    discarding: bool,
}

impl FrameDecoder {
    /// Creates a new frame decoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            discarding: false,
        }
    }

    /// Appends `data` and returns the frames it completed.
    ///
    /// The returned iterator is lazy; frames it does not yield stay buffered
    /// and come out of the next call.
    pub fn feed(&mut self, data: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(data);
        Frames { decoder: self }
    }

    /// Extracts the next complete frame, if any.
    pub fn next_frame(&mut self) -> Option<String> {
        loop {
            if self.discarding {
                let Some(end) = self.buffer.iter().position(|&b| b == FRAME_END) else {
                    self.buffer.clear();
                    return None;
                };
                self.buffer.advance(end + 1);
                self.discarding = false;
            }

            let Some(start) = self.buffer.iter().position(|&b| b == FRAME_START) else {
                // Nothing before a `{` can ever become part of a frame.
                self.buffer.clear();
                return None;
            };
            self.buffer.advance(start);

            let Some(end) = self.buffer[1..].iter().position(|&b| b == FRAME_END) else {
                // The closing brace would push it past the limit.
                if self.buffer.len() >= MAX_FRAME_SIZE {
                    tracing::warn!(
                        "discarding frame over {} bytes without a closing brace",
                        MAX_FRAME_SIZE
                    );
                    self.buffer.clear();
                    self.discarding = true;
                }
                return None;
            };

            let len = end + 2;
            if len > MAX_FRAME_SIZE {
                tracing::warn!("discarding {} byte frame (limit {})", len, MAX_FRAME_SIZE);
                self.buffer.advance(len);
                continue;
            }

            let frame = self.buffer.split_to(len);
            return Some(String::from_utf8_lossy(&frame).into_owned());
        }
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }
}

/// Lazy sequence of frames produced by [`FrameDecoder::feed`].
#[derive(Debug)]
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(decoder: &mut FrameDecoder, data: &[u8]) -> Vec<String> {
        decoder.feed(data).collect()
    }

    #[test]
    fn test_single_frame() {
        let mut decoder = FrameDecoder::new();
        let frames = collect(&mut decoder, br#"{"belt_separator":1}"#);
        assert_eq!(frames, vec![r#"{"belt_separator":1}"#]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_partial_frame() {
        let mut decoder = FrameDecoder::new();

        assert!(collect(&mut decoder, br#"{"clear_pe"#).is_empty());
        assert!(decoder.buffered() > 0);

        let frames = collect(&mut decoder, br#"t":1}"#);
        assert_eq!(frames, vec![r#"{"clear_pet":1}"#]);
    }

    #[test]
    fn test_multiple_frames_with_noise() {
        let mut decoder = FrameDecoder::new();
        let frames = collect(
            &mut decoder,
            b"boot ok\r\n{\"grinder\":1}\r\n junk {\"grinder\":0}{\"movement\":1",
        );
        assert_eq!(frames, vec![r#"{"grinder":1}"#, r#"{"grinder":0}"#]);
        assert_eq!(decoder.buffered(), br#"{"movement":1"#.len());
    }

    #[test]
    fn test_first_closing_brace_wins() {
        let mut decoder = FrameDecoder::new();
        let frames = collect(&mut decoder, br#"{"a":{"b":1}}"#);
        assert_eq!(frames, vec![r#"{"a":{"b":1}"#]);
    }

    #[test]
    fn test_stray_closing_brace_is_dropped() {
        let mut decoder = FrameDecoder::new();
        let frames = collect(&mut decoder, br#"} }{"err_pet":1}"#);
        assert_eq!(frames, vec![r#"{"err_pet":1}"#]);
    }

    #[test]
    fn test_malformed_span_is_still_a_frame() {
        let mut decoder = FrameDecoder::new();
        let frames = collect(&mut decoder, b"{not json}");
        assert_eq!(frames, vec!["{not json}"]);
    }

    #[test]
    fn test_chunk_boundaries_do_not_change_output() {
        let stream: &[u8] =
            b"xx{\"belt_separator\":1}\n{\"clear_pet\":1,\"grinder\":1}ab{\"grinder\":0}{";

        let mut whole = FrameDecoder::new();
        let expected = collect(&mut whole, stream);
        assert_eq!(expected.len(), 3);

        for split in 0..=stream.len() {
            let mut decoder = FrameDecoder::new();
            let mut frames = collect(&mut decoder, &stream[..split]);
            frames.extend(collect(&mut decoder, &stream[split..]));
            assert_eq!(frames, expected, "split at {split}");
        }

        let mut decoder = FrameDecoder::new();
        let frames: Vec<String> = stream
            .iter()
            .flat_map(|b| collect(&mut decoder, std::slice::from_ref(b)))
            .collect();
        assert_eq!(frames, expected);
    }

    #[test]
    fn test_unterminated_overflow_is_discarded() {
        let mut decoder = FrameDecoder::new();
        let mut data = vec![b'{'];
        data.resize(MAX_FRAME_SIZE, b'x');

        assert!(collect(&mut decoder, &data).is_empty());
        assert_eq!(decoder.buffered(), 0);

        let frames = collect(&mut decoder, b"xx}{\"grinder\":1}");
        assert_eq!(frames, vec![r#"{"grinder":1}"#]);
    }

    #[test]
    fn test_oversized_frame_dropped_at_any_split() {
        // The stray `{` inside the padding must not start a new frame.
        let pad = format!("{}{{{}", "x".repeat(4500), "x".repeat(480));
        let stream = format!(r#"{{"movement":1,"pad":"{pad}"}}{{"grinder":1}}"#);
        let stream = stream.as_bytes();
        let expected = vec![r#"{"grinder":1}"#.to_owned()];

        let mut whole = FrameDecoder::new();
        assert_eq!(collect(&mut whole, stream), expected);

        for split in [1, 100, MAX_FRAME_SIZE - 1, MAX_FRAME_SIZE, 4500, 4501, 4990] {
            let mut decoder = FrameDecoder::new();
            let mut frames = collect(&mut decoder, &stream[..split]);
            frames.extend(collect(&mut decoder, &stream[split..]));
            assert_eq!(frames, expected, "split at {split}");
        }
    }

    #[test]
    fn test_frame_at_limit_is_kept() {
        let frame = format!(r#"{{"pad":"{}"}}"#, "x".repeat(MAX_FRAME_SIZE - 10));
        assert_eq!(frame.len(), MAX_FRAME_SIZE);

        let mut whole = FrameDecoder::new();
        assert_eq!(collect(&mut whole, frame.as_bytes()), vec![frame.clone()]);

        let mut decoder = FrameDecoder::new();
        let (head, tail) = frame.as_bytes().split_at(MAX_FRAME_SIZE - 1);
        assert!(collect(&mut decoder, head).is_empty());
        assert_eq!(collect(&mut decoder, tail), vec![frame]);
    }

    #[test]
    fn test_clear() {
        let mut decoder = FrameDecoder::new();
        assert!(collect(&mut decoder, b"{\"grin").is_empty());
        decoder.clear();
        assert!(collect(&mut decoder, b"der\":1}").is_empty());
    }
}
